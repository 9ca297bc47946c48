use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    round_to, CameraRecord, DetectionRecord, RecordStore, RunId, ScanAggregates, ScanRun,
};
use crate::detect::Detection;

pub const DEFAULT_DB_PATH: &str = "census.db";

pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn =
            Connection::open(db_path).with_context(|| format!("open database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS scans (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at TEXT NOT NULL,
              total_cameras INTEGER NOT NULL,
              cameras_scanned INTEGER NOT NULL DEFAULT 0,
              cameras_failed INTEGER NOT NULL DEFAULT 0,
              total_count INTEGER NOT NULL DEFAULT 0,
              cameras_with_detections INTEGER NOT NULL DEFAULT 0,
              duration_seconds REAL
            );

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              scan_id INTEGER NOT NULL REFERENCES scans(id),
              camera_id TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              vehicle_count INTEGER NOT NULL,
              avg_confidence REAL,
              detections_json TEXT NOT NULL,
              image_url TEXT
            );

            CREATE TABLE IF NOT EXISTS cameras (
              camera_id TEXT PRIMARY KEY,
              location_name TEXT NOT NULL,
              longitude REAL,
              latitude REAL,
              council_district INTEGER,
              last_scanned TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_scan ON detections(scan_id);
            CREATE INDEX IF NOT EXISTS idx_detections_camera ON detections(camera_id);
            "#,
        )?;
        Ok(())
    }

    pub fn load_run(&self, run_id: &RunId) -> Result<Option<ScanRun>> {
        let id = parse_run_id(run_id)?;
        let run = self
            .conn
            .query_row(
                r#"
                SELECT total_cameras, cameras_scanned, cameras_failed, total_count,
                       cameras_with_detections, duration_seconds
                FROM scans WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(ScanRun {
                        id: run_id.clone(),
                        total_cameras: row.get::<_, i64>(0)? as u64,
                        cameras_scanned: row.get::<_, i64>(1)? as u64,
                        cameras_failed: row.get::<_, i64>(2)? as u64,
                        total_count: row.get::<_, i64>(3)? as u64,
                        cameras_with_detections: row.get::<_, i64>(4)? as u64,
                        duration_seconds: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    pub fn load_detections(&self, run_id: &RunId) -> Result<Vec<DetectionRecord>> {
        let id = parse_run_id(run_id)?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT camera_id, timestamp, vehicle_count, avg_confidence, detections_json, image_url
            FROM detections WHERE scan_id = ?1 ORDER BY id ASC
            "#,
        )?;
        let mut rows = stmt.query(params![id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let timestamp: String = row.get(1)?;
            let detections_json: String = row.get(4)?;
            let detections: Vec<Detection> = serde_json::from_str(&detections_json)
                .context("corrupt detections_json column")?;
            out.push(DetectionRecord {
                run_id: run_id.clone(),
                camera_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .context("corrupt detection timestamp")?
                    .with_timezone(&Utc),
                count: row.get::<_, i64>(2)? as u64,
                avg_confidence: row.get(3)?,
                detections,
                image_reference: row.get(5)?,
            });
        }
        Ok(out)
    }

    pub fn load_camera(&self, camera_id: &str) -> Result<Option<CameraRecord>> {
        let camera = self
            .conn
            .query_row(
                r#"
                SELECT camera_id, location_name, longitude, latitude, council_district,
                       last_scanned, updated_at
                FROM cameras WHERE camera_id = ?1
                "#,
                params![camera_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((camera_id, location_name, longitude, latitude, council_district, last, updated)) =
            camera
        else {
            return Ok(None);
        };
        Ok(Some(CameraRecord {
            camera_id,
            location_name,
            longitude,
            latitude,
            council_district,
            last_scanned: parse_timestamp(&last)?,
            updated_at: parse_timestamp(&updated)?,
        }))
    }

    pub fn camera_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cameras", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create_run(&mut self, total_cameras: u64) -> Result<RunId> {
        let total = i64::try_from(total_cameras)
            .map_err(|_| anyhow!("total_cameras exceeds i64 range"))?;
        self.conn.execute(
            "INSERT INTO scans(created_at, total_cameras) VALUES (?1, ?2)",
            params![format_timestamp(Utc::now()), total],
        )?;
        Ok(RunId(self.conn.last_insert_rowid().to_string()))
    }

    fn finalize_run(&mut self, run_id: &RunId, aggregates: &ScanAggregates) -> Result<()> {
        let id = parse_run_id(run_id)?;
        let updated = self.conn.execute(
            r#"
            UPDATE scans
            SET cameras_scanned = ?1, cameras_failed = ?2, total_count = ?3,
                cameras_with_detections = ?4, duration_seconds = ?5
            WHERE id = ?6
            "#,
            params![
                aggregates.cameras_scanned as i64,
                aggregates.cameras_failed as i64,
                aggregates.total_count as i64,
                aggregates.cameras_with_detections as i64,
                round_to(aggregates.duration_seconds, 2),
                id
            ],
        )?;
        if updated != 1 {
            return Err(anyhow!("unknown run {}", run_id));
        }
        Ok(())
    }

    fn insert_detection_record(&mut self, record: &DetectionRecord) -> Result<()> {
        let scan_id = parse_run_id(&record.run_id)?;
        self.conn.execute(
            r#"
            INSERT INTO detections(scan_id, camera_id, timestamp, vehicle_count,
                                   avg_confidence, detections_json, image_url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                scan_id,
                record.camera_id,
                format_timestamp(record.timestamp),
                record.count as i64,
                record.avg_confidence,
                record.detections_json()?,
                record.image_reference
            ],
        )?;
        Ok(())
    }

    fn upsert_camera_batch(&mut self, batch: &[CameraRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO cameras(camera_id, location_name, longitude, latitude,
                                    council_district, last_scanned, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(camera_id) DO UPDATE SET
                  location_name = excluded.location_name,
                  longitude = excluded.longitude,
                  latitude = excluded.latitude,
                  council_district = excluded.council_district,
                  last_scanned = excluded.last_scanned,
                  updated_at = excluded.updated_at
                "#,
            )?;
            for row in batch {
                stmt.execute(params![
                    row.camera_id,
                    row.location_name,
                    row.longitude,
                    row.latitude,
                    row.council_district,
                    format_timestamp(row.last_scanned),
                    format_timestamp(row.updated_at)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn parse_run_id(run_id: &RunId) -> Result<i64> {
    run_id
        .0
        .parse()
        .map_err(|_| anyhow!("run id '{}' is not a sqlite row id", run_id))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}
