use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{round_to, CameraRecord, DetectionRecord, RecordStore, RunId, ScanAggregates};
use crate::detect::Detection;
use crate::transport::SupabaseClient;

#[derive(Debug, Serialize)]
struct NewScanRow {
    total_cameras: u64,
    cameras_scanned: u64,
    cameras_failed: u64,
    total_count: u64,
    cameras_with_detections: u64,
}

#[derive(Debug, Serialize)]
struct ScanUpdateRow {
    cameras_scanned: u64,
    cameras_failed: u64,
    total_count: u64,
    cameras_with_detections: u64,
    duration_seconds: f64,
}

#[derive(Debug, Serialize)]
struct DetectionRow<'a> {
    scan_id: &'a str,
    camera_id: &'a str,
    timestamp: String,
    vehicle_count: u64,
    avg_confidence: Option<f64>,
    detections_json: &'a [Detection],
    image_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CameraRow<'a> {
    camera_id: &'a str,
    location_name: &'a str,
    longitude: Option<f64>,
    latitude: Option<f64>,
    council_district: Option<i64>,
    last_scanned: String,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct InsertedScan {
    id: Value,
}

/// Supabase PostgREST tables `scans`, `detections` and `cameras`.
pub struct SupabaseRecordStore {
    client: SupabaseClient,
}

impl SupabaseRecordStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

impl RecordStore for SupabaseRecordStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    fn create_run(&mut self, total_cameras: u64) -> Result<RunId> {
        let url = self.client.rest_url("scans")?;
        let rows: Value = self
            .client
            .request("POST", &url)
            .set("Prefer", "return=representation")
            .send_json(new_scan_body(total_cameras)?)
            .context("insert scan row")?
            .into_json()
            .context("scan insert response was not JSON")?;
        run_id_from_response(rows)
    }

    fn finalize_run(&mut self, run_id: &RunId, aggregates: &ScanAggregates) -> Result<()> {
        let mut url = self.client.rest_url("scans")?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", run_id));
        self.client
            .request("PATCH", &url)
            .send_json(scan_update_body(aggregates)?)
            .with_context(|| format!("update scan {}", run_id))?;
        Ok(())
    }

    fn insert_detection_record(&mut self, record: &DetectionRecord) -> Result<()> {
        let url = self.client.rest_url("detections")?;
        self.client
            .request("POST", &url)
            .send_json(detection_body(record)?)
            .with_context(|| format!("insert detection for camera {}", record.camera_id))?;
        Ok(())
    }

    fn upsert_camera_batch(&mut self, batch: &[CameraRecord]) -> Result<()> {
        let mut url = self.client.rest_url("cameras")?;
        url.query_pairs_mut().append_pair("on_conflict", "camera_id");
        self.client
            .request("POST", &url)
            .set("Prefer", "resolution=merge-duplicates")
            .send_json(camera_batch_body(batch)?)
            .with_context(|| format!("upsert {} camera rows", batch.len()))?;
        Ok(())
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn new_scan_body(total_cameras: u64) -> Result<Value> {
    Ok(serde_json::to_value(NewScanRow {
        total_cameras,
        cameras_scanned: 0,
        cameras_failed: 0,
        total_count: 0,
        cameras_with_detections: 0,
    })?)
}

fn scan_update_body(aggregates: &ScanAggregates) -> Result<Value> {
    Ok(serde_json::to_value(ScanUpdateRow {
        cameras_scanned: aggregates.cameras_scanned,
        cameras_failed: aggregates.cameras_failed,
        total_count: aggregates.total_count,
        cameras_with_detections: aggregates.cameras_with_detections,
        duration_seconds: round_to(aggregates.duration_seconds, 2),
    })?)
}

fn detection_body(record: &DetectionRecord) -> Result<Value> {
    Ok(serde_json::to_value(DetectionRow {
        scan_id: &record.run_id.0,
        camera_id: &record.camera_id,
        timestamp: timestamp(record.timestamp),
        vehicle_count: record.count,
        avg_confidence: record.avg_confidence,
        detections_json: &record.detections,
        image_url: record.image_reference.as_deref(),
    })?)
}

fn camera_batch_body(batch: &[CameraRecord]) -> Result<Value> {
    let rows: Vec<CameraRow<'_>> = batch
        .iter()
        .map(|row| CameraRow {
            camera_id: &row.camera_id,
            location_name: &row.location_name,
            longitude: row.longitude,
            latitude: row.latitude,
            council_district: row.council_district,
            last_scanned: timestamp(row.last_scanned),
            updated_at: timestamp(row.updated_at),
        })
        .collect();
    Ok(serde_json::to_value(rows)?)
}

/// PostgREST answers an insert with `return=representation` as an array of rows.
fn run_id_from_response(rows: Value) -> Result<RunId> {
    let mut inserted: Vec<InsertedScan> =
        serde_json::from_value(rows).context("scan insert response did not match schema")?;
    let row = inserted
        .pop()
        .ok_or_else(|| anyhow!("scan insert returned no rows"))?;
    match row.id {
        Value::Number(n) => Ok(RunId(n.to_string())),
        Value::String(s) if !s.is_empty() => Ok(RunId(s)),
        other => Err(anyhow!("scan insert returned unusable id {}", other)),
    }
}
