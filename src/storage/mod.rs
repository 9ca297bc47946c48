//! Record store for scan runs, detection records and camera metadata.
//!
//! A run is written twice: once when it starts (all counters zero except
//! `total_cameras`) and once when it is finalized. Detection records are
//! written as each camera completes, so they may be visible before the run's
//! final counters are.

mod memory;
mod sqlite;
mod supabase;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cameras::Camera;
use crate::detect::{Detection, DetectionResult};

pub use memory::InMemoryRecordStore;
pub use sqlite::{SqliteRecordStore, DEFAULT_DB_PATH};
pub use supabase::SupabaseRecordStore;

/// Rows per camera upsert call.
pub const UPSERT_BATCH_SIZE: usize = 500;

/// Opaque run identifier assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final counters written when a run is finalized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanAggregates {
    pub cameras_scanned: u64,
    pub cameras_failed: u64,
    pub total_count: u64,
    pub cameras_with_detections: u64,
    pub duration_seconds: f64,
}

/// Stored view of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanRun {
    pub id: RunId,
    pub total_cameras: u64,
    pub cameras_scanned: u64,
    pub cameras_failed: u64,
    pub total_count: u64,
    pub cameras_with_detections: u64,
    pub duration_seconds: Option<f64>,
}

impl ScanRun {
    pub(crate) fn provisional(id: RunId, total_cameras: u64) -> Self {
        Self {
            id,
            total_cameras,
            cameras_scanned: 0,
            cameras_failed: 0,
            total_count: 0,
            cameras_with_detections: 0,
            duration_seconds: None,
        }
    }

    pub(crate) fn apply(&mut self, aggregates: &ScanAggregates) {
        self.cameras_scanned = aggregates.cameras_scanned;
        self.cameras_failed = aggregates.cameras_failed;
        self.total_count = aggregates.total_count;
        self.cameras_with_detections = aggregates.cameras_with_detections;
        self.duration_seconds = Some(round_to(aggregates.duration_seconds, 2));
    }
}

/// Persisted per-camera detail row. Never built for zero detections.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub run_id: RunId,
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub count: u64,
    /// Rounded to 4 decimal places.
    pub avg_confidence: Option<f64>,
    pub detections: Vec<Detection>,
    pub image_reference: Option<String>,
}

impl DetectionRecord {
    pub fn from_result(
        run_id: &RunId,
        result: &DetectionResult,
        image_reference: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.clone(),
            camera_id: result.camera_id.clone(),
            timestamp,
            count: result.count() as u64,
            avg_confidence: result.avg_confidence.map(|avg| round_to(avg as f64, 4)),
            detections: result.detections.clone(),
            image_reference: image_reference.map(str::to_string),
        }
    }

    pub fn detections_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.detections)?)
    }
}

/// Camera metadata row written by the bulk upsert.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraRecord {
    pub camera_id: String,
    pub location_name: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub council_district: Option<i64>,
    pub last_scanned: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CameraRecord {
    pub fn from_camera(camera: &Camera, scanned_at: DateTime<Utc>) -> Self {
        Self {
            camera_id: camera.id.clone(),
            location_name: camera.display_name.clone(),
            longitude: camera.longitude,
            latitude: camera.latitude,
            council_district: camera.district,
            last_scanned: scanned_at,
            updated_at: scanned_at,
        }
    }
}

/// Record store trait.
///
/// Only the scan loop's consuming thread talks to the store, so methods take
/// `&mut self`. Every call is an independent write; there is no transaction
/// spanning a run.
pub trait RecordStore: Send {
    fn name(&self) -> &'static str;

    /// Create the provisional run record and return its id.
    fn create_run(&mut self, total_cameras: u64) -> Result<RunId>;

    /// Write final counters. Call once per run.
    fn finalize_run(&mut self, run_id: &RunId, aggregates: &ScanAggregates) -> Result<()>;

    /// Persist one detail row.
    fn insert_detection_record(&mut self, record: &DetectionRecord) -> Result<()>;

    /// Upsert one chunk of camera rows keyed by `camera_id`.
    fn upsert_camera_batch(&mut self, batch: &[CameraRecord]) -> Result<()>;

    /// Insert a detail record for `result`. No-op when nothing was detected.
    fn insert_detection(
        &mut self,
        run_id: &RunId,
        result: &DetectionResult,
        image_reference: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if result.count() == 0 {
            return Ok(());
        }
        let record = DetectionRecord::from_result(run_id, result, image_reference, timestamp);
        self.insert_detection_record(&record)
    }

    /// Upsert camera metadata in chunks of `UPSERT_BATCH_SIZE`. Returns the
    /// number of chunks written.
    fn bulk_upsert_cameras(&mut self, cameras: &[Camera]) -> Result<usize> {
        let now = Utc::now();
        let rows: Vec<CameraRecord> = cameras
            .iter()
            .map(|camera| CameraRecord::from_camera(camera, now))
            .collect();
        let mut batches = 0;
        for chunk in rows.chunks(UPSERT_BATCH_SIZE) {
            self.upsert_camera_batch(chunk)?;
            batches += 1;
        }
        Ok(batches)
    }
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
