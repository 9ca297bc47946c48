use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

use super::{CameraRecord, DetectionRecord, RecordStore, RunId, ScanAggregates, ScanRun};

/// Record store kept in process memory. Used for dry runs and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    runs: Vec<ScanRun>,
    detections: Vec<DetectionRecord>,
    camera_batches: Vec<Vec<CameraRecord>>,
    cameras: BTreeMap<String, CameraRecord>,
    finalize_calls: usize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> &[ScanRun] {
        &self.runs
    }

    pub fn run(&self, id: &RunId) -> Option<&ScanRun> {
        self.runs.iter().find(|run| &run.id == id)
    }

    /// Detail rows in insertion order.
    pub fn detections(&self) -> &[DetectionRecord] {
        &self.detections
    }

    /// Every upsert call, in call order.
    pub fn camera_batches(&self) -> &[Vec<CameraRecord>] {
        &self.camera_batches
    }

    /// Current camera table after all upserts.
    pub fn cameras(&self) -> &BTreeMap<String, CameraRecord> {
        &self.cameras
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls
    }
}

impl RecordStore for InMemoryRecordStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_run(&mut self, total_cameras: u64) -> Result<RunId> {
        let id = RunId(format!("run-{}", self.runs.len() + 1));
        self.runs.push(ScanRun::provisional(id.clone(), total_cameras));
        Ok(id)
    }

    fn finalize_run(&mut self, run_id: &RunId, aggregates: &ScanAggregates) -> Result<()> {
        let run = self
            .runs
            .iter_mut()
            .find(|run| &run.id == run_id)
            .ok_or_else(|| anyhow!("unknown run {}", run_id))?;
        run.apply(aggregates);
        self.finalize_calls += 1;
        Ok(())
    }

    fn insert_detection_record(&mut self, record: &DetectionRecord) -> Result<()> {
        self.detections.push(record.clone());
        Ok(())
    }

    fn upsert_camera_batch(&mut self, batch: &[CameraRecord]) -> Result<()> {
        for row in batch {
            self.cameras.insert(row.camera_id.clone(), row.clone());
        }
        self.camera_batches.push(batch.to_vec());
        Ok(())
    }
}
