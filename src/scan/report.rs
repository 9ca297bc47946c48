use std::fmt;
use std::time::Duration;

use super::task::CameraOutcome;
use crate::storage::{RunId, ScanAggregates};

const RULE: &str = "============================================================";

/// What a finished run reports to the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanReport {
    pub run_id: RunId,
    pub total_cameras: u64,
    pub aggregates: ScanAggregates,
    /// Chunks written by the camera metadata upsert.
    pub upsert_batches: usize,
}

impl ScanReport {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.aggregates.duration_seconds.max(0.0))
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.aggregates;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "SCAN COMPLETE")?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Scan ID: {}", self.run_id)?;
        writeln!(f, "Total cameras: {}", self.total_cameras)?;
        writeln!(f, "Cameras scanned: {}", a.cameras_scanned)?;
        writeln!(f, "Cameras failed: {}", a.cameras_failed)?;
        writeln!(f, "Total vehicles detected: {}", a.total_count)?;
        writeln!(f, "Cameras with detections: {}", a.cameras_with_detections)?;
        writeln!(f, "Duration: {:.2} seconds", a.duration_seconds)?;
        write!(f, "{}", RULE)
    }
}

/// One `[k/N] Camera X: ...` line.
pub fn progress_line(done: u64, total: u64, camera_id: &str, outcome: &CameraOutcome) -> String {
    let detail = match outcome {
        CameraOutcome::Failed { stage, error } => format!("ERROR while {} - {}", stage, error),
        CameraOutcome::Scanned {
            result, image_ref, ..
        } => match result.avg_confidence {
            Some(avg) if result.count() > 0 => {
                let evidence = if image_ref.is_some() { "" } else { ", no evidence" };
                format!(
                    "{} vehicle(s) detected (avg conf: {:.2}{})",
                    result.count(),
                    avg,
                    evidence
                )
            }
            _ => "no vehicles".to_string(),
        },
    };
    format!("[{}/{}] Camera {}: {}", done, total, camera_id, detail)
}
