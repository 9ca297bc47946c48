//! Failure taxonomy for a scan run.
//!
//! Per-camera failures (`Fetch`, `Decode`, `Inference`, `WorkerPanic`) are
//! absorbed at the task boundary and counted. `Upload` only ever costs the
//! evidence image. `Persistence` and `Directory` end the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to fetch image for camera {camera_id}: {reason}")]
    Fetch { camera_id: String, reason: String },

    #[error("failed to decode image for camera {camera_id}: {reason}")]
    Decode { camera_id: String, reason: String },

    #[error("inference failed for camera {camera_id}: {source}")]
    Inference {
        camera_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("evidence upload failed for {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("record store {operation} failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("camera directory unavailable: {0}")]
    Directory(#[source] anyhow::Error),

    #[error("worker panicked while processing camera {camera_id}")]
    WorkerPanic { camera_id: String },
}

impl ScanError {
    pub fn persistence(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Persistence { operation, source }
    }

    /// True for failures that only cost one camera and never end the run.
    pub fn is_camera_scoped(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. }
                | Self::Decode { .. }
                | Self::Inference { .. }
                | Self::WorkerPanic { .. }
        )
    }
}
