//! Traffic Census
//!
//! Periodically scans a fleet of traffic cameras, counts a target vehicle
//! class in each camera's current snapshot, and records run statistics plus
//! per-detection evidence.
//!
//! # Pipeline
//!
//! One run goes fetch → detect → annotate → upload → record for every camera:
//!
//! 1. The camera directory yields the active, geofenced camera list.
//! 2. A provisional run record is created.
//! 3. A fixed pool of workers processes one camera each at a time. A camera
//!    that fails (fetch, decode, inference, panic) is counted and skipped; it
//!    never stops the run.
//! 4. The calling thread consumes outcomes as they finish, updates counters
//!    and writes detail records immediately.
//! 5. The run record is finalized, then metadata for every successfully
//!    processed camera is upserted.
//!
//! # Module Structure
//!
//! - `cameras`: camera inventory and service-area filtering
//! - `ingest`: snapshot fetching
//! - `detect`: model lifecycle and inference backends
//! - `render`: evidence annotation and JPEG compression
//! - `evidence`: blob upload with deterministic object paths
//! - `storage`: run, detection and camera records
//! - `scan`: the orchestrator

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

pub mod cameras;
pub mod config;
pub mod detect;
pub mod error;
pub mod evidence;
pub mod ingest;
pub mod render;
pub mod scan;
pub mod setup;
pub mod storage;
pub mod transport;
pub mod ui;

pub use cameras::{Camera, CameraDirectory, ServiceArea, SocrataDirectory, StaticDirectory};
pub use config::ScanConfig;
pub use detect::{Detection, DetectionResult, Detector, OriginalImage};
pub use error::ScanError;
pub use evidence::{BlobStore, EvidenceSink};
pub use ingest::ImageSource;
pub use render::{EvidenceRenderer, RenderSettings};
pub use scan::{CameraOutcome, CameraPipeline, ScanReport, ScanSettings, Scanner, TaskStage};
pub use storage::{RecordStore, RunId, ScanAggregates};

/// Write `data` to `path` through a sibling temp file and a rename, so
/// readers never observe a partial file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(data)
            .with_context(|| format!("write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", tmp.display()))?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("101500.jpg");
        write_atomic(&path, b"first")?;
        write_atomic(&path, b"second")?;
        assert_eq!(std::fs::read(&path)?, b"second");
        assert!(!dir.path().join("101500.tmp").exists());
        Ok(())
    }
}
