//! Evidence sink: uploads annotated detection images to a blob store.
//!
//! Object paths are derived from the camera id and the detection timestamp,
//! never from the wall clock at upload time, so the same logical detection
//! always lands at the same path.

mod filesystem;
mod supabase;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::error::ScanError;

pub use filesystem::{FilesystemBlobStore, DEFAULT_EVIDENCE_DIR};
pub use supabase::SupabaseBlobStore;

pub const EVIDENCE_CONTENT_TYPE: &str = "image/jpeg";

/// Path-addressed object storage.
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store `bytes` at `path`, replacing any existing object. Returns a
    /// stable reference to the stored object.
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// `detections/{camera_id}/{YYYY-MM-DD}/{HHMMSS}.jpg`
pub fn evidence_path(camera_id: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "detections/{}/{}/{}.jpg",
        camera_id,
        timestamp.format("%Y-%m-%d"),
        timestamp.format("%H%M%S")
    )
}

pub struct EvidenceSink {
    store: Box<dyn BlobStore>,
}

impl EvidenceSink {
    pub fn new<S: BlobStore + 'static>(store: S) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Upload one evidence image; failures are returned for the caller to log.
    pub fn try_upload(
        &self,
        bytes: &[u8],
        camera_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<String, ScanError> {
        let path = evidence_path(camera_id, timestamp);
        self.store
            .put(&path, bytes, EVIDENCE_CONTENT_TYPE)
            .map_err(|source| ScanError::Upload { path, source })
    }

    /// Upload one evidence image. `None` means the detection is recorded
    /// without evidence.
    pub fn upload(&self, bytes: &[u8], camera_id: &str, timestamp: DateTime<Utc>) -> Option<String> {
        match self.try_upload(bytes, camera_id, timestamp) {
            Ok(reference) => Some(reference),
            Err(e) => {
                log::warn!("camera {}: {:#}", camera_id, anyhow::Error::new(e));
                None
            }
        }
    }
}

impl std::fmt::Debug for EvidenceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceSink")
            .field("store", &self.store.name())
            .finish()
    }
}
