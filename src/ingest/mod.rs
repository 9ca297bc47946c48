//! Camera image sources.
//!
//! A source turns a camera id into the raw bytes of that camera's current
//! snapshot. Sources are shared by every scan worker and must be safe to call
//! concurrently. They never retry and never decode; decoding belongs to the
//! detector.

pub mod http;
mod limiter;

pub use http::{HttpImageSource, HttpSourceConfig};
pub use limiter::{ConnectionLimiter, ConnectionPermit};

use crate::error::ScanError;

pub trait ImageSource: Send + Sync {
    /// Fetch the current image for one camera. Any failure is `ScanError::Fetch`.
    fn fetch_image(&self, camera_id: &str) -> Result<Vec<u8>, ScanError>;
}
