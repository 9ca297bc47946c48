//! Camera directory.
//!
//! The directory yields the cameras to scan in one run, already filtered to
//! the service area. Everything downstream treats a `Camera` as immutable.

mod geofence;
mod socrata;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use geofence::ServiceArea;
pub use socrata::{SocrataDirectory, DEFAULT_CAMERA_API_BASE};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub display_name: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub district: Option<i64>,
}

impl Camera {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            longitude: None,
            latitude: None,
            district: None,
        }
    }

    pub fn with_location(mut self, longitude: f64, latitude: f64) -> Self {
        self.longitude = Some(longitude);
        self.latitude = Some(latitude);
        self
    }

    pub fn with_district(mut self, district: i64) -> Self {
        self.district = Some(district);
        self
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}

/// Source of the camera list for a run.
pub trait CameraDirectory: Send + Sync {
    fn active_cameras(&self) -> Result<Vec<Camera>>;
}

/// Fixed camera list, for dry runs and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    cameras: Vec<Camera>,
}

impl StaticDirectory {
    pub fn new(cameras: Vec<Camera>) -> Self {
        Self { cameras }
    }
}

impl CameraDirectory for StaticDirectory {
    fn active_cameras(&self) -> Result<Vec<Camera>> {
        Ok(self.cameras.clone())
    }
}

/// Lenient district parse: the first comma-separated token as an integer.
///
/// `"4, 7"` → 4, `3` → 3, `5.0` → None, `"north"` → None.
pub fn parse_district(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.split(',').next()?.trim().parse().ok(),
        _ => None,
    }
}
