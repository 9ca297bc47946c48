use anyhow::Result;
use image::DynamicImage;

use crate::detect::result::Detection;

/// Inference backend trait.
///
/// A backend is loaded once and then shared read-only across every scan
/// worker, so `infer` takes `&self` and implementations must be `Sync`.
/// Returned boxes are in source-image pixel coordinates, ordered by
/// descending confidence, and already filtered to the target class.
pub trait InferenceBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded image.
    fn infer(&self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

/// Produces a backend on first use. Called at most once per successful load.
pub trait BackendLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn InferenceBackend>>;
}

impl<F> BackendLoader for F
where
    F: Fn() -> Result<Box<dyn InferenceBackend>> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn InferenceBackend>> {
        self()
    }
}
