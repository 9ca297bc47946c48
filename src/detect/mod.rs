mod adapter;
mod backend;
pub mod backends;
pub mod model_fetch;
mod result;
pub mod yolo;

pub use adapter::Detector;
pub use backend::{BackendLoader, InferenceBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, DetectionResult, OriginalImage};
pub use yolo::YoloParams;
