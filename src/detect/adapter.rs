use anyhow::anyhow;
use std::sync::{Mutex, OnceLock};

use crate::detect::backend::{BackendLoader, InferenceBackend};
use crate::detect::result::DetectionResult;
use crate::error::ScanError;

/// Detector adapter shared by every scan worker.
///
/// The backend is loaded lazily behind a one-time barrier: concurrent first
/// callers serialize on `init_lock`, exactly one of them runs the loader, and
/// everyone else observes the published handle. After that, `detect` takes
/// no lock at all.
pub struct Detector {
    loader: Box<dyn BackendLoader>,
    backend: OnceLock<Box<dyn InferenceBackend>>,
    init_lock: Mutex<()>,
}

impl Detector {
    pub fn new<L: BackendLoader + 'static>(loader: L) -> Self {
        Self {
            loader: Box::new(loader),
            backend: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Wrap an already constructed backend.
    pub fn with_backend<B: InferenceBackend + 'static>(backend: B) -> Self {
        let detector = Self::new(|| -> anyhow::Result<Box<dyn InferenceBackend>> {
            Err(anyhow!("backend already provided"))
        });
        let _ = detector.backend.set(Box::new(backend));
        detector
    }

    /// Tract/ONNX detector; downloads the model on first load if missing.
    #[cfg(feature = "backend-tract")]
    pub fn tract(
        model_path: std::path::PathBuf,
        model_url: String,
        params: crate::detect::yolo::YoloParams,
    ) -> Self {
        Self::new(move || -> anyhow::Result<Box<dyn InferenceBackend>> {
            crate::detect::model_fetch::ensure_model(&model_path, &model_url)?;
            log::info!("loading model from {}", model_path.display());
            let backend = crate::detect::backends::TractBackend::new(&model_path, params.clone())?;
            Ok(Box::new(backend))
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.get().is_some()
    }

    /// Force the model load now instead of on the first `detect`.
    pub fn warm_up(&self) -> anyhow::Result<()> {
        self.backend().map(|_| ())
    }

    fn backend(&self) -> anyhow::Result<&dyn InferenceBackend> {
        if let Some(backend) = self.backend.get() {
            return Ok(backend.as_ref());
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| anyhow!("detector init lock poisoned"))?;
        if let Some(backend) = self.backend.get() {
            return Ok(backend.as_ref());
        }

        let loaded = self.loader.load()?;
        log::info!("inference backend '{}' ready", loaded.name());
        let _ = self.backend.set(loaded);
        self.backend
            .get()
            .map(|backend| backend.as_ref())
            .ok_or_else(|| anyhow!("inference backend was not published"))
    }

    /// Decode `image_bytes` and run detection on it.
    ///
    /// The returned result owns the decoded image until the caller takes it.
    pub fn detect(&self, image_bytes: &[u8], camera_id: &str) -> Result<DetectionResult, ScanError> {
        let image = image::load_from_memory(image_bytes).map_err(|e| ScanError::Decode {
            camera_id: camera_id.to_string(),
            reason: e.to_string(),
        })?;

        let backend = self.backend().map_err(|source| ScanError::Inference {
            camera_id: camera_id.to_string(),
            source,
        })?;
        let detections = backend.infer(&image).map_err(|source| ScanError::Inference {
            camera_id: camera_id.to_string(),
            source,
        })?;

        Ok(DetectionResult::new(camera_id, detections).with_original(image))
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
