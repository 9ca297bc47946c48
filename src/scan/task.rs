use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use crate::cameras::Camera;
use crate::detect::{DetectionResult, Detector, OriginalImage};
use crate::error::ScanError;
use crate::evidence::EvidenceSink;
use crate::ingest::ImageSource;
use crate::render::EvidenceRenderer;

/// Where a camera task is, or where it stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStage {
    Pending,
    Fetching,
    Detecting,
    Rendering,
    Uploading,
    Done,
    Failed,
}

impl TaskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Pending => "pending",
            TaskStage::Fetching => "fetching",
            TaskStage::Detecting => "detecting",
            TaskStage::Rendering => "rendering",
            TaskStage::Uploading => "uploading",
            TaskStage::Done => "done",
            TaskStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one camera task. The original image has always been released
/// by the time an outcome exists.
#[derive(Debug)]
pub enum CameraOutcome {
    Scanned {
        result: DetectionResult,
        image_ref: Option<String>,
        detected_at: DateTime<Utc>,
    },
    Failed {
        stage: TaskStage,
        error: ScanError,
    },
}

impl CameraOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CameraOutcome::Failed { .. })
    }
}

/// Per-camera work shared read-only by every worker.
pub struct CameraPipeline {
    source: Box<dyn ImageSource>,
    detector: Detector,
    renderer: EvidenceRenderer,
    sink: Option<EvidenceSink>,
}

impl CameraPipeline {
    pub fn new<S: ImageSource + 'static>(
        source: S,
        detector: Detector,
        renderer: EvidenceRenderer,
        sink: Option<EvidenceSink>,
    ) -> Self {
        Self {
            source: Box::new(source),
            detector,
            renderer,
            sink,
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Run one camera. Errors and panics never leave this call.
    pub fn process(&self, camera: &Camera) -> CameraOutcome {
        let stage = Cell::new(TaskStage::Pending);
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.process_tracked(camera, &stage)));
        match attempt {
            Ok(outcome) => outcome,
            Err(_) => {
                log::error!("camera {}: worker panicked while {}", camera.id, stage.get());
                CameraOutcome::Failed {
                    stage: stage.get(),
                    error: ScanError::WorkerPanic {
                        camera_id: camera.id.clone(),
                    },
                }
            }
        }
    }

    fn process_tracked(&self, camera: &Camera, stage: &Cell<TaskStage>) -> CameraOutcome {
        let enter = |next: TaskStage| {
            stage.set(next);
            log::trace!("camera {}: {}", camera.id, next);
        };

        enter(TaskStage::Fetching);
        let bytes = match self.source.fetch_image(&camera.id) {
            Ok(bytes) => bytes,
            Err(error) => return failed(stage, error),
        };

        enter(TaskStage::Detecting);
        let mut result = match self.detector.detect(&bytes, &camera.id) {
            Ok(result) => result,
            Err(error) => return failed(stage, error),
        };
        drop(bytes);
        let detected_at = Utc::now();

        let original = result.take_original();
        let image_ref = match (&self.sink, original) {
            (Some(sink), Some(original)) if result.count() > 0 => {
                self.publish_evidence(sink, original, &result, detected_at, &enter)
            }
            (_, original) => {
                if let Some(original) = original {
                    original.discard();
                }
                None
            }
        };

        enter(TaskStage::Done);
        CameraOutcome::Scanned {
            result,
            image_ref,
            detected_at,
        }
    }

    /// Render and upload. Either step failing costs only the evidence image.
    fn publish_evidence(
        &self,
        sink: &EvidenceSink,
        original: OriginalImage,
        result: &DetectionResult,
        detected_at: DateTime<Utc>,
        enter: &dyn Fn(TaskStage),
    ) -> Option<String> {
        enter(TaskStage::Rendering);
        let jpeg = match self.renderer.render(original, &result.detections) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::warn!("camera {}: evidence render failed: {:#}", result.camera_id, e);
                return None;
            }
        };

        enter(TaskStage::Uploading);
        sink.upload(&jpeg, &result.camera_id, detected_at)
    }
}

fn failed(stage: &Cell<TaskStage>, error: ScanError) -> CameraOutcome {
    let at = stage.get();
    stage.set(TaskStage::Failed);
    CameraOutcome::Failed { stage: at, error }
}
