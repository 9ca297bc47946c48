use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// One detected vehicle. `bbox` is `[x1, y1, x2, y2]` in source pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn new(confidence: f32, bbox: [f32; 4]) -> Self {
        Self { confidence, bbox }
    }

    pub fn width(&self) -> f32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> f32 {
        self.bbox[3] - self.bbox[1]
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.bbox[0].max(other.bbox[0]);
        let iy1 = self.bbox[1].max(other.bbox[1]);
        let ix2 = self.bbox[2].min(other.bbox[2]);
        let iy2 = self.bbox[3].min(other.bbox[3]);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

// ----------------------------------------------------------------------------
// OriginalImage: move-only decoded camera frame
// ----------------------------------------------------------------------------

/// Decoded camera image held between inference and evidence rendering.
///
/// Deliberately not `Clone`. It leaves a `DetectionResult` exactly once via
/// `DetectionResult::take_original`, and is then either rendered (consumed by
/// value) or dropped through `discard`.
pub struct OriginalImage {
    image: DynamicImage,
}

impl OriginalImage {
    pub(crate) fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Hand the pixels to a consumer that takes ownership.
    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    /// Release the buffer without rendering.
    pub fn discard(self) {
        drop(self.image);
    }
}

impl std::fmt::Debug for OriginalImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginalImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

/// Result of running detection on one camera image.
#[derive(Debug)]
pub struct DetectionResult {
    pub camera_id: String,
    /// Ordered by descending confidence.
    pub detections: Vec<Detection>,
    /// `None` iff there are no detections.
    pub avg_confidence: Option<f32>,
    original: Option<OriginalImage>,
}

impl DetectionResult {
    pub fn new(camera_id: impl Into<String>, detections: Vec<Detection>) -> Self {
        let avg_confidence = average_confidence(&detections);
        Self {
            camera_id: camera_id.into(),
            detections,
            avg_confidence,
            original: None,
        }
    }

    pub fn with_original(mut self, image: DynamicImage) -> Self {
        self.original = Some(OriginalImage::new(image));
        self
    }

    pub fn count(&self) -> usize {
        self.detections.len()
    }

    pub fn has_original(&self) -> bool {
        self.original.is_some()
    }

    /// Move the original image out. Returns `None` on every call after the first.
    pub fn take_original(&mut self) -> Option<OriginalImage> {
        self.original.take()
    }
}

fn average_confidence(detections: &[Detection]) -> Option<f32> {
    if detections.is_empty() {
        return None;
    }
    let sum: f32 = detections.iter().map(|d| d.confidence).sum();
    Some(sum / detections.len() as f32)
}
