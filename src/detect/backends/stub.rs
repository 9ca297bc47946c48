use anyhow::Result;
use image::DynamicImage;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::Detection;

/// Stub backend for dry runs and tests. Reports the same boxes for every
/// image, clipped to the image bounds.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<Detection>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let max_x = image.width() as f32;
        let max_y = image.height() as f32;
        let mut out: Vec<Detection> = self
            .detections
            .iter()
            .filter_map(|d| {
                let x1 = d.bbox[0].clamp(0.0, max_x);
                let y1 = d.bbox[1].clamp(0.0, max_y);
                let x2 = d.bbox[2].clamp(0.0, max_x);
                let y2 = d.bbox[3].clamp(0.0, max_y);
                (x1 < x2 && y1 < y2).then(|| Detection::new(d.confidence, [x1, y1, x2, y2]))
            })
            .collect();
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(out)
    }
}
