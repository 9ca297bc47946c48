//! Evidence rendering: draw detections onto the camera image and compress it
//! for upload.
//!
//! Everything here is a pure function of its inputs and the settings, so the
//! renderer is shared across workers without synchronization.

mod glyphs;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImage, Rgba};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::{Detection, OriginalImage};

pub use glyphs::text_size;

pub const DEFAULT_MAX_WIDTH: u32 = 800;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;
pub const DEFAULT_BOX_COLOR: [u8; 3] = [0x00, 0xFF, 0x00];
pub const DEFAULT_BOX_WIDTH: u32 = 3;
pub const DEFAULT_TEXT_SCALE: u32 = 2;
pub const LABEL_PADDING: u32 = 4;

const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub box_color: [u8; 3],
    pub box_width: u32,
    pub text_scale: u32,
    pub max_width: u32,
    pub quality: u8,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            box_color: DEFAULT_BOX_COLOR,
            box_width: DEFAULT_BOX_WIDTH,
            text_scale: DEFAULT_TEXT_SCALE,
            max_width: DEFAULT_MAX_WIDTH,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EvidenceRenderer {
    settings: RenderSettings,
}

impl EvidenceRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Annotate and compress, consuming the original image.
    pub fn render(&self, original: OriginalImage, detections: &[Detection]) -> Result<Vec<u8>> {
        let annotated = self.annotate(original.into_image(), detections);
        compress(annotated, self.settings.max_width, self.settings.quality)
    }

    /// Draw one box outline and one confidence label per detection.
    pub fn annotate(&self, mut image: DynamicImage, detections: &[Detection]) -> DynamicImage {
        let [r, g, b] = self.settings.box_color;
        let box_color = Rgba([r, g, b, 255]);
        let scale = self.settings.text_scale.max(1);

        for detection in detections {
            draw_box(&mut image, detection.bbox, box_color, self.settings.box_width);

            let text = confidence_label(detection.confidence);
            let (text_width, text_height) = text_size(&text, scale);
            let (label_x, label_y) = label_origin(detection.bbox, text_height, LABEL_PADDING);
            let background = Rect::at(label_x, label_y)
                .of_size(text_width + LABEL_PADDING * 2, text_height + LABEL_PADDING * 2);
            draw_filled_rect_mut(&mut image, background, box_color);
            draw_text(
                &mut image,
                label_x + LABEL_PADDING as i32,
                label_y + LABEL_PADDING as i32,
                &text,
                scale,
                TEXT_COLOR,
            );
        }
        image
    }
}

/// `"87%"` for a confidence of 0.87.
pub fn confidence_label(confidence: f32) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// Top-left corner of a label box `text_height + 2 * padding` tall.
///
/// The label sits above the detection box unless it would start above the
/// top edge of the image, in which case it sits just below the box.
pub fn label_origin(bbox: [f32; 4], text_height: u32, padding: u32) -> (i32, i32) {
    let x = bbox[0].round() as i32;
    let above = bbox[1].round() as i32 - text_height as i32 - 2 * padding as i32;
    if above < 0 {
        (x, bbox[3].round() as i32 + padding as i32)
    } else {
        (x, above)
    }
}

/// Downscale to `max_width` if wider, flatten to RGB, and encode as JPEG.
pub fn compress(image: DynamicImage, max_width: u32, quality: u8) -> Result<Vec<u8>> {
    let rgb = match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    };

    let rgb = if rgb.width() > max_width {
        let ratio = max_width as f64 / rgb.width() as f64;
        let new_height = ((rgb.height() as f64 * ratio) as u32).max(1);
        imageops::resize(&rgb, max_width, new_height, FilterType::Lanczos3)
    } else {
        rgb
    };

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&rgb)
        .context("JPEG encode failed")?;
    Ok(buffer)
}

fn draw_box(image: &mut DynamicImage, bbox: [f32; 4], color: Rgba<u8>, thickness: u32) {
    let x1 = bbox[0].round() as i32;
    let y1 = bbox[1].round() as i32;
    let x2 = bbox[2].round() as i32;
    let y2 = bbox[3].round() as i32;

    // Outline grows inward from the box edge.
    for t in 0..thickness.max(1) as i32 {
        let width = x2 - x1 - 2 * t;
        let height = y2 - y1 - 2 * t;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(x1 + t, y1 + t).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

fn draw_text(image: &mut DynamicImage, x: i32, y: i32, text: &str, scale: u32, color: Rgba<u8>) {
    let (img_w, img_h) = (image.width() as i32, image.height() as i32);
    let mut pen_x = x;
    for ch in text.chars() {
        if let Some(rows) = glyphs::glyph_bits(ch) {
            for (row, pattern) in rows.iter().enumerate() {
                for col in 0..glyphs::GLYPH_WIDTH {
                    if (pattern >> (glyphs::GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = pen_x + (col * scale) as i32;
                    let py = y + (row as u32 * scale) as i32;
                    for dy in 0..scale as i32 {
                        for dx in 0..scale as i32 {
                            let (fx, fy) = (px + dx, py + dy);
                            if fx >= 0 && fy >= 0 && fx < img_w && fy < img_h {
                                image.put_pixel(fx as u32, fy as u32, color);
                            }
                        }
                    }
                }
            }
        }
        pen_x += (glyphs::GLYPH_ADVANCE * scale) as i32;
    }
}
