// Post-pass applied by callers after suppression: model pixels -> [0,1]
// image coordinates, with optional fixed padding. Kept out of the
// suppressor so each call site decides whether it wants padding at all.

use crate::core::types::{BBox, TextBox};

/// Model input geometry and padding for the normalization post-pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeSpec {
    pub model_width: f32,
    pub model_height: f32,
    /// Grown on every side, in model pixels, before dividing
    pub padding: f32,
}

impl NormalizeSpec {
    pub fn square(model_size: u32, padding: f32) -> Self {
        Self {
            model_width: model_size as f32,
            model_height: model_size as f32,
            padding,
        }
    }
}

pub fn normalize_box(bbox: &BBox, params: &NormalizeSpec) -> BBox {
    let p = params.padding;
    BBox::new(
        ((bbox.x1 - p) / params.model_width).clamp(0.0, 1.0),
        ((bbox.y1 - p) / params.model_height).clamp(0.0, 1.0),
        ((bbox.x2 + p) / params.model_width).clamp(0.0, 1.0),
        ((bbox.y2 + p) / params.model_height).clamp(0.0, 1.0),
        bbox.label.clone(),
        bbox.score,
    )
}

pub fn normalize_boxes(boxes: Vec<BBox>, params: &NormalizeSpec) -> Vec<BBox> {
    boxes.iter().map(|b| normalize_box(b, params)).collect()
}

/// Pixel rectangle inside the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Map a normalized text box back onto the source image, e.g. for OCR crops
pub fn to_image_pixels(textbox: &TextBox, image_width: u32, image_height: u32) -> PixelRect {
    let scale = |v: f32, extent: u32| (v.clamp(0.0, 1.0) * extent as f32).round() as u32;

    let x1 = scale(textbox.x1, image_width);
    let y1 = scale(textbox.y1, image_height);
    let x2 = scale(textbox.x2, image_width).max(x1);
    let y2 = scale(textbox.y2, image_height).max(y1);

    PixelRect {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    }
}
