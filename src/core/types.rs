// Value types shared by the detection, ordering and persistence layers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Class label attached to a detected box
///
/// Serialized as a plain lowercase string so persisted records and class
/// tables stay readable ("frame", "text", or any other class name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Label {
    Frame,
    Text,
    Other(String),
}

impl Label {
    pub fn as_str(&self) -> &str {
        match self {
            Label::Frame => "frame",
            Label::Text => "text",
            Label::Other(name) => name,
        }
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "frame" => Label::Frame,
            "text" => Label::Text,
            other => Label::Other(other.to_string()),
        }
    }
}

impl From<String> for Label {
    fn from(name: String) -> Self {
        Label::from(name.as_str())
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned detection box with class label and confidence
///
/// Coordinates are model pixels straight out of the decoder and normalized
/// [0,1] image coordinates after the caller's post-pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: Label,
    pub score: f32,
}

impl BBox {
    /// Build a box, swapping inverted corners and clamping the score to [0,1]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, label: Label, score: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
            label,
            score: score.clamp(0.0, 1.0),
        }
    }

    /// Build a box from centre/size form (the detector's native encoding)
    pub fn from_center(xc: f32, yc: f32, w: f32, h: f32, label: Label, score: f32) -> Self {
        Self::new(xc - w / 2.0, yc - h / 2.0, xc + w / 2.0, yc + h / 2.0, label, score)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn centroid(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Zero-area boxes can't contain anything
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Inclusive point-in-rectangle test
    pub fn contains_point(&self, (x, y): (f32, f32)) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    /// True unless the boxes are disjoint on either axis (touching edges overlap)
    pub fn overlaps(&self, other: &BBox) -> bool {
        !(self.x2 < other.x1 || self.x1 > other.x2 || self.y2 < other.y1 || self.y1 > other.y2)
    }

    /// Continuous-coordinate IoU (no +1 pixel convention)
    pub fn iou(&self, other: &BBox) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    pub fn distance_to(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.centroid();
        let (bx, by) = other.centroid();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// Writing direction of a text region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Vertical,
    Horizontal,
}

/// Persisted text region, coordinates normalized to [0,1] of the image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    /// Reading-sequence rank, starts from 1
    pub order: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(default)]
    pub direction: Direction,
}

impl TextBox {
    pub fn from_bbox(bbox: &BBox, order: u32, direction: Direction) -> Self {
        Self {
            order,
            text: String::new(),
            translated_text: None,
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
            direction,
        }
    }

    /// Geometry view used for overlap checks against fresh detections
    pub fn as_bbox(&self) -> BBox {
        BBox::new(self.x1, self.y1, self.x2, self.y2, Label::Text, 1.0)
    }
}

/// Kind of persisted annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Textbox,
}

/// Persisted annotation envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    /// Position within the persisted sequence, starts from 0
    pub index: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textbox: Option<TextBox>,
}

impl Layer {
    /// Wrap a text box in a fresh layer at `index`
    pub fn textbox(textbox: TextBox, index: u32) -> Self {
        let name = if textbox.text.is_empty() {
            "Text...".to_string()
        } else {
            textbox.text.clone()
        };
        Self {
            id: Uuid::new_v4(),
            kind: LayerKind::Textbox,
            index,
            name,
            textbox: Some(textbox),
        }
    }

    /// Equality used by the persistence round-trip law
    pub fn same_position_and_box(&self, other: &Layer) -> bool {
        self.index == other.index && self.textbox == other.textbox
    }
}

/// Source image handed to the inference and OCR collaborators
#[derive(Clone)]
pub struct ImageData {
    pub key: String,
    pub image_bytes: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("key", &self.key)
            .field("bytes", &self.image_bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Explicit inputs of one ordering pass
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub image_key: String,
    pub frames: Vec<BBox>,
    pub texts: Vec<BBox>,
}

impl PipelineContext {
    /// Split suppressed boxes into frames and texts; other classes are ignored
    pub fn from_boxes(image_key: impl Into<String>, boxes: Vec<BBox>) -> Self {
        let (frames, rest): (Vec<BBox>, Vec<BBox>) =
            boxes.into_iter().partition(|b| b.label == Label::Frame);
        let texts = rest.into_iter().filter(|b| b.label == Label::Text).collect();
        Self {
            image_key: image_key.into(),
            frames,
            texts,
        }
    }
}

/// Phase 1 output: ordered text boxes for one image
#[derive(Debug, Clone)]
pub struct Phase1Output {
    pub image_key: String,
    pub frame_count: usize,
    /// Text boxes in reading order; position + 1 is the order
    pub ordered_texts: Vec<BBox>,
    pub metrics: PerformanceMetrics,
}

/// Phase 2 output: the layer set as persisted
#[derive(Debug, Clone)]
pub struct Phase2Output {
    pub image_key: String,
    pub layers: Vec<Layer>,
    pub added: usize,
    pub kept_existing: usize,
}

/// Phase 3 output: OCR merge summary
#[derive(Debug, Clone, Default)]
pub struct Phase3Output {
    pub image_key: String,
    pub updated: usize,
    pub failed: usize,
}

/// Per-run timings and counts
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub decode_time: Duration,
    pub suppress_time: Duration,
    pub order_time: Duration,
    pub candidates: usize,
    pub kept: usize,
    pub ordered: usize,
}
