use ndarray::{ArrayView2, Axis};
use tracing::{debug, trace};

use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::{BBox, Label};

/// Memory layout of a raw detector output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// YOLOv8 export: shape (4 + classes, anchors); every x-centre first,
    /// then every y-centre, width, height, then one channel per class
    #[default]
    ChannelMajor,
    /// Row per anchor: shape (anchors, 4 + classes)
    AnchorMajor,
}

/// Flat detector output plus the shape needed to interpret it
#[derive(Debug, Clone)]
pub struct RawTensor {
    pub data: Vec<f32>,
    pub num_anchors: usize,
    pub num_classes: usize,
    pub layout: TensorLayout,
}

impl RawTensor {
    pub fn new(data: Vec<f32>, num_anchors: usize, num_classes: usize, layout: TensorLayout) -> Self {
        Self {
            data,
            num_anchors,
            num_classes,
            layout,
        }
    }

    pub fn channels(&self) -> usize {
        4 + self.num_classes
    }
}

/// Maps class indices to labels
#[derive(Debug, Clone)]
pub struct ClassTable {
    labels: Vec<Label>,
}

impl ClassTable {
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Two-class panel/text detector
    pub fn frame_text() -> Self {
        Self::new(vec![Label::Frame, Label::Text])
    }

    /// Single-class text detector
    pub fn text_only() -> Self {
        Self::new(vec![Label::Text])
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class_index: usize) -> Option<&Label> {
        self.labels.get(class_index)
    }
}

/// Turns a flat detection tensor into candidate boxes
#[derive(Debug, Clone)]
pub struct BoxDecoder {
    class_table: ClassTable,
    confidence_threshold: f32,
}

impl BoxDecoder {
    pub fn new(class_table: ClassTable, confidence_threshold: f32) -> Self {
        Self {
            class_table,
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn class_table(&self) -> &ClassTable {
        &self.class_table
    }

    /// Decode every anchor whose best class clears the confidence threshold.
    ///
    /// Output boxes are in model-pixel space, in anchor order. The buffer
    /// length must match the declared shape exactly.
    pub fn decode(&self, tensor: &RawTensor) -> DetectionResult<Vec<BBox>> {
        let view = self.view(tensor)?;
        let num_classes = tensor.num_classes;

        let mut boxes = Vec::new();
        let mut skipped_non_finite = 0usize;

        for (anchor_index, anchor) in view.axis_iter(Axis(1)).enumerate() {
            // argmax over class channels; ties keep the lowest class index
            let mut best_class = 0usize;
            let mut best_score = anchor[4];
            for class_index in 1..num_classes {
                let score = anchor[4 + class_index];
                if score > best_score {
                    best_class = class_index;
                    best_score = score;
                }
            }

            if !best_score.is_finite() || best_score < self.confidence_threshold {
                continue;
            }

            let (xc, yc, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
            if !(xc.is_finite() && yc.is_finite() && w.is_finite() && h.is_finite()) {
                skipped_non_finite += 1;
                continue;
            }

            // class_table length was checked against num_classes in view()
            let label = match self.class_table.label(best_class) {
                Some(label) => label.clone(),
                None => continue,
            };

            trace!(
                "Anchor {}: class={} score={:.3} centre=({:.1},{:.1}) size={:.1}x{:.1}",
                anchor_index, label, best_score, xc, yc, w, h
            );

            boxes.push(BBox::from_center(xc, yc, w, h, label, best_score));
        }

        if skipped_non_finite > 0 {
            debug!("Decoder skipped {} anchors with non-finite geometry", skipped_non_finite);
        }

        debug!(
            "Decoded {} candidates from {} anchors (threshold={:.2})",
            boxes.len(),
            tensor.num_anchors,
            self.confidence_threshold
        );

        Ok(boxes)
    }

    /// Validate the declared shape and view the buffer as (channels, anchors)
    fn view<'a>(&self, tensor: &'a RawTensor) -> DetectionResult<ArrayView2<'a, f32>> {
        if tensor.num_anchors == 0 || tensor.num_classes == 0 {
            return Err(DetectionError::InvalidTensorShape(format!(
                "anchors={} classes={}",
                tensor.num_anchors, tensor.num_classes
            )));
        }

        if tensor.num_classes != self.class_table.len() {
            return Err(DetectionError::ClassTableMismatch {
                tensor_classes: tensor.num_classes,
                table_classes: self.class_table.len(),
            });
        }

        let channels = tensor.channels();
        let expected = channels.checked_mul(tensor.num_anchors).ok_or_else(|| {
            DetectionError::InvalidTensorShape(format!(
                "{} channels x {} anchors overflows",
                channels, tensor.num_anchors
            ))
        })?;

        if tensor.data.len() != expected {
            return Err(DetectionError::MalformedTensor {
                expected,
                actual: tensor.data.len(),
                channels,
                anchors: tensor.num_anchors,
            });
        }

        let view = match tensor.layout {
            TensorLayout::ChannelMajor => {
                ArrayView2::from_shape((channels, tensor.num_anchors), tensor.data.as_slice())
            }
            TensorLayout::AnchorMajor => {
                ArrayView2::from_shape((tensor.num_anchors, channels), tensor.data.as_slice())
                    .map(|v| v.reversed_axes())
            }
        };

        view.map_err(|e| DetectionError::InvalidTensorShape(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Channel-major buffer from per-anchor rows
    fn channel_major(rows: &[[f32; 6]]) -> Vec<f32> {
        let mut data = vec![0.0; rows.len() * 6];
        for (i, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                data[c * rows.len() + i] = *value;
            }
        }
        data
    }

    #[test]
    fn test_decode_closed_form_corners() {
        let decoder = BoxDecoder::new(ClassTable::frame_text(), 0.1);
        let tensor = RawTensor::new(
            channel_major(&[[320.0, 200.0, 64.0, 40.0, 0.9, 0.05]]),
            1,
            2,
            TensorLayout::ChannelMajor,
        );

        let boxes = decoder.decode(&tensor).unwrap();
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (288.0, 180.0, 352.0, 220.0));
        assert_eq!(b.label, Label::Frame);
        assert!((b.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_picks_best_class_and_filters_threshold() {
        let decoder = BoxDecoder::new(ClassTable::frame_text(), 0.1);
        let tensor = RawTensor::new(
            channel_major(&[
                [10.0, 10.0, 4.0, 4.0, 0.2, 0.7],
                [50.0, 50.0, 4.0, 4.0, 0.05, 0.09],
                [90.0, 90.0, 4.0, 4.0, 0.3, 0.3],
            ]),
            3,
            2,
            TensorLayout::ChannelMajor,
        );

        let boxes = decoder.decode(&tensor).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].label, Label::Text);
        // tie resolves to the lowest class index
        assert_eq!(boxes[1].label, Label::Frame);
    }

    #[test]
    fn test_anchor_major_matches_channel_major() {
        let rows = [
            [100.0, 120.0, 30.0, 10.0, 0.8, 0.1],
            [300.0, 40.0, 12.0, 50.0, 0.2, 0.6],
        ];
        let decoder = BoxDecoder::new(ClassTable::frame_text(), 0.1);

        let channel = RawTensor::new(channel_major(&rows), 2, 2, TensorLayout::ChannelMajor);
        let anchor = RawTensor::new(
            rows.iter().flatten().copied().collect(),
            2,
            2,
            TensorLayout::AnchorMajor,
        );

        assert_eq!(decoder.decode(&channel).unwrap(), decoder.decode(&anchor).unwrap());
    }

    #[test]
    fn test_short_tensor_fails_fast() {
        let decoder = BoxDecoder::new(ClassTable::frame_text(), 0.1);
        let tensor = RawTensor::new(vec![0.0; 11], 2, 2, TensorLayout::ChannelMajor);

        match decoder.decode(&tensor) {
            Err(DetectionError::MalformedTensor { expected, actual, .. }) => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 11);
            }
            other => panic!("expected MalformedTensor, got {:?}", other),
        }
    }

    #[test]
    fn test_class_table_mismatch() {
        let decoder = BoxDecoder::new(ClassTable::text_only(), 0.1);
        let tensor = RawTensor::new(vec![0.0; 12], 2, 2, TensorLayout::ChannelMajor);
        assert!(matches!(
            decoder.decode(&tensor),
            Err(DetectionError::ClassTableMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_scores_are_skipped() {
        let decoder = BoxDecoder::new(ClassTable::frame_text(), 0.1);
        let tensor = RawTensor::new(
            channel_major(&[[10.0, 10.0, 4.0, 4.0, f32::NAN, f32::NAN]]),
            1,
            2,
            TensorLayout::ChannelMajor,
        );
        assert!(decoder.decode(&tensor).unwrap().is_empty());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let decoder = BoxDecoder::new(ClassTable::frame_text(), 0.1);
        let tensor = RawTensor::new(
            channel_major(&[
                [10.0, 10.0, 4.0, 4.0, 0.2, 0.7],
                [90.0, 90.0, 8.0, 6.0, 0.6, 0.3],
            ]),
            2,
            2,
            TensorLayout::ChannelMajor,
        );
        assert_eq!(decoder.decode(&tensor).unwrap(), decoder.decode(&tensor).unwrap());
    }
}
