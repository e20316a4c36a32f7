pub mod decoder;
pub mod normalize;
pub mod suppression;

pub use decoder::{BoxDecoder, ClassTable, RawTensor, TensorLayout};
pub use normalize::{normalize_boxes, to_image_pixels, NormalizeSpec, PixelRect};
pub use suppression::{hard_nms, iou_inclusive, soft_nms, SoftNmsParams, SuppressionPolicy, Suppressor};

use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::core::config::Config;
use crate::core::errors::DetectionResult;
use crate::core::types::{BBox, PerformanceMetrics};
use crate::utils::Metrics;

/// Decode -> suppress -> normalize, configured once per application
pub struct DetectionService {
    decoder: BoxDecoder,
    suppressor: Suppressor,
    normalize: NormalizeSpec,
    metrics: Option<Metrics>,
}

impl DetectionService {
    pub fn new(config: Arc<Config>, metrics: Option<Metrics>) -> DetectionResult<Self> {
        let detection = &config.detection;

        let decoder = BoxDecoder::new(
            ClassTable::new(config.class_names().to_vec()),
            config.confidence_threshold(),
        );
        let suppressor = Suppressor::new(
            detection.suppression,
            SoftNmsParams {
                overlap_threshold: config.overlap_threshold(),
                sigma: config.sigma(),
            },
        )?;
        let normalize = NormalizeSpec::square(config.model_input_size(), detection.padding);

        debug!(
            "Detection: {} classes, {:?} layout, {:?} suppression, threshold {}, model {}px",
            decoder.class_table().len(),
            detection.layout,
            suppressor.policy(),
            decoder.confidence_threshold(),
            config.model_input_size()
        );

        Ok(Self {
            decoder,
            suppressor,
            normalize,
            metrics,
        })
    }

    /// Run the full post-processing chain on one tensor.
    ///
    /// Returned boxes are normalized to [0,1] image coordinates and carry
    /// their class label; the caller splits frames from texts.
    pub fn detect(&self, tensor: &RawTensor) -> DetectionResult<(Vec<BBox>, PerformanceMetrics)> {
        let mut perf = PerformanceMetrics::default();

        let decode_start = Instant::now();
        let candidates = self.decoder.decode(tensor)?;
        perf.decode_time = decode_start.elapsed();
        perf.candidates = candidates.len();

        let suppress_start = Instant::now();
        let kept = self.suppressor.suppress(candidates);
        perf.suppress_time = suppress_start.elapsed();
        perf.kept = kept.len();

        let normalized = normalize_boxes(kept, &self.normalize);

        if let Some(ref m) = self.metrics {
            m.record_detection(perf.candidates, perf.kept, perf.decode_time + perf.suppress_time);
            for b in &normalized {
                m.record_label(b.label.as_str());
            }
        }

        debug!(
            "✓ Detection: {} candidates -> {} kept (decode {:.2}ms, suppress {:.2}ms)",
            perf.candidates,
            perf.kept,
            perf.decode_time.as_secs_f64() * 1000.0,
            perf.suppress_time.as_secs_f64() * 1000.0
        );

        Ok((normalized, perf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Label;

    fn tensor_from_rows(rows: &[[f32; 6]]) -> RawTensor {
        RawTensor::new(
            rows.iter().flatten().copied().collect(),
            rows.len(),
            2,
            TensorLayout::AnchorMajor,
        )
    }

    #[test]
    fn test_detect_chain_normalizes_and_suppresses() {
        let mut config = Config::defaults();
        config.detection.model_input_size = 100;
        let service = DetectionService::new(Arc::new(config), None).unwrap();

        let tensor = tensor_from_rows(&[
            // frame covering the top half
            [50.0, 25.0, 100.0, 50.0, 0.9, 0.0],
            // duplicate text detections on the same spot
            [80.0, 20.0, 10.0, 20.0, 0.0, 0.8],
            [80.0, 20.5, 10.0, 20.0, 0.0, 0.7],
            // below threshold
            [10.0, 90.0, 5.0, 5.0, 0.01, 0.05],
        ]);

        let (boxes, perf) = service.detect(&tensor).unwrap();
        assert_eq!(perf.candidates, 3);
        assert_eq!(perf.kept, 2);
        assert_eq!(boxes.len(), 2);

        let frame = boxes.iter().find(|b| b.label == Label::Frame).unwrap();
        assert_eq!((frame.x1, frame.y1, frame.x2, frame.y2), (0.0, 0.0, 1.0, 0.5));
        assert!(boxes.iter().all(|b| b.x2 <= 1.0 && b.y2 <= 1.0));
    }

    #[test]
    fn test_detect_propagates_malformed_tensor() {
        let service = DetectionService::new(Arc::new(Config::defaults()), None).unwrap();
        let tensor = RawTensor::new(vec![0.0; 5], 1, 2, TensorLayout::ChannelMajor);
        assert!(service.detect(&tensor).is_err());
    }
}
