// Phase 1: Detection & Reading Order

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::config::Config;
use crate::core::errors::DetectionResult;
use crate::core::types::{Phase1Output, PipelineContext};
use crate::services::detection::{DetectionService, RawTensor};
use crate::services::reading_order::ReadingOrderClusterer;
use crate::utils::Metrics;

/// Phase 1 pipeline: raw tensor -> text boxes in reading order
pub struct Phase1Pipeline {
    detector: Arc<DetectionService>,
    clusterer: ReadingOrderClusterer,
    metrics: Option<Metrics>,
}

impl Phase1Pipeline {
    pub fn new(config: Arc<Config>, detector: Arc<DetectionService>, metrics: Option<Metrics>) -> Self {
        Self {
            detector,
            clusterer: ReadingOrderClusterer::new(config.reading_direction()),
            metrics,
        }
    }

    /// Execute Phase 1 on one detector output
    ///
    /// # Steps:
    /// 1. Decode, suppress and normalize boxes
    /// 2. Split frames from texts
    /// 3. Cluster texts under frames and flatten into reading order
    #[instrument(skip(self, tensor), fields(
        image_key = %image_key,
        values = tensor.data.len()
    ))]
    pub fn execute(&self, image_key: &str, tensor: &RawTensor) -> DetectionResult<Phase1Output> {
        let phase_start = Instant::now();

        let (boxes, mut perf) = self.detector.detect(tensor)?;
        let ctx = PipelineContext::from_boxes(image_key, boxes);

        let order_start = Instant::now();
        let ordered_texts = self.clusterer.order(&ctx);
        perf.order_time = order_start.elapsed();
        perf.ordered = ordered_texts.len();

        if let Some(ref m) = self.metrics {
            m.record_ordering(ordered_texts.len());
            m.record_phase1_duration(phase_start.elapsed());
        }

        debug!(
            "✓ Phase 1: {} frames, {} texts ordered in {:.2}ms",
            ctx.frames.len(),
            ordered_texts.len(),
            phase_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Phase1Output {
            image_key: ctx.image_key,
            frame_count: ctx.frames.len(),
            ordered_texts,
            metrics: perf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::detection::TensorLayout;

    #[test]
    fn test_execute_orders_texts_inside_frame() {
        let mut config = Config::defaults();
        config.detection.model_input_size = 100;
        let config = Arc::new(config);
        let detector = Arc::new(DetectionService::new(config.clone(), None).unwrap());
        let metrics = Metrics::new();
        let phase1 = Phase1Pipeline::new(config, detector, Some(metrics.clone()));

        // anchor rows: xc, yc, w, h, frame score, text score
        let rows: [[f32; 6]; 3] = [
            [50.0, 50.0, 100.0, 100.0, 0.9, 0.0],
            [15.0, 85.0, 10.0, 10.0, 0.0, 0.8],
            [55.0, 15.0, 10.0, 10.0, 0.0, 0.8],
        ];
        let tensor = RawTensor::new(
            rows.iter().flatten().copied().collect(),
            3,
            2,
            TensorLayout::AnchorMajor,
        );

        let output = phase1.execute("page.png", &tensor).unwrap();
        assert_eq!(output.frame_count, 1);
        assert_eq!(output.ordered_texts.len(), 2);
        // upper-right text first
        assert!((output.ordered_texts[0].x1 - 0.5).abs() < 1e-6);
        assert!((output.ordered_texts[1].x1 - 0.1).abs() < 1e-6);
        assert_eq!(output.metrics.ordered, 2);
        assert_eq!(metrics.snapshot().regions_ordered, 2);
    }
}
