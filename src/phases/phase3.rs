// Phase 3: OCR fan-out over stored text layers

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::core::types::{ImageData, Layer, Phase3Output};
use crate::services::detection::to_image_pixels;
use crate::services::inference::TextRecognizer;
use crate::services::layers::LayerStore;
use crate::utils::Metrics;

/// Phase 3 pipeline: recognize text per layer and merge it back by id
pub struct Phase3Pipeline {
    store: LayerStore,
    recognizer: Arc<dyn TextRecognizer>,
    metrics: Option<Metrics>,
}

impl Phase3Pipeline {
    pub fn new(store: LayerStore, recognizer: Arc<dyn TextRecognizer>, metrics: Option<Metrics>) -> Self {
        Self {
            store,
            recognizer,
            metrics,
        }
    }

    /// Execute Phase 3
    ///
    /// One recognition per text layer runs concurrently; each result is
    /// applied by layer id, so completion order does not matter. Layers that
    /// already carry text are skipped unless `overwrite` is set. A failed
    /// region, or one that covers no whole pixel of the image, is logged and
    /// left unchanged.
    #[instrument(skip(self, image, layers), fields(
        image_key = %image.key,
        layers = layers.len()
    ))]
    pub async fn execute(&self, image: &ImageData, layers: &[Layer], overwrite: bool) -> Phase3Output {
        let phase_start = Instant::now();

        let tasks = layers
            .iter()
            .filter_map(|layer| layer.textbox.as_ref().map(|tb| (layer.id, tb)))
            .filter(|(_, tb)| overwrite || tb.text.is_empty())
            .map(|(layer_id, textbox)| async move {
                // zero-size images leave cropping to the recognizer
                if image.width > 0 && image.height > 0 {
                    let crop = to_image_pixels(textbox, image.width, image.height);
                    if crop.width == 0 || crop.height == 0 {
                        return Err(format!("empty crop at ({}, {})", crop.x, crop.y));
                    }
                    trace!("Crop {}x{} at ({}, {})", crop.width, crop.height, crop.x, crop.y);
                }
                let text = self
                    .recognizer
                    .recognize(image, textbox)
                    .await
                    .map_err(|e| format!("recognition: {:#}", e))?;
                self.store
                    .update_text(&image.key, layer_id, &text)
                    .await
                    .map_err(|e| format!("store: {}", e))?;
                Ok::<_, String>(layer_id)
            });

        let results = join_all(tasks).await;

        let mut output = Phase3Output {
            image_key: image.key.clone(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(_) => {
                    output.updated += 1;
                    if let Some(ref m) = self.metrics {
                        m.record_ocr_update();
                    }
                }
                Err(e) => {
                    output.failed += 1;
                    warn!("OCR skipped a region of '{}': {}", image.key, e);
                    if let Some(ref m) = self.metrics {
                        m.record_ocr_failure();
                    }
                }
            }
        }

        if let Some(ref m) = self.metrics {
            m.record_phase3_duration(phase_start.elapsed());
        }

        debug!(
            "✓ Phase 3: {} regions recognized, {} failed in {:.2}ms",
            output.updated,
            output.failed,
            phase_start.elapsed().as_secs_f64() * 1000.0
        );

        output
    }
}
