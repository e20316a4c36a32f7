// Phase 2: Merge fresh detections into the persisted layer set

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::config::Config;
use crate::core::errors::StoreResult;
use crate::core::types::{BBox, Direction, Layer, Phase1Output, Phase2Output, TextBox};
use crate::services::layers::{renumber, LayerStore};
use crate::utils::Metrics;

/// Phase 2 pipeline: ordered text boxes -> persisted layers
pub struct Phase2Pipeline {
    store: LayerStore,
    merge_iou_threshold: f32,
    metrics: Option<Metrics>,
}

/// Result of merging detections with stored layers
#[derive(Debug, Clone, PartialEq)]
pub struct MergedLayers {
    pub layers: Vec<Layer>,
    pub added: usize,
    pub kept_existing: usize,
}

/// Keep every stored layer, append detections not already covered by one.
///
/// A detection is covered when its IoU with any stored text box reaches
/// `merge_iou_threshold`. Appended detections keep their reading order;
/// the combined set is renumbered.
pub fn merge_layers(existing: Option<Vec<Layer>>, ordered: &[BBox], merge_iou_threshold: f32) -> MergedLayers {
    let mut layers = existing.unwrap_or_default();
    let kept_existing = layers.len();

    let existing_boxes: Vec<BBox> = layers
        .iter()
        .filter_map(|l| l.textbox.as_ref().map(TextBox::as_bbox))
        .collect();

    let mut added = 0usize;
    for bbox in ordered {
        let covered = existing_boxes
            .iter()
            .any(|existing| existing.iou(bbox) >= merge_iou_threshold);
        if covered {
            continue;
        }

        let index = layers.len() as u32;
        layers.push(Layer::textbox(
            TextBox::from_bbox(bbox, index + 1, Direction::default()),
            index,
        ));
        added += 1;
    }

    renumber(&mut layers);

    MergedLayers {
        layers,
        added,
        kept_existing,
    }
}

impl Phase2Pipeline {
    pub fn new(config: Arc<Config>, store: LayerStore, metrics: Option<Metrics>) -> Self {
        Self {
            store,
            merge_iou_threshold: config.store.merge_iou_threshold,
            metrics,
        }
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Execute Phase 2: merge and persist in one atomic store update
    #[instrument(skip(self, phase1_output), fields(
        image_key = %phase1_output.image_key,
        texts = phase1_output.ordered_texts.len()
    ))]
    pub async fn execute(&self, phase1_output: &Phase1Output) -> StoreResult<Phase2Output> {
        let phase_start = Instant::now();
        let threshold = self.merge_iou_threshold;
        let ordered = phase1_output.ordered_texts.as_slice();

        let mut added = 0usize;
        let mut kept_existing = 0usize;
        let layers = self
            .store
            .update_or_create(&phase1_output.image_key, |existing| {
                let merged = merge_layers(existing, ordered, threshold);
                added = merged.added;
                kept_existing = merged.kept_existing;
                merged.layers
            })
            .await?;

        if let Some(ref m) = self.metrics {
            m.record_phase2_duration(phase_start.elapsed());
        }

        debug!(
            "✓ Phase 2: {} layers stored ({} kept, {} added)",
            layers.len(),
            kept_existing,
            added
        );

        Ok(Phase2Output {
            image_key: phase1_output.image_key.clone(),
            layers,
            added,
            kept_existing,
        })
    }
}
