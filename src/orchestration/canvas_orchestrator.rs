// Canvas Orchestrator: detect -> order -> persist -> OCR for the selected image

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::core::config::Config;
use crate::core::errors::{ErrorContext, PipelineError, PipelineResult};
use crate::core::types::{ImageData, Phase2Output, Phase3Output};
use crate::phases::{Phase1Pipeline, Phase2Pipeline, Phase3Pipeline};
use crate::services::detection::DetectionService;
use crate::services::inference::{InferenceEngine, TextRecognizer};
use crate::services::layers::LayerStore;
use crate::utils::Metrics;

/// Which image the user is looking at, plus a generation counter bumped on
/// every selection
#[derive(Default)]
pub struct CurrentImage {
    generation: AtomicU64,
    key: RwLock<Option<String>>,
}

/// Selection captured at request time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTicket {
    pub generation: u64,
    pub image_key: String,
}

impl CurrentImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, image_key: &str) -> ImageTicket {
        let mut key = self.key.write();
        *key = Some(image_key.to_string());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        ImageTicket {
            generation,
            image_key: image_key.to_string(),
        }
    }

    /// Ticket for the current selection, if any
    pub fn ticket(&self) -> Option<ImageTicket> {
        let key = self.key.read();
        key.as_ref().map(|k| ImageTicket {
            generation: self.generation.load(Ordering::SeqCst),
            image_key: k.clone(),
        })
    }

    /// A ticket stays current while its image is selected, including after
    /// the same image is selected again
    pub fn is_current(&self, ticket: &ImageTicket) -> bool {
        if self.generation.load(Ordering::SeqCst) == ticket.generation {
            return true;
        }
        self.key.read().as_deref() == Some(ticket.image_key.as_str())
    }
}

/// What happened to one detection request
#[derive(Debug, Clone)]
pub enum DetectOutcome {
    Applied(Phase2Output),
    /// The selection changed while inference ran; nothing was written
    Stale,
}

/// Main canvas orchestrator
pub struct CanvasOrchestrator {
    phase1: Arc<Phase1Pipeline>,
    phase2: Arc<Phase2Pipeline>,
    phase3: Option<Arc<Phase3Pipeline>>,
    engine: Arc<dyn InferenceEngine>,
    current: CurrentImage,
    metrics: Option<Metrics>,
}

impl CanvasOrchestrator {
    /// Create new canvas orchestrator
    #[instrument(skip_all)]
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn InferenceEngine>,
        recognizer: Option<Arc<dyn TextRecognizer>>,
        store: LayerStore,
        metrics: Option<Metrics>,
    ) -> PipelineResult<Self> {
        let detector = DetectionService::new(config.clone(), metrics.clone())
            .with_image_context("<init>")?;

        let phase1 = Arc::new(Phase1Pipeline::new(
            config.clone(),
            Arc::new(detector),
            metrics.clone(),
        ));
        let phase2 = Arc::new(Phase2Pipeline::new(config, store.clone(), metrics.clone()));
        let phase3 = recognizer
            .map(|r| Arc::new(Phase3Pipeline::new(store, r, metrics.clone())));

        info!(
            "✓ Ready (OCR: {})",
            if phase3.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            phase1,
            phase2,
            phase3,
            engine,
            current: CurrentImage::new(),
            metrics,
        })
    }

    pub fn store(&self) -> &LayerStore {
        self.phase2.store()
    }

    /// Make `image_key` the current selection
    pub fn select_image(&self, image_key: &str) -> ImageTicket {
        let ticket = self.current.select(image_key);
        debug!("Selected '{}' (generation {})", image_key, ticket.generation);
        ticket
    }

    /// Detect, order and persist text regions for `image`.
    ///
    /// The selection is captured before inference. A request for an image
    /// other than the selected one is dropped up front, and if the selection
    /// moves on by the time the tensor arrives, the tensor is dropped unprocessed.
    #[instrument(skip(self, image), fields(image_key = %image.key))]
    pub async fn detect(&self, image: &ImageData) -> PipelineResult<DetectOutcome> {
        let ticket = self.current.ticket().ok_or(PipelineError::NoImageSelected)?;

        if ticket.image_key != image.key {
            debug!(
                "Skipping detection for '{}': '{}' is selected",
                image.key, ticket.image_key
            );
            self.record_stale();
            return Ok(DetectOutcome::Stale);
        }

        let tensor = self
            .engine
            .infer(image)
            .await
            .map_err(|e| PipelineError::InferenceFailed {
                image_key: image.key.clone(),
                message: format!("{:#}", e),
            })?;

        if !self.current.is_current(&ticket) {
            debug!(
                "Discarding stale detection for '{}' (generation {} superseded)",
                ticket.image_key, ticket.generation
            );
            self.record_stale();
            return Ok(DetectOutcome::Stale);
        }

        let phase1_output = self
            .phase1
            .execute(&image.key, &tensor)
            .with_image_context(&image.key)?;
        let phase2_output = self
            .phase2
            .execute(&phase1_output)
            .await
            .with_image_context(&image.key)?;

        info!(
            "Detected {} text regions on '{}' ({} layers stored)",
            phase1_output.ordered_texts.len(),
            image.key,
            phase2_output.layers.len()
        );

        Ok(DetectOutcome::Applied(phase2_output))
    }

    /// Run OCR over the stored layers of `image`; `None` when OCR is disabled
    #[instrument(skip(self, image), fields(image_key = %image.key))]
    pub async fn recognize_text(&self, image: &ImageData, overwrite: bool) -> PipelineResult<Option<Phase3Output>> {
        let phase3 = match self.phase3 {
            Some(ref p) => p,
            None => return Ok(None),
        };

        let layers = self
            .store()
            .restore(&image.key)
            .await
            .with_image_context(&image.key)?
            .unwrap_or_default();

        Ok(Some(phase3.execute(image, &layers, overwrite).await))
    }

    /// Detection followed by OCR, the usual "process this page" action
    pub async fn detect_and_recognize(
        &self,
        image: &ImageData,
    ) -> PipelineResult<(DetectOutcome, Option<Phase3Output>)> {
        let outcome = self.detect(image).await?;
        let ocr = match outcome {
            DetectOutcome::Applied(_) => self.recognize_text(image, false).await?,
            DetectOutcome::Stale => None,
        };
        Ok((outcome, ocr))
    }

    fn record_stale(&self) {
        if let Some(ref m) = self.metrics {
            m.record_stale_discard();
        }
    }
}
