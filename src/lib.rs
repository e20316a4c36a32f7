// Library exports for the manga page layout pipeline:
// detector output -> boxes -> reading order -> persisted layers

pub mod core;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{ConfigError, DetectionError, PipelineError, StoreError},
    types::{
        BBox, Direction, ImageData, Label, Layer, PerformanceMetrics, Phase1Output, Phase2Output,
        Phase3Output, PipelineContext, TextBox,
    },
};

pub use orchestration::{CanvasOrchestrator, DetectOutcome, ImageTicket};

pub use services::{
    DetectionService, InferenceEngine, LayerStore, ReadingDirection, ReadingOrderClusterer,
    TextRecognizer,
};

pub use utils::Metrics;
