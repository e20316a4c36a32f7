pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, DetectionError, ErrorContext, PipelineError, StoreError};
pub use types::{
    BBox, Direction, ImageData, Label, Layer, LayerKind, PerformanceMetrics, Phase1Output,
    Phase2Output, Phase3Output, PipelineContext, TextBox,
};
