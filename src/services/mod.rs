pub mod detection;
pub mod inference;
pub mod layers;
pub mod reading_order;

// Re-export commonly used services
pub use detection::DetectionService;
pub use inference::{InferenceEngine, TensorFileEngine, TextRecognizer};
pub use layers::{KvBackend, LayerStore};
pub use reading_order::{ReadingDirection, ReadingOrderClusterer};
