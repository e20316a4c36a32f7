// Error types for the region pipeline
//
// One thiserror enum per concern, with Result aliases and a helper trait
// for attaching the image key when errors cross into the orchestrator.

use thiserror::Error;

/// Tensor decoding and suppression errors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Malformed tensor: expected {expected} values ({channels} channels x {anchors} anchors), got {actual}")]
    MalformedTensor {
        expected: usize,
        actual: usize,
        channels: usize,
        anchors: usize,
    },

    #[error("Invalid tensor shape: {0}")]
    InvalidTensorShape(String),

    #[error("Tensor declares {tensor_classes} classes but the class table has {table_classes}")]
    ClassTableMismatch {
        tensor_classes: usize,
        table_classes: usize,
    },

    #[error("Invalid suppression parameter: {0}")]
    InvalidParameter(String),
}

/// Layer persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No layers stored for image '{0}'")]
    NotFound(String),

    #[error("Layer {layer_id} not found for image '{image_key}'")]
    LayerNotFound { image_key: String, layer_id: String },

    #[error("Layer position {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Unsupported record version {found} (max supported {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record compression failed: {0}")]
    Compression(String),

    #[error("Storage I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Detection failed for image '{image_key}': {source}")]
    DetectionFailed {
        image_key: String,
        #[source]
        source: DetectionError,
    },

    #[error("Layer store failed for image '{image_key}': {source}")]
    StoreFailed {
        image_key: String,
        #[source]
        source: StoreError,
    },

    #[error("Inference failed for image '{image_key}': {message}")]
    InferenceFailed { image_key: String, message: String },

    #[error("No image selected")]
    NoImageSelected,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("Overlap threshold must be in [0.0, 1.0], got {0}")]
    InvalidOverlapThreshold(f32),

    #[error("Soft-NMS sigma must be > 0, got {0}")]
    InvalidSigma(f32),

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid store config: {0}")]
    InvalidStoreConfig(String),

    #[error("Environment variable {name} has invalid value '{value}'")]
    EnvVarError { name: String, value: String },
}

pub type DetectionResult<T> = Result<T, DetectionError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Attach the image key to component errors
pub trait ErrorContext<T> {
    fn with_image_context(self, image_key: &str) -> PipelineResult<T>;
}

impl<T> ErrorContext<T> for DetectionResult<T> {
    fn with_image_context(self, image_key: &str) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::DetectionFailed {
            image_key: image_key.to_string(),
            source: e,
        })
    }
}

impl<T> ErrorContext<T> for StoreResult<T> {
    fn with_image_context(self, image_key: &str) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::StoreFailed {
            image_key: image_key.to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_tensor_message() {
        let err = DetectionError::MalformedTensor {
            expected: 60,
            actual: 59,
            channels: 6,
            anchors: 10,
        };
        assert_eq!(
            err.to_string(),
            "Malformed tensor: expected 60 values (6 channels x 10 anchors), got 59"
        );
    }

    #[test]
    fn test_store_error_gets_image_context() {
        let result: StoreResult<()> = Err(StoreError::NotFound("p1.png".to_string()));
        match result.with_image_context("p1.png") {
            Err(PipelineError::StoreFailed { image_key, .. }) => assert_eq!(image_key, "p1.png"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
