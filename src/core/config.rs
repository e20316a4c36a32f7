use crate::core::errors::ConfigError;
use crate::core::types::Label;
use crate::services::detection::{SuppressionPolicy, TensorLayout};
use crate::services::reading_order::ReadingDirection;
use std::env;
use std::path::Path;
use tracing::Level;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: Level,
}

/// Detection post-processing configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub num_anchors: usize,
    pub class_names: Vec<Label>,
    pub layout: TensorLayout,
    /// Square model input resolution (640 for YOLOv8, 1024 for the comic detector)
    pub model_input_size: u32,
    pub suppression: SuppressionPolicy,
    pub overlap_threshold: f32,
    pub sigma: f32,
    /// Padding applied by the normalization post-pass, in model pixels
    pub padding: f32,
}

/// Reading order configuration
#[derive(Debug, Clone)]
pub struct OrderingConfig {
    pub reading_direction: ReadingDirection,
}

/// Where layer records live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Memory,
    File,
}

/// Layer store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub store_dir: String,
    pub compress: bool,
    /// Minimum IoU between a fresh detection and an existing layer for the
    /// detection to count as already covered by the user's edits
    pub merge_iou_threshold: f32,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub detection: DetectionConfig,
    pub ordering: OrderingConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults for the two-class frame/text detector
    pub fn defaults() -> Self {
        Self {
            logging: LoggingConfig {
                log_level: Level::INFO,
            },
            detection: DetectionConfig {
                confidence_threshold: 0.1,
                num_anchors: 8400,
                class_names: vec![Label::Frame, Label::Text],
                layout: TensorLayout::ChannelMajor,
                model_input_size: 640,
                suppression: SuppressionPolicy::Soft,
                overlap_threshold: 0.4,
                sigma: 0.5,
                padding: 0.0,
            },
            ordering: OrderingConfig {
                reading_direction: ReadingDirection::RightToLeft,
            },
            store: StoreConfig {
                backend: StoreBackendKind::Memory,
                store_dir: ".layers".to_string(),
                compress: true,
                merge_iou_threshold: 0.5,
            },
        }
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let defaults = Self::defaults();

        // Parse log level
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(defaults.logging.log_level);

        let class_names = env::var("CLASS_NAMES")
            .ok()
            .map(|names| {
                names
                    .split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(Label::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or(defaults.detection.class_names);

        let layout = match env::var("TENSOR_LAYOUT") {
            Ok(value) => match value.trim().to_lowercase().as_str() {
                "channel_major" | "channel-major" => TensorLayout::ChannelMajor,
                "anchor_major" | "anchor-major" => TensorLayout::AnchorMajor,
                _ => return Err(env_error("TENSOR_LAYOUT", value)),
            },
            Err(_) => defaults.detection.layout,
        };

        let suppression = match env::var("SUPPRESSION") {
            Ok(value) => match value.trim().to_lowercase().as_str() {
                "hard" => SuppressionPolicy::Hard,
                "soft" => SuppressionPolicy::Soft,
                _ => return Err(env_error("SUPPRESSION", value)),
            },
            Err(_) => defaults.detection.suppression,
        };

        let reading_direction = match env::var("READING_DIRECTION") {
            Ok(value) => match value.trim().to_lowercase().as_str() {
                "rtl" | "right_to_left" => ReadingDirection::RightToLeft,
                "ltr" | "left_to_right" => ReadingDirection::LeftToRight,
                _ => return Err(env_error("READING_DIRECTION", value)),
            },
            Err(_) => defaults.ordering.reading_direction,
        };

        let backend = match env::var("LAYER_STORE_BACKEND") {
            Ok(value) => match value.trim().to_lowercase().as_str() {
                "memory" => StoreBackendKind::Memory,
                "file" => StoreBackendKind::File,
                _ => return Err(env_error("LAYER_STORE_BACKEND", value)),
            },
            Err(_) => defaults.store.backend,
        };

        Ok(Self {
            logging: LoggingConfig { log_level },
            detection: DetectionConfig {
                confidence_threshold: env::var("CONFIDENCE_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.detection.confidence_threshold),
                num_anchors: env::var("NUM_ANCHORS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.detection.num_anchors),
                class_names,
                layout,
                model_input_size: env::var("MODEL_INPUT_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.detection.model_input_size),
                suppression,
                overlap_threshold: env::var("OVERLAP_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.detection.overlap_threshold),
                sigma: env::var("SOFT_NMS_SIGMA")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.detection.sigma),
                padding: env::var("BOX_PADDING")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.detection.padding),
            },
            ordering: OrderingConfig { reading_direction },
            store: StoreConfig {
                backend,
                store_dir: env::var("LAYER_STORE_DIR")
                    .unwrap_or(defaults.store.store_dir),
                compress: env::var("LAYER_STORE_COMPRESS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.store.compress),
                merge_iou_threshold: env::var("MERGE_IOU_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.store.merge_iou_threshold),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let detection = &self.detection;

        if !(0.0..=1.0).contains(&detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                detection.confidence_threshold,
            ));
        }

        if !(0.0..=1.0).contains(&detection.overlap_threshold) {
            return Err(ConfigError::InvalidOverlapThreshold(detection.overlap_threshold));
        }

        if !(detection.sigma > 0.0) {
            return Err(ConfigError::InvalidSigma(detection.sigma));
        }

        if detection.num_anchors == 0 {
            return Err(ConfigError::InvalidDetectionConfig(
                "num_anchors must be > 0".to_string(),
            ));
        }

        if detection.class_names.is_empty() {
            return Err(ConfigError::InvalidDetectionConfig(
                "class table must name at least one class".to_string(),
            ));
        }

        if !(32..=4096).contains(&detection.model_input_size) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "model_input_size must be between 32 and 4096, got {}",
                detection.model_input_size
            )));
        }

        if detection.padding < 0.0 || !detection.padding.is_finite() {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "padding must be a finite value >= 0, got {}",
                detection.padding
            )));
        }

        if !(0.0..=1.0).contains(&self.store.merge_iou_threshold) {
            return Err(ConfigError::InvalidStoreConfig(format!(
                "merge_iou_threshold must be between 0.0 and 1.0, got {}",
                self.store.merge_iou_threshold
            )));
        }

        // Validate store directory parent exists
        if self.store.backend == StoreBackendKind::File {
            let store_path = Path::new(&self.store.store_dir);
            if let Some(parent) = store_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidStoreConfig(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn log_level(&self) -> Level {
        self.logging.log_level
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.detection.confidence_threshold
    }

    pub fn overlap_threshold(&self) -> f32 {
        self.detection.overlap_threshold
    }

    pub fn sigma(&self) -> f32 {
        self.detection.sigma
    }

    pub fn model_input_size(&self) -> u32 {
        self.detection.model_input_size
    }

    pub fn class_names(&self) -> &[Label] {
        &self.detection.class_names
    }

    pub fn reading_direction(&self) -> ReadingDirection {
        self.ordering.reading_direction
    }

    pub fn store_dir(&self) -> &str {
        &self.store.store_dir
    }

    pub fn compress_records(&self) -> bool {
        self.store.compress
    }
}

fn env_error(name: &str, value: String) -> ConfigError {
    ConfigError::EnvVarError {
        name: name.to_string(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.class_names(), &[Label::Frame, Label::Text]);
        assert_eq!(config.detection.suppression, SuppressionPolicy::Soft);
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = Config::defaults();
        config.detection.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));

        let mut config = Config::defaults();
        config.detection.sigma = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSigma(_))));

        let mut config = Config::defaults();
        config.detection.class_names.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDetectionConfig(_))
        ));
    }
}
