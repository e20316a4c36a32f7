// Collaborator seams: the detector network and the OCR model live outside
// this crate and are reached through these traits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::types::{ImageData, TextBox};
use crate::services::detection::{RawTensor, TensorLayout};

/// Runs the detector network on one image
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, image: &ImageData) -> Result<RawTensor>;
}

/// Recognizes the text inside one normalized region of an image
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &ImageData, textbox: &TextBox) -> Result<String>;
}

/// Engine that replays a pre-computed little-endian f32 tensor from disk.
///
/// Used by the CLI to run the post-processing pipeline on exported model
/// output without linking an inference runtime.
pub struct TensorFileEngine {
    path: PathBuf,
    num_anchors: usize,
    num_classes: usize,
    layout: TensorLayout,
}

impl TensorFileEngine {
    pub fn new(path: impl AsRef<Path>, num_anchors: usize, num_classes: usize, layout: TensorLayout) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            num_anchors,
            num_classes,
            layout,
        }
    }
}

/// Decode little-endian f32 values; trailing bytes are rejected
pub fn f32_from_le_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("tensor byte length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[async_trait]
impl InferenceEngine for TensorFileEngine {
    async fn infer(&self, image: &ImageData) -> Result<RawTensor> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read tensor file {}", self.path.display()))?;
        let data = f32_from_le_bytes(&bytes)?;

        debug!(
            "Loaded {} floats for '{}' from {}",
            data.len(),
            image.key,
            self.path.display()
        );

        Ok(RawTensor::new(data, self.num_anchors, self.num_classes, self.layout))
    }
}
