// Command-line entry point: run exported detector output through the layout pipeline

use manga_layout::{
    core::Config,
    orchestration::{CanvasOrchestrator, DetectOutcome},
    services::{LayerStore, TensorFileEngine},
    utils::Metrics,
    ImageData,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

const USAGE: &str = "usage: manga-layout <tensor.f32> <image-key> [--metrics]";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (tensor_path, image_key) = match (args.first(), args.get(1)) {
        (Some(path), Some(key)) => (path.clone(), key.clone()),
        _ => anyhow::bail!(USAGE),
    };
    let print_metrics = args.iter().skip(2).any(|a| a == "--metrics");

    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging; stdout is reserved for the layer JSON
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "manga_layout={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Config: classes={:?} layout={:?} suppression={:?} model={}px direction={:?} store={:?}",
        config.class_names(),
        config.detection.layout,
        config.detection.suppression,
        config.model_input_size(),
        config.reading_direction(),
        config.store.backend
    );

    let metrics = Metrics::new();

    let engine = Arc::new(TensorFileEngine::new(
        &tensor_path,
        config.detection.num_anchors,
        config.class_names().len(),
        config.detection.layout,
    ));
    let store = LayerStore::from_config(&config, Some(metrics.clone()))
        .await
        .context("Failed to open layer store")?;

    let orchestrator = CanvasOrchestrator::new(config.clone(), engine, None, store.clone(), Some(metrics.clone()))?;

    let image = ImageData {
        key: image_key.clone(),
        image_bytes: Arc::new(Vec::new()),
        width: 0,
        height: 0,
    };

    orchestrator.select_image(&image_key);
    let layers = match orchestrator.detect(&image).await? {
        DetectOutcome::Applied(output) => {
            info!(
                "✓ {} layers for '{}' ({} new, {} kept)",
                output.layers.len(),
                image_key,
                output.added,
                output.kept_existing
            );
            output.layers
        }
        DetectOutcome::Stale => {
            warn!("Selection changed during inference; falling back to stored layers");
            store.restore(&image_key).await?.unwrap_or_default()
        }
    };

    println!("{}", serde_json::to_string_pretty(&layers)?);

    if print_metrics {
        eprintln!("{}", metrics.to_prometheus());
    }

    Ok(())
}
