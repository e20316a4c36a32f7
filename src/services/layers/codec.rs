// Record format for persisted layer sets.
//
// Plain:      {"version":1,"layers":[...]}
// Compressed: "gz:" + base64(gzip(plain))
// Legacy:     bare JSON array of layers, read as version 0

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

use super::store::renumber;
use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::{Layer, LayerKind, TextBox};

pub const RECORD_VERSION: u32 = 1;

const GZIP_PREFIX: &str = "gz:";

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    layers: &'a [Layer],
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    #[serde(default)]
    layers: Vec<Layer>,
}

/// Layer as written by the pre-envelope app. Its ids are short strings or
/// numbers, and non-textbox layers may be present.
#[derive(Deserialize)]
struct LegacyLayer {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    index: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    textbox: Option<TextBox>,
}

impl LegacyLayer {
    /// Stable across reads of the same record, so ids handed out by
    /// `restore` still resolve in a later mutation
    fn derived_id(&self, position: usize) -> Uuid {
        Uuid::from_u128(xxh3_128(format!("{}#{}", self.id, position).as_bytes()))
    }

    fn into_layer(self, position: usize) -> Option<Layer> {
        if !self.kind.eq_ignore_ascii_case("textbox") {
            return None;
        }
        let id = self.derived_id(position);
        let textbox = self.textbox?;
        let name = if !self.name.is_empty() {
            self.name
        } else if !textbox.text.is_empty() {
            textbox.text.clone()
        } else {
            "Text...".to_string()
        };
        Some(Layer {
            id,
            kind: LayerKind::Textbox,
            index: self.index,
            name,
            textbox: Some(textbox),
        })
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

/// Decoded record plus the version it was written with
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub version: u32,
    pub layers: Vec<Layer>,
}

pub fn encode_record(layers: &[Layer], compress: bool) -> StoreResult<String> {
    let json = serde_json::to_string(&EnvelopeRef {
        version: RECORD_VERSION,
        layers,
    })?;

    if !compress {
        return Ok(json);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(json.as_bytes())
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    let gz = encoder
        .finish()
        .map_err(|e| StoreError::Compression(e.to_string()))?;

    Ok(format!("{}{}", GZIP_PREFIX, STANDARD.encode(gz)))
}

pub fn decode_record(raw: &str) -> StoreResult<DecodedRecord> {
    let json = match raw.strip_prefix(GZIP_PREFIX) {
        Some(encoded) => gunzip(encoded)?,
        None => raw.to_string(),
    };

    let trimmed = json.trim_start();
    if trimmed.starts_with('[') {
        return decode_legacy(trimmed);
    }

    let header: VersionHeader = serde_json::from_str(trimmed)?;
    if header.version > RECORD_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: header.version,
            supported: RECORD_VERSION,
        });
    }

    let envelope: Envelope = serde_json::from_str(trimmed)?;
    Ok(DecodedRecord {
        version: envelope.version,
        layers: envelope.layers,
    })
}

/// Bare array records get derived ids and dense numbering
fn decode_legacy(json: &str) -> StoreResult<DecodedRecord> {
    let mut legacy: Vec<LegacyLayer> = serde_json::from_str(json)?;
    legacy.sort_by_key(|l| l.index);

    let total = legacy.len();
    let mut layers: Vec<Layer> = legacy
        .into_iter()
        .enumerate()
        .filter_map(|(position, layer)| layer.into_layer(position))
        .collect();
    renumber(&mut layers);

    debug!(
        "Upgraded legacy record: {} textbox layers ({} skipped)",
        layers.len(),
        total - layers.len()
    );
    Ok(DecodedRecord { version: 0, layers })
}

fn gunzip(encoded: &str) -> StoreResult<String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| StoreError::Compression(format!("base64: {}", e)))?;

    let mut json = String::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_string(&mut json)
        .map_err(|e| StoreError::Compression(format!("gzip: {}", e)))?;
    Ok(json)
}
