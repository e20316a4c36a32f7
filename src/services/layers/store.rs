use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::backend::{FileBackend, KvBackend, MemoryBackend};
use super::codec::{decode_record, encode_record};
use crate::core::config::{Config, StoreBackendKind};
use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::{BBox, Layer, TextBox};
use crate::utils::Metrics;

/// Persisted layer sets, one record per image.
///
/// Every mutator is a read-modify-write of the whole record under a
/// per-image async lock, so concurrent edits on one image serialize while
/// different images proceed in parallel.
#[derive(Clone)]
pub struct LayerStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn KvBackend>,
    compress: bool,
    locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: Option<Metrics>,
}

/// Held per-image lock. The table entry is dropped with the last holder.
struct KeyLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // waiters hold their own clone of the mutex
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Record key for an image
pub fn record_key(image_key: &str) -> String {
    format!("canvas:{}", image_key)
}

/// Dense 0-based `index`, reading rank `order = index + 1`
pub fn renumber(layers: &mut [Layer]) {
    for (i, layer) in layers.iter_mut().enumerate() {
        layer.index = i as u32;
        if let Some(textbox) = layer.textbox.as_mut() {
            textbox.order = i as u32 + 1;
        }
    }
}

impl LayerStore {
    pub fn new(backend: Arc<dyn KvBackend>, compress: bool, metrics: Option<Metrics>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                compress,
                locks: DashMap::new(),
                metrics,
            }),
        }
    }

    /// Uncompressed in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), false, None)
    }

    pub async fn from_config(config: &Config, metrics: Option<Metrics>) -> StoreResult<Self> {
        let backend: Arc<dyn KvBackend> = match config.store.backend {
            StoreBackendKind::Memory => Arc::new(MemoryBackend::new()),
            StoreBackendKind::File => Arc::new(FileBackend::new(config.store_dir()).await?),
        };
        debug!(
            "Layer store: {:?} backend, compression {}",
            config.store.backend,
            if config.compress_records() { "on" } else { "off" }
        );
        Ok(Self::new(backend, config.compress_records(), metrics))
    }

    /// Persist `layers` exactly as given. An empty sequence writes nothing.
    #[instrument(skip(self, layers), fields(count = layers.len()))]
    pub async fn serialize(&self, image_key: &str, layers: &[Layer]) -> StoreResult<()> {
        if layers.is_empty() {
            debug!("Nothing to store for '{}'", image_key);
            return Ok(());
        }

        let _guard = self.lock(image_key).await;
        self.write(image_key, layers).await
    }

    /// Stored layers sorted by index, or `None` if the image has no record
    pub async fn restore(&self, image_key: &str) -> StoreResult<Option<Vec<Layer>>> {
        self.read(image_key).await
    }

    /// Insert `layer` at `position` (0..=len)
    pub async fn insert(&self, image_key: &str, layer: Layer, position: usize) -> StoreResult<Layer> {
        self.mutate(image_key, |layers| {
            if position > layers.len() {
                return Err(StoreError::IndexOutOfRange {
                    index: position,
                    len: layers.len(),
                });
            }
            layers.insert(position, layer);
            renumber(layers);
            Ok(layers[position].clone())
        })
        .await
    }

    pub async fn delete(&self, image_key: &str, layer_id: Uuid) -> StoreResult<Layer> {
        self.mutate(image_key, |layers| {
            let position = find_layer(layers, image_key, layer_id)?;
            let removed = layers.remove(position);
            renumber(layers);
            Ok(removed)
        })
        .await
    }

    /// Move the layer at `from` so it ends up at `to`
    pub async fn reorder(&self, image_key: &str, from: usize, to: usize) -> StoreResult<()> {
        self.mutate(image_key, |layers| {
            let len = layers.len();
            for index in [from, to] {
                if index >= len {
                    return Err(StoreError::IndexOutOfRange { index, len });
                }
            }
            let moved = layers.remove(from);
            layers.insert(to, moved);
            renumber(layers);
            Ok(())
        })
        .await
    }

    /// Set the recognized text of one layer
    pub async fn update_text(&self, image_key: &str, layer_id: Uuid, text: &str) -> StoreResult<()> {
        self.mutate(image_key, |layers| {
            let position = find_layer(layers, image_key, layer_id)?;
            let layer = &mut layers[position];
            let textbox = textbox_mut(layer, image_key)?;
            textbox.text = text.to_string();
            if !text.is_empty() {
                layer.name = text.to_string();
            }
            Ok(())
        })
        .await
    }

    pub async fn update_translation(
        &self,
        image_key: &str,
        layer_id: Uuid,
        translated_text: Option<String>,
    ) -> StoreResult<()> {
        self.mutate(image_key, |layers| {
            let position = find_layer(layers, image_key, layer_id)?;
            textbox_mut(&mut layers[position], image_key)?.translated_text = translated_text;
            Ok(())
        })
        .await
    }

    /// Replace a layer's geometry; its position in the sequence is kept
    pub async fn update_bbox(&self, image_key: &str, layer_id: Uuid, bbox: &BBox) -> StoreResult<()> {
        self.mutate(image_key, |layers| {
            let position = find_layer(layers, image_key, layer_id)?;
            let textbox = textbox_mut(&mut layers[position], image_key)?;
            textbox.x1 = bbox.x1;
            textbox.y1 = bbox.y1;
            textbox.x2 = bbox.x2;
            textbox.y2 = bbox.y2;
            Ok(())
        })
        .await
    }

    /// Drop the whole record for an image; returns whether one existed
    pub async fn remove(&self, image_key: &str) -> StoreResult<bool> {
        let _guard = self.lock(image_key).await;
        let existed = self.inner.backend.delete(&record_key(image_key)).await?;
        if let Some(ref m) = self.inner.metrics {
            m.record_store_write();
        }
        debug!("Removed layers for '{}' (existed: {})", image_key, existed);
        Ok(existed)
    }

    /// Atomic read-modify-write that also works on images without a record.
    ///
    /// `f` receives the stored layers (sorted by index) or `None`, and
    /// returns the full replacement set. An empty result writes nothing.
    pub async fn update_or_create<F>(&self, image_key: &str, f: F) -> StoreResult<Vec<Layer>>
    where
        F: FnOnce(Option<Vec<Layer>>) -> Vec<Layer> + Send,
    {
        let _guard = self.lock(image_key).await;
        let existing = self.read(image_key).await?;
        let layers = f(existing);
        if !layers.is_empty() {
            self.write(image_key, &layers).await?;
        }
        Ok(layers)
    }

    async fn mutate<F, R>(&self, image_key: &str, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Vec<Layer>) -> StoreResult<R>,
    {
        let _guard = self.lock(image_key).await;
        let mut layers = self
            .read(image_key)
            .await?
            .ok_or_else(|| StoreError::NotFound(image_key.to_string()))?;

        let result = f(&mut layers)?;
        self.write(image_key, &layers).await?;
        Ok(result)
    }

    async fn lock(&self, image_key: &str) -> KeyLock<'_> {
        let mutex = self
            .inner
            .locks
            .entry(image_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyLock {
            locks: &self.inner.locks,
            key: image_key.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    async fn read(&self, image_key: &str) -> StoreResult<Option<Vec<Layer>>> {
        if let Some(ref m) = self.inner.metrics {
            m.record_store_read();
        }

        let raw = match self.inner.backend.get(&record_key(image_key)).await? {
            Some(raw) => raw,
            None => {
                if let Some(ref m) = self.inner.metrics {
                    m.record_store_miss();
                }
                return Ok(None);
            }
        };

        let record = decode_record(&raw)?;
        let mut layers = record.layers;
        layers.sort_by_key(|l| l.index);
        Ok(Some(layers))
    }

    async fn write(&self, image_key: &str, layers: &[Layer]) -> StoreResult<()> {
        let encoded = encode_record(layers, self.inner.compress)?;
        self.inner
            .backend
            .put(&record_key(image_key), encoded)
            .await?;

        if let Some(ref m) = self.inner.metrics {
            m.record_store_write();
        }
        debug!("✓ Stored {} layers for '{}'", layers.len(), image_key);
        Ok(())
    }
}

fn find_layer(layers: &[Layer], image_key: &str, layer_id: Uuid) -> StoreResult<usize> {
    layers
        .iter()
        .position(|l| l.id == layer_id)
        .ok_or_else(|| StoreError::LayerNotFound {
            image_key: image_key.to_string(),
            layer_id: layer_id.to_string(),
        })
}

fn textbox_mut<'a>(layer: &'a mut Layer, image_key: &str) -> StoreResult<&'a mut TextBox> {
    let layer_id = layer.id;
    layer.textbox.as_mut().ok_or_else(|| StoreError::LayerNotFound {
        image_key: image_key.to_string(),
        layer_id: layer_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Direction, Label};

    fn layers(n: u32) -> Vec<Layer> {
        (0..n)
            .map(|i| {
                let x = 0.1 * i as f32;
                let bbox = BBox::new(x, 0.1, x + 0.05, 0.4, Label::Text, 0.9);
                Layer::textbox(TextBox::from_bbox(&bbox, i + 1, Direction::Vertical), i)
            })
            .collect()
    }

    fn orders(layers: &[Layer]) -> Vec<(u32, u32)> {
        layers
            .iter()
            .map(|l| (l.index, l.textbox.as_ref().unwrap().order))
            .collect()
    }

    #[tokio::test]
    async fn test_serialize_restore_round_trip() {
        for compress in [false, true] {
            let store = LayerStore::new(Arc::new(MemoryBackend::new()), compress, None);
            let original = layers(3);

            store.serialize("page.png", &original).await.unwrap();
            let restored = store.restore("page.png").await.unwrap().unwrap();

            assert_eq!(restored.len(), 3);
            for (a, b) in original.iter().zip(&restored) {
                assert!(a.same_position_and_box(b));
            }
        }
    }

    #[tokio::test]
    async fn test_restore_sorts_by_index() {
        let store = LayerStore::in_memory();
        let mut shuffled = layers(3);
        shuffled.reverse();

        store.serialize("p", &shuffled).await.unwrap();
        let restored = store.restore("p").await.unwrap().unwrap();
        assert_eq!(restored.iter().map(|l| l.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_empty_serialize_keeps_prior_value() {
        let store = LayerStore::in_memory();
        store.serialize("p", &layers(2)).await.unwrap();
        store.serialize("p", &[]).await.unwrap();
        assert_eq!(store.restore("p").await.unwrap().unwrap().len(), 2);

        store.serialize("fresh", &[]).await.unwrap();
        assert!(store.restore("fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutators_on_missing_key() {
        let store = LayerStore::in_memory();
        let err = store.update_text("missing", Uuid::new_v4(), "x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(matches!(
            store.reorder("missing", 0, 0).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_delete_renumber() {
        let store = LayerStore::in_memory();
        store.serialize("p", &layers(2)).await.unwrap();

        let bbox = BBox::new(0.5, 0.5, 0.6, 0.6, Label::Text, 1.0);
        let inserted = store
            .insert("p", Layer::textbox(TextBox::from_bbox(&bbox, 99, Direction::Horizontal), 99), 0)
            .await
            .unwrap();
        assert_eq!(inserted.index, 0);
        assert_eq!(inserted.textbox.as_ref().unwrap().order, 1);

        let after_insert = store.restore("p").await.unwrap().unwrap();
        assert_eq!(orders(&after_insert), vec![(0, 1), (1, 2), (2, 3)]);

        store.delete("p", after_insert[1].id).await.unwrap();
        let after_delete = store.restore("p").await.unwrap().unwrap();
        assert_eq!(orders(&after_delete), vec![(0, 1), (1, 2)]);
        assert_eq!(after_delete[0].id, inserted.id);

        assert!(matches!(
            store.insert("p", layers(1).remove(0), 5).await,
            Err(StoreError::IndexOutOfRange { index: 5, len: 2 })
        ));
        assert!(matches!(
            store.delete("p", Uuid::new_v4()).await,
            Err(StoreError::LayerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_reorder_moves_and_renumbers() {
        let store = LayerStore::in_memory();
        let original = layers(3);
        store.serialize("p", &original).await.unwrap();

        store.reorder("p", 0, 2).await.unwrap();
        let reordered = store.restore("p").await.unwrap().unwrap();
        let ids: Vec<Uuid> = reordered.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![original[1].id, original[2].id, original[0].id]);
        assert_eq!(orders(&reordered), vec![(0, 1), (1, 2), (2, 3)]);

        assert!(matches!(
            store.reorder("p", 0, 3).await,
            Err(StoreError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[tokio::test]
    async fn test_update_text_is_idempotent() {
        let store = LayerStore::in_memory();
        let original = layers(2);
        store.serialize("p", &original).await.unwrap();

        store.update_text("p", original[1].id, "セリフ").await.unwrap();
        let once = store.restore("p").await.unwrap().unwrap();
        store.update_text("p", original[1].id, "セリフ").await.unwrap();
        let twice = store.restore("p").await.unwrap().unwrap();

        assert_eq!(once, twice);
        assert_eq!(once[1].textbox.as_ref().unwrap().text, "セリフ");
        assert_eq!(once[1].name, "セリフ");
    }

    #[tokio::test]
    async fn test_update_translation_and_bbox_keep_order() {
        let store = LayerStore::in_memory();
        let original = layers(2);
        store.serialize("p", &original).await.unwrap();

        store
            .update_translation("p", original[0].id, Some("Hey!".to_string()))
            .await
            .unwrap();
        let moved = BBox::new(0.7, 0.7, 0.9, 0.95, Label::Text, 1.0);
        store.update_bbox("p", original[0].id, &moved).await.unwrap();

        let restored = store.restore("p").await.unwrap().unwrap();
        let tb = restored[0].textbox.as_ref().unwrap();
        assert_eq!(restored[0].id, original[0].id);
        assert_eq!(tb.translated_text.as_deref(), Some("Hey!"));
        assert_eq!((tb.x1, tb.y1, tb.x2, tb.y2), (0.7, 0.7, 0.9, 0.95));
        assert_eq!(tb.order, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_all_land() {
        let store = LayerStore::in_memory();
        let original = layers(8);
        store.serialize("p", &original).await.unwrap();

        let updates = original.iter().enumerate().map(|(i, layer)| {
            let store = store.clone();
            let id = layer.id;
            async move { store.update_text("p", id, &format!("line {}", i)).await }
        });
        for result in futures::future::join_all(updates).await {
            result.unwrap();
        }

        let restored = store.restore("p").await.unwrap().unwrap();
        for (i, layer) in restored.iter().enumerate() {
            assert_eq!(layer.textbox.as_ref().unwrap().text, format!("line {}", i));
        }
        assert!(store.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow() {
        let store = LayerStore::in_memory();
        for page in 0..16 {
            let key = format!("page-{}", page);
            store.serialize(&key, &layers(2)).await.unwrap();
            store.reorder(&key, 0, 1).await.unwrap();
            store.remove(&key).await.unwrap();
        }
        assert!(store.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_metrics() {
        let metrics = Metrics::new();
        let store = LayerStore::new(Arc::new(MemoryBackend::new()), true, Some(metrics.clone()));

        assert!(store.restore("p").await.unwrap().is_none());
        store.serialize("p", &layers(1)).await.unwrap();
        assert!(store.remove("p").await.unwrap());
        assert!(!store.remove("p").await.unwrap());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.store_reads, 1);
        assert_eq!(snapshot.store_misses, 1);
        assert_eq!(snapshot.store_writes, 3);
    }

    #[tokio::test]
    async fn test_legacy_record_accepts_mutations() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .put(
                &record_key("old.png"),
                r#"[{"id":"k3j9a8x","type":"textbox","index":0,"name":"Text...","textbox":
                    {"order":1,"x1":0.1,"y1":0.1,"x2":0.2,"y2":0.3}}]"#.to_string(),
            )
            .await
            .unwrap();
        let store = LayerStore::new(backend, false, None);

        let restored = store.restore("old.png").await.unwrap().unwrap();
        store.update_text("old.png", restored[0].id, "こんにちは").await.unwrap();

        let updated = store.restore("old.png").await.unwrap().unwrap();
        assert_eq!(updated[0].id, restored[0].id);
        assert_eq!(updated[0].textbox.as_ref().unwrap().text, "こんにちは");
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::defaults();
        config.store.backend = StoreBackendKind::File;
        config.store.store_dir = dir.path().display().to_string();

        let original = layers(3);
        LayerStore::from_config(&config, None)
            .await
            .unwrap()
            .serialize("chapter/1.png", &original)
            .await
            .unwrap();

        let reopened = LayerStore::from_config(&config, None).await.unwrap();
        let restored = reopened.restore("chapter/1.png").await.unwrap().unwrap();
        assert_eq!(restored, original);
    }
}
