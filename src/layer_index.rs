//! Persistent name ↔ id registry of layers.
//!
//! Layers are stored one record per id in the `layers` dataset; the
//! name → id map is rebuilt from those records at startup. Built-in
//! layers are seeded on every open and never written to the store.
//!
//! Mutations are serialized by one async mutex and only touch the
//! in-memory maps after the store write succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use context_engine_core::error::{Error, Result};
use context_engine_core::layer::ROOT_LAYER_NAME;
use context_engine_core::store::{Store, WriteOp};
use context_engine_core::url::sanitize_segment;
use context_engine_core::{Layer, LayerOptions, LayerUpdate};

pub const LAYERS_DATASET: &str = "layers";

#[derive(Default)]
struct Registry {
    by_id: HashMap<String, Layer>,
    by_name: HashMap<String, String>,
}

impl Registry {
    fn insert(&mut self, layer: Layer) {
        self.by_name.insert(layer.name.clone(), layer.id.clone());
        self.by_id.insert(layer.id.clone(), layer);
    }

    fn remove(&mut self, id: &str) -> Option<Layer> {
        let layer = self.by_id.remove(id)?;
        self.by_name.remove(&layer.name);
        Some(layer)
    }
}

/// Fold a user-typed name the same way [`Layer`] names are stored.
fn lookup_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed == ROOT_LAYER_NAME {
        return trimmed.to_string();
    }
    sanitize_segment(trimmed)
}

/// Registry of every layer, keyed by id and by unique name.
pub struct LayerIndex {
    store: Arc<dyn Store>,
    registry: RwLock<Registry>,
    write: Mutex<()>,
}

impl LayerIndex {
    /// Seed built-ins and load every stored layer.
    pub async fn open(store: Arc<dyn Store>) -> Result<Self> {
        let mut registry = Registry::default();
        for layer in Layer::builtins() {
            registry.insert(layer);
        }

        let keys = store.keys(LAYERS_DATASET).await?;
        let values = store.get_many(LAYERS_DATASET, &keys).await?;
        let mut loaded = 0usize;
        for (key, value) in keys.iter().zip(values) {
            let Some(bytes) = value else { continue };
            let layer: Layer = serde_json::from_slice(&bytes)
                .map_err(|e| Error::corrupt("layer", format!("{}: {}", key, e)))?;
            if layer.is_builtin() {
                tracing::warn!(id = %layer.id, "ignoring stored copy of built-in layer");
                continue;
            }
            if registry.by_name.contains_key(&layer.name) {
                tracing::warn!(id = %layer.id, name = %layer.name, "skipping layer with duplicate name");
                continue;
            }
            registry.insert(layer);
            loaded += 1;
        }
        tracing::debug!(loaded, "layer index opened");

        Ok(Self {
            store,
            registry: RwLock::new(registry),
            write: Mutex::new(()),
        })
    }

    /// Serialize layer writes with callers that batch layer records
    /// together with other data (the context tree).
    pub(crate) async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write.lock().await
    }

    /// Build a layer without persisting it. `None` if the name is taken.
    pub(crate) fn prepare(&self, options: LayerOptions) -> Result<Option<Layer>> {
        let layer = Layer::new(options)?;
        if self.registry.read().by_name.contains_key(&layer.name) {
            return Ok(None);
        }
        Ok(Some(layer))
    }

    pub(crate) fn put_op(layer: &Layer) -> Result<WriteOp> {
        Ok(WriteOp::put(LAYERS_DATASET, &layer.id, serde_json::to_vec(layer)?))
    }

    pub(crate) fn delete_op(layer: &Layer) -> WriteOp {
        WriteOp::delete(LAYERS_DATASET, &layer.id)
    }

    /// Publish layers whose records were committed by the caller.
    pub(crate) fn register(&self, layers: impl IntoIterator<Item = Layer>) {
        let mut registry = self.registry.write();
        for layer in layers {
            registry.insert(layer);
        }
    }

    pub(crate) fn unregister(&self, id: &str) -> Option<Layer> {
        self.registry.write().remove(id)
    }

    /// Create and persist a layer. Returns `None` if the name is already taken.
    pub async fn create_layer(&self, options: LayerOptions) -> Result<Option<Layer>> {
        let _guard = self.write_guard().await;
        let Some(layer) = self.prepare(options)? else {
            return Ok(None);
        };
        self.store.apply(vec![Self::put_op(&layer)?]).await?;
        tracing::info!(id = %layer.id, name = %layer.name, "created layer");
        self.register([layer.clone()]);
        Ok(Some(layer))
    }

    /// Rename a layer. Fails if it is locked, missing, or the new name is taken.
    pub async fn rename_layer(&self, name: &str, new_name: &str) -> Result<Layer> {
        let _guard = self.write_guard().await;
        let mut layer = self
            .get_layer(name)
            .ok_or_else(|| Error::not_found("layer", name))?;
        let old_name = layer.name.clone();
        layer.rename(new_name)?;
        if layer.name == old_name {
            return Ok(layer);
        }
        if self.registry.read().by_name.contains_key(&layer.name) {
            return Err(Error::conflict(format!("layer '{}' already exists", layer.name)));
        }

        self.store.apply(vec![Self::put_op(&layer)?]).await?;
        {
            let mut registry = self.registry.write();
            registry.by_name.remove(&old_name);
            registry.insert(layer.clone());
        }
        tracing::info!(id = %layer.id, from = %old_name, to = %layer.name, "renamed layer");
        Ok(layer)
    }

    /// Apply a partial update to a layer's metadata and bitmap lists.
    pub async fn update_layer(&self, name: &str, update: LayerUpdate) -> Result<Layer> {
        let _guard = self.write_guard().await;
        let mut layer = self
            .get_layer(name)
            .ok_or_else(|| Error::not_found("layer", name))?;
        layer.apply_update(update)?;
        self.store.apply(vec![Self::put_op(&layer)?]).await?;
        self.register([layer.clone()]);
        tracing::info!(id = %layer.id, name = %layer.name, "updated layer");
        Ok(layer)
    }

    pub fn get_layer(&self, name: &str) -> Option<Layer> {
        let registry = self.registry.read();
        let id = registry.by_name.get(&lookup_name(name))?;
        registry.by_id.get(id).cloned()
    }

    pub fn get_layer_by_id(&self, id: &str) -> Option<Layer> {
        self.registry.read().by_id.get(id).cloned()
    }

    pub fn name_to_id(&self, name: &str) -> Option<String> {
        self.registry.read().by_name.get(&lookup_name(name)).cloned()
    }

    pub fn id_to_name(&self, id: &str) -> Option<String> {
        self.registry.read().by_id.get(id).map(|l| l.name.clone())
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.registry.read().by_name.contains_key(&lookup_name(name))
    }

    /// Built-ins first, then user layers by name.
    pub fn list_layers(&self) -> Vec<Layer> {
        let mut layers: Vec<Layer> = self.registry.read().by_id.values().cloned().collect();
        layers.sort_by(|a, b| match (a.is_builtin(), b.is_builtin()) {
            (true, true) => a.id.cmp(&b.id),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => a.name.cmp(&b.name),
        });
        layers
    }

    pub fn layer_count(&self) -> usize {
        self.registry.read().by_id.len()
    }

    /// Id-keyed copy of every layer, for building tree views.
    pub fn snapshot(&self) -> HashMap<String, Layer> {
        self.registry.read().by_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_engine_core::layer::{ROOT_LAYER_ID, USER_LAYER_ID};
    use context_engine_core::store::memory::InMemoryStore;
    use context_engine_core::LayerType;

    async fn index() -> (Arc<InMemoryStore>, LayerIndex) {
        let store = Arc::new(InMemoryStore::new());
        let index = LayerIndex::open(store.clone()).await.unwrap();
        (store, index)
    }

    #[tokio::test]
    async fn test_builtins_seeded_not_persisted() {
        let (store, index) = index().await;
        assert_eq!(index.layer_count(), 5);
        assert_eq!(index.name_to_id("/").as_deref(), Some(ROOT_LAYER_ID));
        assert_eq!(index.name_to_id(".user").as_deref(), Some(USER_LAYER_ID));
        assert_eq!(index.id_to_name(ROOT_LAYER_ID).as_deref(), Some("/"));
        assert_eq!(store.len(LAYERS_DATASET), 0);
    }

    #[tokio::test]
    async fn test_create_is_probe_style() {
        let (store, index) = index().await;
        let layer = index
            .create_layer(LayerOptions::named("Work"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(layer.name, "work");
        assert!(index.create_layer(LayerOptions::named("WORK")).await.unwrap().is_none());
        assert_eq!(store.len(LAYERS_DATASET), 1);
        assert!(index.has_layer("Work"));
        assert!(index.name_to_id("missing").is_none());
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_name_map() {
        let (store, index) = index().await;
        let created = index
            .create_layer(LayerOptions {
                layer_type: Some(LayerType::Workspace),
                ..LayerOptions::named("home")
            })
            .await
            .unwrap()
            .unwrap();
        drop(index);

        let reopened = LayerIndex::open(store).await.unwrap();
        let layer = reopened.get_layer("home").unwrap();
        assert_eq!(layer.id, created.id);
        assert_eq!(layer.layer_type, LayerType::Workspace);
        assert_eq!(reopened.layer_count(), 6);
    }

    #[tokio::test]
    async fn test_locked_layers_reject_mutation() {
        let (_, index) = index().await;
        for name in ["/", ".user", ".session"] {
            assert!(matches!(
                index.rename_layer(name, "other").await,
                Err(Error::Locked { .. })
            ));
            assert!(matches!(
                index.update_layer(name, LayerUpdate::default()).await,
                Err(Error::Locked { .. })
            ));
        }
        assert!(index.get_layer("/").is_some());
    }

    #[tokio::test]
    async fn test_rename_rules() {
        let (_, index) = index().await;
        index.create_layer(LayerOptions::named("a")).await.unwrap();
        index.create_layer(LayerOptions::named("b")).await.unwrap();

        assert!(matches!(
            index.rename_layer("a", "b").await,
            Err(Error::Conflict { .. })
        ));
        assert!(index.rename_layer("zzz", "c").await.unwrap_err().is_not_found());

        let id = index.name_to_id("a").unwrap();
        let renamed = index.rename_layer("a", "C").await.unwrap();
        assert_eq!(renamed.id, id);
        assert!(!index.has_layer("a"));
        assert_eq!(index.name_to_id("c").as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_update_layer() {
        let (_, index) = index().await;
        index.create_layer(LayerOptions::named("notes")).await.unwrap();
        let updated = index
            .update_layer(
                "notes",
                LayerUpdate {
                    feature_bitmaps: Some(vec!["note".into()]),
                    color: Some(Some("#abc".into())),
                    ..LayerUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.feature_bitmaps, vec!["note"]);
        assert_eq!(index.get_layer("notes").unwrap().color.as_deref(), Some("#abc"));
        assert!(index
            .update_layer("missing", LayerUpdate::default())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_list_orders_builtins_first() {
        let (_, index) = index().await;
        index.create_layer(LayerOptions::named("zeta")).await.unwrap();
        index.create_layer(LayerOptions::named("alpha")).await.unwrap();
        let names: Vec<String> = index.list_layers().into_iter().map(|l| l.name).collect();
        assert_eq!(
            names,
            vec!["/", ".canvas", ".device", ".user", ".session", "alpha", "zeta"]
        );
    }
}
