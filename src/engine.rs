//! Wiring of every engine component over one store.
//!
//! ```text
//! SqliteStore ─▶ TimeoutStore ─┬─▶ LayerIndex ─▶ ContextTree ─┐
//!                              └─▶ Index (3 × BitmapManager) ─┴─▶ ContextManager
//! ```

use std::sync::Arc;

use anyhow::Result;

use context_engine_core::store::Store;
use context_engine_core::Layer;

use crate::bitmap_manager::BitmapCache;
use crate::config::Config;
use crate::context::ContextManager;
use crate::db;
use crate::index::Index;
use crate::layer_index::LayerIndex;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::timeout::TimeoutStore;
use crate::tree::ContextTree;

/// Counts reported by `ctx stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EngineStats {
    pub documents: usize,
    pub layers: usize,
    pub tree_paths: usize,
    pub context_bitmaps: usize,
    pub feature_bitmaps: usize,
    pub filter_bitmaps: usize,
}

pub struct Engine {
    store: Arc<dyn Store>,
    layers: Arc<LayerIndex>,
    tree: Arc<ContextTree>,
    index: Arc<Index>,
    contexts: ContextManager,
}

impl Engine {
    /// Open the configured SQLite database, applying the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let sqlite: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let store: Arc<dyn Store> = Arc::new(TimeoutStore::new(sqlite, config.db.timeout()));
        Ok(Self::with_store(store, config).await?)
    }

    /// Build the engine over any store.
    pub async fn with_store(
        store: Arc<dyn Store>,
        config: &Config,
    ) -> context_engine_core::Result<Self> {
        let layers = Arc::new(LayerIndex::open(store.clone()).await?);
        let tree = Arc::new(ContextTree::open(store.clone(), layers.clone()).await?);
        let index = Arc::new(Index::new(
            store.clone(),
            config.index.clone(),
            BitmapCache::new(),
        ));
        let contexts = ContextManager::new(
            tree.clone(),
            index.clone(),
            config.context.clone(),
            config.url.rules(),
        )?;
        tracing::debug!(layers = layers.layer_count(), "engine ready");
        Ok(Self {
            store,
            layers,
            tree,
            index,
            contexts,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn layers(&self) -> &Arc<LayerIndex> {
        &self.layers
    }

    pub fn tree(&self) -> &Arc<ContextTree> {
        &self.tree
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    /// Remove a layer from the tree and registry, then drop its context bitmap.
    pub async fn remove_layer(&self, name: &str) -> context_engine_core::Result<Layer> {
        let layer = self.tree.remove_layer(name).await?;
        self.index.context_bitmaps().remove_bitmap(&layer.id).await?;
        Ok(layer)
    }

    pub async fn stats(&self) -> context_engine_core::Result<EngineStats> {
        Ok(EngineStats {
            documents: self.index.count().await?,
            layers: self.layers.layer_count(),
            tree_paths: self.tree.paths().len(),
            context_bitmaps: self.index.context_bitmaps().list_keys().await?.len(),
            feature_bitmaps: self.index.feature_bitmaps().list_keys().await?.len(),
            filter_bitmaps: self.index.filter_bitmaps().list_keys().await?.len(),
        })
    }
}
