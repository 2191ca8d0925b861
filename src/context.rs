//! Per-session contexts.
//!
//! A [`Context`] tracks a current url and the tag ids derived from it:
//!
//! - `context_array`: one layer id per path segment, in path order
//! - `feature_array`: union of the feature bitmap ids of those layers
//! - `filter_array`: union of their filter bitmap ids
//!
//! Document operations default their context/feature/filter arguments
//! to these arrays, which is all "current working context" means. The
//! arrays are shared handles rebuilt in place, so holders of a handle see
//! every url change.
//!
//! [`ContextManager`] creates and tracks live contexts, up to a limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use context_engine_core::error::{Error, Result};
use context_engine_core::{Document, DocumentUpdate, Layer, Url, UrlRules};

use crate::config::ContextConfig;
use crate::events::{ContextEvent, ContextEventKind, EventSender};
use crate::index::Index;
use crate::tree::ContextTree;

/// A tag-id list shared between a context and its observers.
pub type SharedIds = Arc<RwLock<Vec<String>>>;

fn replace(target: &SharedIds, values: Vec<String>) {
    let mut guard = target.write();
    guard.clear();
    guard.extend(values);
}

fn union_of(layers: &[Layer], pick: impl Fn(&Layer) -> &Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for layer in layers {
        for id in pick(layer) {
            if !out.contains(id) {
                out.push(id.clone());
            }
        }
    }
    out
}

pub struct Context {
    id: String,
    session_id: String,
    base_url: Url,
    rules: UrlRules,
    url: RwLock<Url>,
    context_array: SharedIds,
    feature_array: SharedIds,
    filter_array: SharedIds,
    tree: Arc<ContextTree>,
    index: Arc<Index>,
    events: EventSender,
    set_lock: Mutex<()>,
    destroyed: AtomicBool,
}

impl Context {
    fn new(
        session_id: &str,
        base_url: Url,
        rules: UrlRules,
        tree: Arc<ContextTree>,
        index: Arc<Index>,
        event_capacity: usize,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            events: EventSender::new(id.clone(), event_capacity),
            id,
            session_id: session_id.to_string(),
            url: RwLock::new(Url::root(base_url.protocol())),
            base_url,
            rules,
            context_array: SharedIds::default(),
            feature_array: SharedIds::default(),
            filter_array: SharedIds::default(),
            tree,
            index,
            set_lock: Mutex::new(()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url(&self) -> Url {
        self.url.read().clone()
    }

    pub fn path(&self) -> String {
        self.url.read().path().to_string()
    }

    pub fn path_array(&self) -> Vec<String> {
        self.url.read().path_array()
    }

    pub fn context_array(&self) -> Vec<String> {
        self.context_array.read().clone()
    }

    pub fn feature_array(&self) -> Vec<String> {
        self.feature_array.read().clone()
    }

    pub fn filter_array(&self) -> Vec<String> {
        self.filter_array.read().clone()
    }

    /// Live handle on the context ids; updated in place by [`set_url`](Self::set_url).
    pub fn context_array_handle(&self) -> SharedIds {
        self.context_array.clone()
    }

    pub fn feature_array_handle(&self) -> SharedIds {
        self.feature_array.clone()
    }

    pub fn filter_array_handle(&self) -> SharedIds {
        self.filter_array.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::not_found("context", self.id.clone()));
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: ContextEventKind, payload: serde_json::Value) {
        self.events.emit(kind, payload);
    }

    /// Move to `input`, resolved against the current url when relative.
    ///
    /// The path is inserted into the tree (creating layers if
    /// `auto_create`), then the derived arrays are rebuilt. Setting the
    /// current url again is a no-op. On any failure the previous url and
    /// arrays are kept.
    pub async fn set_url(&self, input: &str, auto_create: bool) -> Result<Url> {
        let _guard = self.set_lock.lock().await;
        self.ensure_live()?;

        let current = self.url();
        let url = self.rules.parse(input, Some(&current))?;
        if url == current {
            return Ok(url);
        }

        let layers = self
            .tree
            .ensure_path(url.path(), auto_create)
            .await?
            .ok_or_else(|| Error::not_found("tree path", url.path()))?;

        replace(&self.context_array, layers.iter().map(|l| l.id.clone()).collect());
        replace(&self.feature_array, union_of(&layers, |l| &l.feature_bitmaps));
        replace(&self.filter_array, union_of(&layers, |l| &l.filter_bitmaps));
        *self.url.write() = url.clone();

        tracing::debug!(context = %self.id, url = %url, "context url changed");
        self.emit(
            ContextEventKind::UrlChanged,
            serde_json::json!({ "url": url.to_string(), "path": url.path() }),
        );
        Ok(url)
    }

    fn or_current(ids: Option<&[String]>, current: &SharedIds) -> Vec<String> {
        match ids {
            Some(ids) => ids.to_vec(),
            None => current.read().clone(),
        }
    }

    pub async fn insert_document(
        &self,
        doc: Document,
        context_ids: Option<&[String]>,
        feature_ids: Option<&[String]>,
    ) -> Result<Document> {
        self.ensure_live()?;
        let ctx = Self::or_current(context_ids, &self.context_array);
        let features = Self::or_current(feature_ids, &self.feature_array);
        let doc = self.index.insert_document(doc, &ctx, &features).await?;
        self.emit(ContextEventKind::DocumentInserted, serde_json::to_value(&doc)?);
        Ok(doc)
    }

    pub async fn insert_documents(
        &self,
        docs: Vec<Document>,
        context_ids: Option<&[String]>,
        feature_ids: Option<&[String]>,
    ) -> Result<Vec<Document>> {
        self.ensure_live()?;
        let ctx = Self::or_current(context_ids, &self.context_array);
        let features = Self::or_current(feature_ids, &self.feature_array);
        let docs = self.index.insert_documents(docs, &ctx, &features).await?;
        self.emit(ContextEventKind::DocumentsInserted, serde_json::to_value(&docs)?);
        Ok(docs)
    }

    pub async fn update_document(
        &self,
        id: u32,
        update: DocumentUpdate,
        context_ids: Option<&[String]>,
        feature_ids: Option<&[String]>,
    ) -> Result<Document> {
        self.ensure_live()?;
        let ctx = Self::or_current(context_ids, &self.context_array);
        let features = Self::or_current(feature_ids, &self.feature_array);
        let doc = self.index.update_document(id, update, &ctx, &features).await?;
        self.emit(ContextEventKind::DocumentUpdated, serde_json::to_value(&doc)?);
        Ok(doc)
    }

    pub async fn update_documents(
        &self,
        updates: Vec<(u32, DocumentUpdate)>,
        context_ids: Option<&[String]>,
        feature_ids: Option<&[String]>,
    ) -> Result<Vec<Document>> {
        self.ensure_live()?;
        let ctx = Self::or_current(context_ids, &self.context_array);
        let features = Self::or_current(feature_ids, &self.feature_array);
        let docs = self.index.update_documents(updates, &ctx, &features).await?;
        self.emit(ContextEventKind::DocumentsUpdated, serde_json::to_value(&docs)?);
        Ok(docs)
    }

    pub async fn get_document(&self, id: u32) -> Result<Option<Document>> {
        self.index.get_document(id).await
    }

    pub async fn get_documents(&self, ids: &[u32]) -> Result<Vec<Document>> {
        self.index.get_documents(ids).await
    }

    pub async fn get_document_by_hash(&self, digest: &str) -> Result<Option<Document>> {
        self.index.get_document_by_hash(digest).await
    }

    /// Documents in this context, optionally narrowed by features and filters.
    ///
    /// Filters apply only when given; the context's `filter_array` is
    /// available to callers that want it.
    pub async fn list_documents(
        &self,
        context_ids: Option<&[String]>,
        feature_ids: Option<&[String]>,
        filter_ids: Option<&[String]>,
    ) -> Result<Vec<Document>> {
        self.ensure_live()?;
        let ctx = Self::or_current(context_ids, &self.context_array);
        let features = Self::or_current(feature_ids, &self.feature_array);
        let filters = filter_ids.map(<[String]>::to_vec).unwrap_or_default();
        self.index.list_documents(&ctx, &features, &filters).await
    }

    fn check_removable(&self, context_ids: Option<&[String]>) -> Result<()> {
        if context_ids.is_none() && self.url.read().is_root() {
            return Err(Error::validation(
                "context",
                "documents cannot be removed from the root context; delete them instead",
            ));
        }
        Ok(())
    }

    /// Detach a document from this context. Rejected at the root.
    pub async fn remove_document(
        &self,
        id: u32,
        context_ids: Option<&[String]>,
        feature_ids: Option<&[String]>,
    ) -> Result<bool> {
        self.ensure_live()?;
        self.check_removable(context_ids)?;
        let ctx = Self::or_current(context_ids, &self.context_array);
        let features = feature_ids.map(<[String]>::to_vec).unwrap_or_default();
        let removed = self.index.remove_document(id, &ctx, &features).await?;
        self.emit(
            ContextEventKind::DocumentRemoved,
            serde_json::json!({ "id": id, "removed": removed }),
        );
        Ok(removed)
    }

    pub async fn remove_documents(
        &self,
        ids: &[u32],
        context_ids: Option<&[String]>,
        feature_ids: Option<&[String]>,
    ) -> Result<usize> {
        self.ensure_live()?;
        self.check_removable(context_ids)?;
        let ctx = Self::or_current(context_ids, &self.context_array);
        let features = feature_ids.map(<[String]>::to_vec).unwrap_or_default();
        let removed = self.index.remove_documents(ids, &ctx, &features).await?;
        self.emit(
            ContextEventKind::DocumentsRemoved,
            serde_json::json!({ "ids": ids, "removed": removed }),
        );
        Ok(removed)
    }

    pub async fn delete_document(&self, id: u32) -> Result<bool> {
        self.ensure_live()?;
        let deleted = self.index.delete_document(id).await?;
        self.emit(
            ContextEventKind::DocumentDeleted,
            serde_json::json!({ "id": id, "deleted": deleted }),
        );
        Ok(deleted)
    }

    pub async fn delete_documents(&self, ids: &[u32]) -> Result<Vec<u32>> {
        self.ensure_live()?;
        let deleted = self.index.delete_documents(ids).await?;
        self.emit(
            ContextEventKind::DocumentsDeleted,
            serde_json::json!({ "ids": deleted }),
        );
        Ok(deleted)
    }

    pub fn tree_json(&self) -> Result<serde_json::Value> {
        self.tree.to_json()
    }

    /// Clear derived state and refuse further operations.
    ///
    /// Receivers see the channel close once the last handle on this
    /// context is dropped.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        replace(&self.context_array, Vec::new());
        replace(&self.feature_array, Vec::new());
        replace(&self.filter_array, Vec::new());
        tracing::debug!(context = %self.id, "context destroyed");
    }
}

/// Registry of live contexts.
pub struct ContextManager {
    tree: Arc<ContextTree>,
    index: Arc<Index>,
    config: ContextConfig,
    rules: UrlRules,
    default_url: Url,
    contexts: RwLock<HashMap<String, Arc<Context>>>,
}

impl ContextManager {
    pub fn new(
        tree: Arc<ContextTree>,
        index: Arc<Index>,
        config: ContextConfig,
        rules: UrlRules,
    ) -> Result<Self> {
        let default_url = rules.parse(&config.default_url, None)?;
        Ok(Self {
            tree,
            index,
            config,
            rules,
            default_url,
            contexts: RwLock::new(HashMap::new()),
        })
    }

    fn check_capacity(&self) -> Result<()> {
        let live = self.contexts.read().len();
        if live >= self.config.max_contexts {
            return Err(Error::conflict(format!(
                "maximum of {} live contexts reached",
                self.config.max_contexts
            )));
        }
        Ok(())
    }

    /// Create a context at `url` (or the configured default url).
    pub async fn create_context(
        &self,
        session_id: &str,
        url: Option<&str>,
        auto_create: bool,
    ) -> Result<Arc<Context>> {
        self.check_capacity()?;
        let context = Arc::new(Context::new(
            session_id,
            self.default_url.clone(),
            self.rules.clone(),
            self.tree.clone(),
            self.index.clone(),
            self.config.event_capacity,
        ));
        let target = match url {
            Some(url) => url.to_string(),
            None => self.default_url.to_string(),
        };
        context.set_url(&target, auto_create).await?;

        let mut contexts = self.contexts.write();
        if contexts.len() >= self.config.max_contexts {
            return Err(Error::conflict(format!(
                "maximum of {} live contexts reached",
                self.config.max_contexts
            )));
        }
        contexts.insert(context.id().to_string(), context.clone());
        tracing::info!(context = %context.id(), session = session_id, url = %context.url(), "created context");
        Ok(context)
    }

    pub fn get_context(&self, id: &str) -> Option<Arc<Context>> {
        self.contexts.read().get(id).cloned()
    }

    pub fn list_contexts(&self) -> Vec<Arc<Context>> {
        let mut contexts: Vec<Arc<Context>> = self.contexts.read().values().cloned().collect();
        contexts.sort_by(|a, b| a.id().cmp(b.id()));
        contexts
    }

    pub fn context_count(&self) -> usize {
        self.contexts.read().len()
    }

    /// Destroy and forget a context. Returns `false` if it was not live.
    pub fn remove_context(&self, id: &str) -> bool {
        match self.contexts.write().remove(id) {
            Some(context) => {
                context.destroy();
                tracing::info!(context = id, "removed context");
                true
            }
            None => false,
        }
    }
}
