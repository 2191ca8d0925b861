//! Content-addressed document index.
//!
//! Documents live in the `documents` dataset keyed by their numeric id.
//! Every checksum of a document is recorded in `checksums` as
//! `{algorithm}/{digest}` → id, which is how identical content is found
//! again on insert. Three [`BitmapManager`]s sharing one cache annotate
//! documents with context, feature, and filter memberships.
//!
//! # Write ordering
//!
//! Inserts and updates first commit the document record and its checksum
//! entries in one batch, then tick the context and feature bitmaps
//! concurrently. If the tick phase fails, the record exists with
//! incomplete memberships and the error is returned; re-running the same
//! insert is safe because it deduplicates to an update, which re-ticks
//! idempotently.
//!
//! Deletes purge bitmap memberships first and the record last, so a
//! failed delete can simply be retried.

use std::collections::BTreeSet;
use std::sync::Arc;

use roaring::RoaringBitmap;
use tokio::sync::Mutex;

use context_engine_core::error::{Error, Result};
use context_engine_core::store::{Store, WriteOp};
use context_engine_core::{ChecksumAlgorithm, Document, DocumentUpdate};

use crate::bitmap_manager::{BitmapCache, BitmapManager};
use crate::config::{IndexConfig, MatchMode};

pub const DOCUMENTS_DATASET: &str = "documents";
pub const CHECKSUMS_DATASET: &str = "checksums";
pub const CONTEXT_BITMAPS: &str = "bitmaps/context";
pub const FEATURE_BITMAPS: &str = "bitmaps/features";
pub const FILTER_BITMAPS: &str = "bitmaps/filters";
pub const DOCUMENT_ID_COUNTER: &str = "documents/id";

fn checksum_key(algorithm: ChecksumAlgorithm, digest: &str) -> String {
    format!("{}/{}", algorithm, digest)
}

fn checksum_keys(doc: &Document) -> BTreeSet<String> {
    doc.checksums
        .iter()
        .map(|(algorithm, digest)| checksum_key(*algorithm, digest))
        .collect()
}

fn decode(id: u32, bytes: &[u8]) -> Result<Document> {
    serde_json::from_slice(bytes).map_err(|e| Error::corrupt("document", format!("{}: {}", id, e)))
}

pub struct Index {
    store: Arc<dyn Store>,
    config: IndexConfig,
    contexts: BitmapManager,
    features: BitmapManager,
    filters: BitmapManager,
    write: Mutex<()>,
}

impl Index {
    pub fn new(store: Arc<dyn Store>, config: IndexConfig, cache: BitmapCache) -> Self {
        let range = config.document_range();
        let manager =
            |dataset: &str| BitmapManager::new(store.clone(), dataset, range, cache.clone());
        let (contexts, features, filters) = (
            manager(CONTEXT_BITMAPS),
            manager(FEATURE_BITMAPS),
            manager(FILTER_BITMAPS),
        );
        Self {
            contexts,
            features,
            filters,
            store,
            config,
            write: Mutex::new(()),
        }
    }

    pub fn context_bitmaps(&self) -> &BitmapManager {
        &self.contexts
    }

    pub fn feature_bitmaps(&self) -> &BitmapManager {
        &self.features
    }

    pub fn filter_bitmaps(&self) -> &BitmapManager {
        &self.filters
    }

    async fn next_id(&self) -> Result<u32> {
        loop {
            let n = self.store.increment(DOCUMENT_ID_COUNTER).await?;
            let id = u64::from(self.config.document_id_start) + n - 1;
            let id = u32::try_from(id)
                .map_err(|_| Error::validation("document id", "document id space exhausted"))?;
            if !self.has_document(id).await? {
                return Ok(id);
            }
            tracing::debug!(id, "skipping document id already in use");
        }
    }

    /// Validate, fold caller features in, and recompute checksums.
    fn prepare(&self, doc: &mut Document, feature_ids: &[String]) -> Result<String> {
        doc.features.extend(feature_ids.iter().cloned());
        doc.validate()?;
        doc.compute_checksums(self.config.primary_checksum, &self.config.checksum_algorithms)?;
        doc.primary_checksum(self.config.primary_checksum)
            .map(str::to_string)
            .ok_or_else(|| Error::validation("document", "missing primary checksum"))
    }

    async fn lookup_checksum(&self, algorithm: ChecksumAlgorithm, digest: &str) -> Result<Option<u32>> {
        let Some(bytes) = self.store.get(CHECKSUMS_DATASET, &checksum_key(algorithm, digest)).await? else {
            return Ok(None);
        };
        let id: u32 = serde_json::from_slice(&bytes)
            .map_err(|e| Error::corrupt("checksum entry", e.to_string()))?;
        Ok(Some(id))
    }

    async fn tick_memberships(&self, doc: &Document, context_ids: &[String]) -> Result<()> {
        let features = doc.feature_keys();
        let id = [doc.id];
        tokio::try_join!(
            self.contexts.tick_many(context_ids, &id),
            self.features.tick_many(&features, &id),
        )?;
        Ok(())
    }

    /// Insert a document, or update the existing one with the same content.
    ///
    /// `context_ids` are ticked into the context bitmaps; `feature_ids` are
    /// added to the document's features, and every feature (plus the
    /// schema) is ticked into the feature bitmaps. A caller-supplied `id`
    /// must be inside the document range and unused; otherwise the next
    /// id is assigned from the store counter.
    pub async fn insert_document(
        &self,
        doc: Document,
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<Document> {
        let _guard = self.write.lock().await;
        self.insert_locked(doc, context_ids, feature_ids, None).await
    }

    async fn insert_locked(
        &self,
        mut doc: Document,
        context_ids: &[String],
        feature_ids: &[String],
        parent: Option<Document>,
    ) -> Result<Document> {
        let digest = self.prepare(&mut doc, feature_ids)?;

        if let Some(existing) = self.lookup_checksum(self.config.primary_checksum, &digest).await? {
            if parent.is_some() {
                return Err(Error::conflict(format!(
                    "identical content is already stored as document {}",
                    existing
                )));
            }
            tracing::debug!(id = existing, "duplicate content, updating existing document");
            let update = DocumentUpdate {
                features: doc.features.into_iter().collect(),
                paths: (!doc.paths.is_empty()).then_some(doc.paths),
                ..DocumentUpdate::default()
            };
            return self.update_locked(existing, update, context_ids, &[]).await;
        }

        if doc.id == 0 {
            doc.id = self.next_id().await?;
        } else {
            let range = self.config.document_range();
            if !range.contains(doc.id) {
                return Err(Error::Range {
                    key: DOCUMENTS_DATASET.to_string(),
                    value: doc.id,
                    min: range.min,
                    max: range.max,
                });
            }
            if self.has_document(doc.id).await? {
                return Err(Error::conflict(format!("document {} already exists", doc.id)));
            }
        }

        let mut ops = Vec::with_capacity(4);
        for key in checksum_keys(&doc) {
            ops.push(WriteOp::put(CHECKSUMS_DATASET, &key, serde_json::to_vec(&doc.id)?));
        }
        if let Some(mut parent) = parent {
            doc.parent_id = Some(parent.id);
            doc.version_number = parent.latest_version + 1;
            doc.latest_version = doc.version_number;
            parent.versions.push(doc.id);
            parent.latest_version = doc.version_number;
            parent.updated_at = doc.created_at;
            ops.push(WriteOp::put(DOCUMENTS_DATASET, &parent.id.to_string(), serde_json::to_vec(&parent)?));
        }
        ops.push(WriteOp::put(DOCUMENTS_DATASET, &doc.id.to_string(), serde_json::to_vec(&doc)?));
        self.store.apply(ops).await?;

        self.tick_memberships(&doc, context_ids).await?;
        tracing::info!(id = doc.id, schema = %doc.schema, contexts = context_ids.len(), "inserted document");
        Ok(doc)
    }

    /// Insert several documents in order; stops at the first error.
    pub async fn insert_documents(
        &self,
        docs: Vec<Document>,
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<Vec<Document>> {
        let _guard = self.write.lock().await;
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            out.push(self.insert_locked(doc, context_ids, feature_ids, None).await?);
        }
        Ok(out)
    }

    /// Merge `update` into document `id` and re-tick its memberships.
    ///
    /// Fails with `NotFound` if the document is missing and with
    /// `Conflict` if the new content is already stored under another id.
    pub async fn update_document(
        &self,
        id: u32,
        update: DocumentUpdate,
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<Document> {
        let _guard = self.write.lock().await;
        self.update_locked(id, update, context_ids, feature_ids).await
    }

    async fn update_locked(
        &self,
        id: u32,
        update: DocumentUpdate,
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<Document> {
        let mut doc = self
            .get_document(id)
            .await?
            .ok_or_else(|| Error::not_found("document", id.to_string()))?;
        let old_keys = checksum_keys(&doc);

        doc.apply_update(update);
        let digest = self.prepare(&mut doc, feature_ids)?;
        if let Some(owner) = self.lookup_checksum(self.config.primary_checksum, &digest).await? {
            if owner != id {
                return Err(Error::conflict(format!(
                    "identical content is already stored as document {}",
                    owner
                )));
            }
        }

        let new_keys = checksum_keys(&doc);
        let mut ops = Vec::new();
        for key in old_keys.difference(&new_keys) {
            ops.push(WriteOp::delete(CHECKSUMS_DATASET, key));
        }
        for key in new_keys.difference(&old_keys) {
            ops.push(WriteOp::put(CHECKSUMS_DATASET, key, serde_json::to_vec(&id)?));
        }
        ops.push(WriteOp::put(DOCUMENTS_DATASET, &id.to_string(), serde_json::to_vec(&doc)?));
        self.store.apply(ops).await?;

        self.tick_memberships(&doc, context_ids).await?;
        tracing::info!(id, "updated document");
        Ok(doc)
    }

    pub async fn update_documents(
        &self,
        updates: Vec<(u32, DocumentUpdate)>,
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<Vec<Document>> {
        let _guard = self.write.lock().await;
        let mut out = Vec::with_capacity(updates.len());
        for (id, update) in updates {
            out.push(self.update_locked(id, update, context_ids, feature_ids).await?);
        }
        Ok(out)
    }

    /// Store `doc` as a new version of `parent_id`.
    ///
    /// The child gets `parent_id` and the next version number; the parent's
    /// `versions` and `latest_version` are updated in the same batch.
    pub async fn create_version(
        &self,
        parent_id: u32,
        doc: Document,
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<Document> {
        let _guard = self.write.lock().await;
        let parent = self
            .get_document(parent_id)
            .await?
            .ok_or_else(|| Error::not_found("document", parent_id.to_string()))?;
        self.insert_locked(doc, context_ids, feature_ids, Some(parent)).await
    }

    pub async fn get_document(&self, id: u32) -> Result<Option<Document>> {
        match self.store.get(DOCUMENTS_DATASET, &id.to_string()).await? {
            Some(bytes) => Ok(Some(decode(id, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch several documents in the order given, skipping missing ids.
    pub async fn get_documents(&self, ids: &[u32]) -> Result<Vec<Document>> {
        if let [id] = ids {
            return Ok(self.get_document(*id).await?.into_iter().collect());
        }
        let keys: Vec<String> = ids.iter().map(u32::to_string).collect();
        let values = self.store.get_many(DOCUMENTS_DATASET, &keys).await?;
        let mut docs = Vec::with_capacity(ids.len());
        for (id, value) in ids.iter().zip(values) {
            match value {
                Some(bytes) => docs.push(decode(*id, &bytes)?),
                None => tracing::debug!(id, "document referenced by a bitmap is missing"),
            }
        }
        Ok(docs)
    }

    /// Look up a document by its primary-algorithm digest.
    pub async fn get_document_by_hash(&self, digest: &str) -> Result<Option<Document>> {
        self.get_document_by_checksum(self.config.primary_checksum, digest)
            .await
    }

    pub async fn get_document_by_checksum(
        &self,
        algorithm: ChecksumAlgorithm,
        digest: &str,
    ) -> Result<Option<Document>> {
        match self.lookup_checksum(algorithm, digest).await? {
            Some(id) => self.get_document(id).await,
            None => Ok(None),
        }
    }

    pub async fn has_document(&self, id: u32) -> Result<bool> {
        self.store.has(DOCUMENTS_DATASET, &id.to_string()).await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.store.keys(DOCUMENTS_DATASET).await?.len())
    }

    async fn all_ids(&self) -> Result<RoaringBitmap> {
        let mut ids = RoaringBitmap::new();
        for key in self.store.keys(DOCUMENTS_DATASET).await? {
            let id: u32 = key
                .parse()
                .map_err(|_| Error::corrupt("document key", key.clone()))?;
            ids.insert(id);
        }
        Ok(ids)
    }

    async fn combine(manager: &BitmapManager, keys: &[String], mode: MatchMode) -> Result<RoaringBitmap> {
        let bitmap = match mode {
            MatchMode::And => manager.and(keys).await?,
            MatchMode::Or => manager.or(keys).await?,
        };
        Ok(bitmap.into_members())
    }

    /// Ids matching every supplied constraint, ascending.
    ///
    /// Contexts are always intersected; features and filters combine
    /// according to the configured modes. An empty constraint list is
    /// ignored, and no constraints at all match every document.
    pub async fn query_ids(
        &self,
        context_ids: &[String],
        feature_ids: &[String],
        filter_ids: &[String],
    ) -> Result<Vec<u32>> {
        let mut parts = Vec::with_capacity(3);
        if !context_ids.is_empty() {
            parts.push(Self::combine(&self.contexts, context_ids, MatchMode::And).await?);
        }
        if !feature_ids.is_empty() {
            parts.push(Self::combine(&self.features, feature_ids, self.config.feature_mode).await?);
        }
        if !filter_ids.is_empty() {
            parts.push(Self::combine(&self.filters, filter_ids, self.config.filter_mode).await?);
        }

        let mut parts = parts.into_iter();
        let ids = match parts.next() {
            None => self.all_ids().await?,
            Some(first) => parts.fold(first, |acc, part| acc & part),
        };
        Ok(ids.iter().collect())
    }

    pub async fn list_documents(
        &self,
        context_ids: &[String],
        feature_ids: &[String],
        filter_ids: &[String],
    ) -> Result<Vec<Document>> {
        let ids = self.query_ids(context_ids, feature_ids, filter_ids).await?;
        self.get_documents(&ids).await
    }

    /// Tag documents with filter bitmaps.
    pub async fn tick_filters(&self, filter_ids: &[String], document_ids: &[u32]) -> Result<()> {
        self.filters.tick_many(filter_ids, document_ids).await?;
        Ok(())
    }

    pub async fn untick_filters(&self, filter_ids: &[String], document_ids: &[u32]) -> Result<()> {
        self.filters.untick_many(filter_ids, document_ids).await?;
        Ok(())
    }

    /// Detach documents from the given contexts (and features). Records stay.
    ///
    /// Returns how many of `ids` exist.
    pub async fn remove_documents(
        &self,
        ids: &[u32],
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<usize> {
        if context_ids.is_empty() {
            return Err(Error::validation(
                "context",
                "documents can only be removed from a non-root context; use delete",
            ));
        }
        let mut existing = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.has_document(id).await? {
                existing.push(id);
            }
        }
        tokio::try_join!(
            self.contexts.untick_many(context_ids, &existing),
            self.features.untick_many(feature_ids, &existing),
        )?;
        tracing::info!(count = existing.len(), contexts = context_ids.len(), "removed documents from context");
        Ok(existing.len())
    }

    pub async fn remove_document(
        &self,
        id: u32,
        context_ids: &[String],
        feature_ids: &[String],
    ) -> Result<bool> {
        Ok(self.remove_documents(&[id], context_ids, feature_ids).await? == 1)
    }

    /// Purge documents: bitmap memberships, checksum entries, and records.
    ///
    /// Returns the ids that existed.
    pub async fn delete_documents(&self, ids: &[u32]) -> Result<Vec<u32>> {
        let _guard = self.write.lock().await;
        let mut docs = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(doc) = self.get_document(id).await? {
                docs.push(doc);
            }
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let deleted: Vec<u32> = docs.iter().map(|d| d.id).collect();

        tokio::try_join!(
            self.contexts.untick_everywhere(&deleted),
            self.features.untick_everywhere(&deleted),
            self.filters.untick_everywhere(&deleted),
        )?;

        let mut ops = Vec::new();
        for doc in &docs {
            for key in checksum_keys(doc) {
                ops.push(WriteOp::delete(CHECKSUMS_DATASET, &key));
            }
            ops.push(WriteOp::delete(DOCUMENTS_DATASET, &doc.id.to_string()));
        }
        let parents: BTreeSet<u32> = docs.iter().filter_map(|d| d.parent_id).collect();
        for parent_id in parents {
            if deleted.contains(&parent_id) {
                continue;
            }
            if let Some(mut parent) = self.get_document(parent_id).await? {
                parent.versions.retain(|v| !deleted.contains(v));
                ops.push(WriteOp::put(DOCUMENTS_DATASET, &parent_id.to_string(), serde_json::to_vec(&parent)?));
            }
        }
        self.store.apply(ops).await?;

        tracing::info!(count = deleted.len(), "deleted documents");
        Ok(deleted)
    }

    pub async fn delete_document(&self, id: u32) -> Result<bool> {
        Ok(!self.delete_documents(&[id]).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_engine_core::store::memory::InMemoryStore;
    use serde_json::json;

    fn index_with(config: IndexConfig) -> (Arc<InMemoryStore>, Index) {
        let store = Arc::new(InMemoryStore::new());
        let index = Index::new(store.clone(), config, BitmapCache::new());
        (store, index)
    }

    fn index() -> (Arc<InMemoryStore>, Index) {
        index_with(IndexConfig::default())
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn note(title: &str) -> Document {
        Document::new("note", json!({ "title": title }))
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let (_, index) = index();
        let a = index.insert_document(note("a"), &[], &[]).await.unwrap();
        let b = index.insert_document(note("b"), &[], &[]).await.unwrap();
        assert_eq!(a.id, 100_000);
        assert_eq!(b.id, 100_001);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dedup_routes_to_update() {
        let (store, index) = index();
        let first = index
            .insert_document(note("x"), &ids(&["ctx-a"]), &[])
            .await
            .unwrap();
        let digest = first.primary_checksum(ChecksumAlgorithm::Sha256).unwrap().to_string();

        let again = index
            .insert_document(note("x"), &ids(&["ctx-b"]), &ids(&["pinned"]))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.features.contains("pinned"));
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(store.len(CHECKSUMS_DATASET), 1);
        assert_eq!(
            index.get_document_by_hash(&digest).await.unwrap().unwrap().id,
            first.id
        );
        // the second context saw the document too
        assert_eq!(index.query_ids(&ids(&["ctx-b"]), &[], &[]).await.unwrap(), vec![first.id]);
    }

    #[tokio::test]
    async fn test_schema_is_always_a_feature() {
        let (_, index) = index();
        let doc = index
            .insert_document(note("x"), &[], &ids(&["todo"]))
            .await
            .unwrap();
        assert_eq!(index.query_ids(&[], &ids(&["note"]), &[]).await.unwrap(), vec![doc.id]);
        assert_eq!(index.query_ids(&[], &ids(&["todo"]), &[]).await.unwrap(), vec![doc.id]);
    }

    #[tokio::test]
    async fn test_intersection_query() {
        let (_, index) = index();
        let first = index.insert_document(note("1"), &ids(&["A", "B"]), &[]).await.unwrap();
        let second = index.insert_document(note("2"), &ids(&["A"]), &[]).await.unwrap();

        assert_eq!(index.query_ids(&ids(&["A", "B"]), &[], &[]).await.unwrap(), vec![first.id]);
        assert!(index.query_ids(&ids(&["A", "B", "C"]), &[], &[]).await.unwrap().is_empty());
        assert_eq!(
            index.query_ids(&ids(&["A"]), &[], &[]).await.unwrap(),
            vec![first.id, second.id]
        );
        assert_eq!(index.list_documents(&[], &[], &[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_feature_and_filter_modes() {
        let (_, index) = index();
        let n = index.insert_document(note("n"), &[], &[]).await.unwrap();
        let t = index
            .insert_document(Document::new("tab", json!({"url": "x"})), &[], &[])
            .await
            .unwrap();
        index.tick_filters(&ids(&["starred"]), &[n.id, t.id]).await.unwrap();
        index.tick_filters(&ids(&["recent"]), &[t.id]).await.unwrap();

        assert_eq!(
            index.query_ids(&[], &ids(&["note", "tab"]), &[]).await.unwrap(),
            vec![n.id, t.id]
        );
        assert_eq!(
            index.query_ids(&[], &[], &ids(&["starred", "recent"])).await.unwrap(),
            vec![t.id]
        );

        let (_, strict) = index_with(IndexConfig {
            feature_mode: MatchMode::And,
            filter_mode: MatchMode::Or,
            ..IndexConfig::default()
        });
        let n = strict.insert_document(note("n"), &[], &[]).await.unwrap();
        let t = strict
            .insert_document(Document::new("tab", json!({"url": "x"})), &[], &[])
            .await
            .unwrap();
        strict.tick_filters(&ids(&["starred"]), &[n.id]).await.unwrap();
        strict.tick_filters(&ids(&["recent"]), &[t.id]).await.unwrap();
        assert!(strict.query_ids(&[], &ids(&["note", "tab"]), &[]).await.unwrap().is_empty());
        assert_eq!(
            strict.query_ids(&[], &[], &ids(&["starred", "recent"])).await.unwrap(),
            vec![n.id, t.id]
        );
    }

    #[tokio::test]
    async fn test_update_rehashes_and_guards_collisions() {
        let (store, index) = index();
        let a = index.insert_document(note("a"), &[], &[]).await.unwrap();
        let b = index.insert_document(note("b"), &[], &[]).await.unwrap();
        let old_digest = a.primary_checksum(ChecksumAlgorithm::Sha256).unwrap().to_string();

        let clash = DocumentUpdate {
            data: Some(json!({"title": "b"})),
            ..DocumentUpdate::default()
        };
        assert!(matches!(
            index.update_document(a.id, clash, &[], &[]).await,
            Err(Error::Conflict { .. })
        ));

        let edit = DocumentUpdate {
            data: Some(json!({"title": "a2"})),
            ..DocumentUpdate::default()
        };
        let updated = index.update_document(a.id, edit, &[], &[]).await.unwrap();
        assert!(index.get_document_by_hash(&old_digest).await.unwrap().is_none());
        assert_eq!(store.len(CHECKSUMS_DATASET), 2);
        assert!(updated.updated_at >= a.updated_at);
        assert_ne!(updated.id, b.id);

        assert!(index
            .update_document(1, DocumentUpdate::default(), &[], &[])
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_validation_happens_before_writes() {
        let (store, index) = index();
        let bad = Document::new("", json!({"x": 1}));
        assert!(matches!(
            index.insert_document(bad, &ids(&["A"]), &[]).await,
            Err(Error::Validation { .. })
        ));
        let mut out_of_range = note("x");
        out_of_range.id = 5;
        assert!(matches!(
            index.insert_document(out_of_range, &[], &[]).await,
            Err(Error::Range { .. })
        ));
        assert_eq!(store.len(DOCUMENTS_DATASET), 0);
        assert_eq!(store.len(CONTEXT_BITMAPS), 0);
    }

    #[tokio::test]
    async fn test_explicit_id_is_kept_and_skipped_by_counter() {
        let (_, index) = index();
        let mut doc = note("pinned");
        doc.id = 100_000;
        index.insert_document(doc, &[], &[]).await.unwrap();
        let next = index.insert_document(note("next"), &[], &[]).await.unwrap();
        assert_eq!(next.id, 100_001);
    }

    #[tokio::test]
    async fn test_versions() {
        let (_, index) = index();
        let parent = index.insert_document(note("v1"), &[], &[]).await.unwrap();
        let child = index
            .create_version(parent.id, note("v2"), &[], &[])
            .await
            .unwrap();
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.version_number, 2);

        let parent = index.get_document(parent.id).await.unwrap().unwrap();
        assert_eq!(parent.versions, vec![child.id]);
        assert_eq!(parent.latest_version, 2);

        assert!(matches!(
            index.create_version(parent.id, note("v2"), &[], &[]).await,
            Err(Error::Conflict { .. })
        ));

        index.delete_document(child.id).await.unwrap();
        let parent = index.get_document(parent.id).await.unwrap().unwrap();
        assert!(parent.versions.is_empty());
    }

    #[tokio::test]
    async fn test_remove_keeps_record_delete_purges() {
        let (store, index) = index();
        let doc = index
            .insert_document(note("x"), &ids(&["A", "B"]), &[])
            .await
            .unwrap();
        index.tick_filters(&ids(&["starred"]), &[doc.id]).await.unwrap();

        assert!(index.remove_document(doc.id, &[], &[]).await.is_err());
        assert!(index.remove_document(doc.id, &ids(&["B"]), &[]).await.unwrap());
        assert!(index.has_document(doc.id).await.unwrap());
        assert!(index.query_ids(&ids(&["B"]), &[], &[]).await.unwrap().is_empty());
        assert_eq!(index.query_ids(&ids(&["A"]), &[], &[]).await.unwrap(), vec![doc.id]);

        assert!(index.delete_document(doc.id).await.unwrap());
        assert!(!index.delete_document(doc.id).await.unwrap());
        assert!(!index.has_document(doc.id).await.unwrap());
        assert_eq!(store.len(CHECKSUMS_DATASET), 0);
        for manager in [index.context_bitmaps(), index.feature_bitmaps(), index.filter_bitmaps()] {
            for key in manager.list_keys().await.unwrap() {
                assert!(!manager.get_bitmap(&key).await.unwrap().unwrap().contains(doc.id));
            }
        }

        // deleted ids are never handed out again
        let next = index.insert_document(note("x"), &[], &[]).await.unwrap();
        assert!(next.id > doc.id);
    }

    #[tokio::test]
    async fn test_batch_variants() {
        let (_, index) = index();
        let docs = index
            .insert_documents(vec![note("1"), note("2"), note("1")], &ids(&["A"]), &[])
            .await
            .unwrap();
        assert_eq!(docs[0].id, docs[2].id);
        assert_eq!(index.count().await.unwrap(), 2);

        let all: Vec<u32> = docs.iter().map(|d| d.id).collect();
        let fetched = index.get_documents(&[all[1], 999_999, all[0]]).await.unwrap();
        assert_eq!(fetched.iter().map(|d| d.id).collect::<Vec<_>>(), vec![all[1], all[0]]);

        let updated = index
            .update_documents(
                vec![(all[0], DocumentUpdate { features: vec!["x".into()], ..Default::default() })],
                &[],
                &[],
            )
            .await
            .unwrap();
        assert!(updated[0].features.contains("x"));

        assert_eq!(index.remove_documents(&[all[0], all[1], 5], &ids(&["A"]), &[]).await.unwrap(), 2);
        assert_eq!(index.delete_documents(&[all[0], all[1]]).await.unwrap().len(), 2);
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
