//! Persistent keyed bitmap collections with a shared in-memory cache.
//!
//! A [`BitmapManager`] owns one dataset of the [`Store`] (for example
//! `bitmaps/context`) and keeps decoded bitmaps in a [`BitmapCache`] that
//! may be shared with other managers.
//!
//! # Ordering guarantees
//!
//! - Every mutation of a key runs under that key's async mutex, so
//!   read-modify-write cycles on the same key never interleave.
//! - The cache is updated only after the backend write succeeded; a
//!   failed write leaves both cache and store at the previous value.
//! - Multi-key mutations ([`tick_many`](BitmapManager::tick_many),
//!   [`untick_many`](BitmapManager::untick_many)) validate all input,
//!   lock keys in sorted order, and commit one [`Store::apply`] batch.
//!   They are all-or-nothing when the backend batch is atomic.
//! - Cache misses are filled under the key lock, so a concurrent writer
//!   can never be overwritten by a stale read.
//!
//! Locked layers are not a concept at this level: callers check locks
//! before renaming or removing a bitmap.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use context_engine_core::bitmap::{Bitmap, BitmapRange};
use context_engine_core::error::{Error, Result};
use context_engine_core::store::{Store, WriteOp};

/// Decoded bitmaps shared by every manager built against it.
///
/// Eviction is explicit; nothing is dropped automatically.
#[derive(Clone, Default)]
pub struct BitmapCache {
    inner: Arc<RwLock<HashMap<(String, String), Bitmap>>>,
}

impl BitmapCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, dataset: &str, key: &str) -> Option<Bitmap> {
        self.inner
            .read()
            .get(&(dataset.to_string(), key.to_string()))
            .cloned()
    }

    fn contains(&self, dataset: &str, key: &str) -> bool {
        self.inner
            .read()
            .contains_key(&(dataset.to_string(), key.to_string()))
    }

    fn insert(&self, dataset: &str, bitmap: Bitmap) {
        self.inner
            .write()
            .insert((dataset.to_string(), bitmap.key().to_string()), bitmap);
    }

    fn remove(&self, dataset: &str, key: &str) {
        self.inner
            .write()
            .remove(&(dataset.to_string(), key.to_string()));
    }

    fn clear_dataset(&self, dataset: &str, keep: &BTreeSet<String>) {
        self.inner
            .write()
            .retain(|(ds, key), _| ds != dataset || keep.contains(key));
    }

    /// Number of cached bitmaps across all datasets.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Per-call behavior of [`BitmapManager::tick`].
#[derive(Debug, Clone, Copy)]
pub struct TickOptions {
    /// Create the bitmap when the key does not exist yet.
    pub auto_create: bool,
    /// Persist before returning. When `false`, the change is held in the
    /// cache until [`BitmapManager::flush`].
    pub implicit_save: bool,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            auto_create: true,
            implicit_save: true,
        }
    }
}

/// A persistent, cached collection of bitmaps in one store dataset.
pub struct BitmapManager {
    store: Arc<dyn Store>,
    dataset: String,
    range: BitmapRange,
    cache: BitmapCache,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    dirty: Mutex<BTreeSet<String>>,
}

impl BitmapManager {
    pub fn new(
        store: Arc<dyn Store>,
        dataset: impl Into<String>,
        range: BitmapRange,
        cache: BitmapCache,
    ) -> Self {
        Self {
            store,
            dataset: dataset.into(),
            range,
            cache,
            locks: Mutex::new(HashMap::new()),
            dirty: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn range(&self) -> BitmapRange {
        self.range
    }

    async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Lock several keys in ascending order so concurrent batches cannot deadlock.
    async fn lock_keys(&self, keys: &BTreeSet<String>) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock_key(key).await);
        }
        guards
    }

    fn check_key(key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::validation("bitmap key", "key must not be empty"));
        }
        Ok(())
    }

    fn check_ids(&self, ids: &[u32]) -> Result<()> {
        Bitmap::new("", self.range).tick_many(ids).map(|_| ())
    }

    /// Load a bitmap; the caller must hold the key lock.
    async fn load_locked(&self, key: &str) -> Result<Option<Bitmap>> {
        if let Some(bitmap) = self.cache.get(&self.dataset, key) {
            return Ok(Some(bitmap));
        }
        match self.store.get(&self.dataset, key).await? {
            Some(bytes) => {
                let bitmap = Bitmap::deserialize(key, &bytes)?;
                tracing::debug!(dataset = %self.dataset, key, "loaded bitmap into cache");
                self.cache.insert(&self.dataset, bitmap.clone());
                Ok(Some(bitmap))
            }
            None => Ok(None),
        }
    }

    async fn persist(&self, bitmap: &Bitmap) -> Result<()> {
        let bytes = bitmap.serialize()?;
        self.store.put(&self.dataset, bitmap.key(), &bytes).await?;
        self.dirty.lock().remove(bitmap.key());
        Ok(())
    }

    /// Fetch a bitmap, cache first, falling back to the store.
    pub async fn get_bitmap(&self, key: &str) -> Result<Option<Bitmap>> {
        if let Some(bitmap) = self.cache.get(&self.dataset, key) {
            return Ok(Some(bitmap));
        }
        let _guard = self.lock_key(key).await;
        self.load_locked(key).await
    }

    pub async fn has_bitmap(&self, key: &str) -> Result<bool> {
        if self.cache.contains(&self.dataset, key) {
            return Ok(true);
        }
        self.store.has(&self.dataset, key).await
    }

    /// Create a new bitmap. Returns `None` if `key` already exists.
    pub async fn create_bitmap(&self, key: &str, seed: &[u32]) -> Result<Option<Bitmap>> {
        Self::check_key(key)?;
        let bitmap = Bitmap::with_members(key, self.range, seed)?;
        let _guard = self.lock_key(key).await;
        if self.load_locked(key).await?.is_some() {
            tracing::debug!(dataset = %self.dataset, key, "bitmap already exists");
            return Ok(None);
        }
        self.persist(&bitmap).await?;
        self.cache.insert(&self.dataset, bitmap.clone());
        Ok(Some(bitmap))
    }

    /// Add `ids` to the bitmap at `key`.
    pub async fn tick(&self, key: &str, ids: &[u32], options: TickOptions) -> Result<Bitmap> {
        let seed = Bitmap::with_members(key, self.range, ids)?;
        self.tick_bitmap(key, &seed, options).await
    }

    /// Union `other` into the bitmap at `key`.
    pub async fn tick_bitmap(
        &self,
        key: &str,
        other: &Bitmap,
        options: TickOptions,
    ) -> Result<Bitmap> {
        Self::check_key(key)?;
        let _guard = self.lock_key(key).await;
        let mut bitmap = match self.load_locked(key).await? {
            Some(bitmap) => bitmap,
            None if options.auto_create => Bitmap::new(key, self.range),
            None => return Err(Error::not_found("bitmap", key)),
        };
        bitmap.tick_bitmap(other)?;

        if options.implicit_save {
            self.persist(&bitmap).await?;
        } else {
            self.dirty.lock().insert(key.to_string());
        }
        self.cache.insert(&self.dataset, bitmap.clone());
        tracing::debug!(dataset = %self.dataset, key, members = bitmap.len(), "ticked bitmap");
        Ok(bitmap)
    }

    /// Remove `ids` from the bitmap at `key`. Absent keys are not an error.
    pub async fn untick(&self, key: &str, ids: &[u32]) -> Result<Option<Bitmap>> {
        self.check_ids(ids)?;
        let _guard = self.lock_key(key).await;
        let mut bitmap = match self.load_locked(key).await? {
            Some(bitmap) => bitmap,
            None => return Ok(None),
        };
        if bitmap.untick_many(ids)? > 0 {
            self.persist(&bitmap).await?;
            self.cache.insert(&self.dataset, bitmap.clone());
        }
        Ok(Some(bitmap))
    }

    /// Add `ids` to every bitmap in `keys`, creating missing ones, in one batch.
    pub async fn tick_many(&self, keys: &[String], ids: &[u32]) -> Result<Vec<Bitmap>> {
        self.check_ids(ids)?;
        for key in keys {
            Self::check_key(key)?;
        }
        let keys: BTreeSet<String> = keys.iter().cloned().collect();
        let _guards = self.lock_keys(&keys).await;

        let mut updated = Vec::with_capacity(keys.len());
        for key in &keys {
            let mut bitmap = match self.load_locked(key).await? {
                Some(bitmap) => bitmap,
                None => Bitmap::new(key.as_str(), self.range),
            };
            bitmap.tick_many(ids)?;
            updated.push(bitmap);
        }
        self.commit(updated).await
    }

    /// Remove `ids` from every existing bitmap in `keys`, in one batch.
    pub async fn untick_many(&self, keys: &[String], ids: &[u32]) -> Result<Vec<Bitmap>> {
        self.check_ids(ids)?;
        let keys: BTreeSet<String> = keys.iter().cloned().collect();
        let _guards = self.lock_keys(&keys).await;

        let mut updated = Vec::new();
        for key in &keys {
            if let Some(mut bitmap) = self.load_locked(key).await? {
                if bitmap.untick_many(ids)? > 0 {
                    updated.push(bitmap);
                }
            }
        }
        self.commit(updated).await
    }

    /// Remove `ids` from every bitmap in the dataset. Returns the keys that changed.
    pub async fn untick_everywhere(&self, ids: &[u32]) -> Result<Vec<String>> {
        let keys = self.list_keys().await?;
        let changed = self.untick_many(&keys, ids).await?;
        Ok(changed.into_iter().map(|b| b.key().to_string()).collect())
    }

    /// Persist `bitmaps` in one batch, then publish them to the cache.
    async fn commit(&self, bitmaps: Vec<Bitmap>) -> Result<Vec<Bitmap>> {
        if bitmaps.is_empty() {
            return Ok(bitmaps);
        }
        let mut ops = Vec::with_capacity(bitmaps.len());
        for bitmap in &bitmaps {
            ops.push(WriteOp::put(&self.dataset, bitmap.key(), bitmap.serialize()?));
        }
        self.store.apply(ops).await?;

        let mut dirty = self.dirty.lock();
        for bitmap in &bitmaps {
            dirty.remove(bitmap.key());
            self.cache.insert(&self.dataset, bitmap.clone());
        }
        Ok(bitmaps)
    }

    /// Delete a bitmap. Returns `true` if it existed.
    pub async fn remove_bitmap(&self, key: &str) -> Result<bool> {
        let _guard = self.lock_key(key).await;
        let was_dirty = self.dirty.lock().contains(key);
        let existed = self.store.delete(&self.dataset, key).await? || was_dirty;
        self.dirty.lock().remove(key);
        self.cache.remove(&self.dataset, key);
        Ok(existed)
    }

    /// Move a bitmap to a new key. Fails if `from` is missing or `to` exists.
    pub async fn rename_bitmap(&self, from: &str, to: &str) -> Result<Bitmap> {
        Self::check_key(to)?;
        if from == to {
            return Err(Error::conflict(format!("bitmap '{}' renamed to itself", from)));
        }
        let keys: BTreeSet<String> = [from.to_string(), to.to_string()].into_iter().collect();
        let _guards = self.lock_keys(&keys).await;

        let source = self
            .load_locked(from)
            .await?
            .ok_or_else(|| Error::not_found("bitmap", from))?;
        if self.load_locked(to).await?.is_some() {
            return Err(Error::conflict(format!("bitmap '{}' already exists", to)));
        }
        let renamed = source.rekeyed(to);
        self.store
            .apply(vec![
                WriteOp::put(&self.dataset, to, renamed.serialize()?),
                WriteOp::delete(&self.dataset, from),
            ])
            .await?;

        {
            let mut dirty = self.dirty.lock();
            dirty.remove(from);
            dirty.remove(to);
        }
        self.cache.remove(&self.dataset, from);
        self.cache.insert(&self.dataset, renamed.clone());
        Ok(renamed)
    }

    /// Every key in the dataset, including deferred bitmaps not yet flushed.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self.store.keys(&self.dataset).await?.into_iter().collect();
        keys.extend(self.dirty.lock().iter().cloned());
        Ok(keys.into_iter().collect())
    }

    /// Persist every bitmap ticked with `implicit_save = false`.
    pub async fn flush(&self) -> Result<usize> {
        let keys: BTreeSet<String> = self.dirty.lock().clone();
        if keys.is_empty() {
            return Ok(0);
        }
        let _guards = self.lock_keys(&keys).await;
        let bitmaps: Vec<Bitmap> = keys
            .iter()
            .filter_map(|k| self.cache.get(&self.dataset, k))
            .collect();
        let count = self.commit(bitmaps).await?.len();
        tracing::debug!(dataset = %self.dataset, count, "flushed deferred bitmaps");
        Ok(count)
    }

    /// Drop one key from the cache. Unflushed bitmaps are kept.
    pub fn evict(&self, key: &str) -> bool {
        if self.dirty.lock().contains(key) {
            tracing::warn!(dataset = %self.dataset, key, "refusing to evict unflushed bitmap");
            return false;
        }
        self.cache.remove(&self.dataset, key);
        true
    }

    /// Drop this dataset's cached bitmaps, keeping unflushed ones.
    pub fn clear_cache(&self) {
        let dirty = self.dirty.lock().clone();
        self.cache.clear_dataset(&self.dataset, &dirty);
    }

    /// Intersection of the bitmaps at `keys`.
    ///
    /// An empty key list, or any key that is absent or empty, yields an
    /// empty result: intersecting with nothing is nothing.
    pub async fn and(&self, keys: &[String]) -> Result<Bitmap> {
        let mut acc: Option<RoaringBitmap> = None;
        for key in keys {
            let bitmap = match self.get_bitmap(key).await? {
                Some(b) if !b.is_empty() => b,
                _ => return Bitmap::from_roaring("AND", self.range, RoaringBitmap::new()),
            };
            acc = Some(match acc {
                None => bitmap.into_members(),
                Some(set) => set & bitmap.members(),
            });
            if acc.as_ref().is_some_and(RoaringBitmap::is_empty) {
                break;
            }
        }
        Bitmap::from_roaring("AND", self.range, acc.unwrap_or_default())
    }

    /// Union of the bitmaps at `keys`; absent keys are skipped.
    pub async fn or(&self, keys: &[String]) -> Result<Bitmap> {
        let mut acc = RoaringBitmap::new();
        for key in keys {
            if let Some(bitmap) = self.get_bitmap(key).await? {
                acc |= bitmap.members();
            }
        }
        Bitmap::from_roaring("OR", self.range, acc)
    }

    /// Symmetric difference is not supported.
    pub async fn xor(&self, _keys: &[String]) -> Result<Bitmap> {
        Err(Error::Unsupported("XOR over bitmap keys"))
    }

    /// Intersection of in-memory bitmaps, with the same empty identity as [`and`](Self::and).
    pub fn and_bitmaps(bitmaps: &[Bitmap]) -> RoaringBitmap {
        let mut iter = bitmaps.iter();
        let mut acc = match iter.next() {
            Some(first) => first.members().clone(),
            None => return RoaringBitmap::new(),
        };
        for bitmap in iter {
            acc &= bitmap.members();
        }
        acc
    }

    /// Union of in-memory bitmaps.
    pub fn or_bitmaps(bitmaps: &[Bitmap]) -> RoaringBitmap {
        let mut acc = RoaringBitmap::new();
        for bitmap in bitmaps {
            acc |= bitmap.members();
        }
        acc
    }
}
