//! In-memory [`Store`] implementation for testing and WASM targets.
//!
//! Uses `BTreeMap`s behind a single `std::sync::RwLock`, so every batch
//! applied through [`Store::apply`] is trivially atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{Store, WriteOp};

#[derive(Default)]
struct Inner {
    datasets: HashMap<String, BTreeMap<String, Vec<u8>>>,
    counters: HashMap<String, u64>,
}

/// In-memory store for testing and WASM environments.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values held in `dataset`.
    pub fn len(&self, dataset: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.datasets.get(dataset).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::storage("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, dataset: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .datasets
            .get(dataset)
            .and_then(|d| d.get(key))
            .cloned())
    }

    async fn put(&self, dataset: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .datasets
            .entry(dataset.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, dataset: &str, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        Ok(inner
            .datasets
            .get_mut(dataset)
            .and_then(|d| d.remove(key))
            .is_some())
    }

    async fn keys(&self, dataset: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .datasets
            .get(dataset)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        for op in ops {
            match op {
                WriteOp::Put {
                    dataset,
                    key,
                    value,
                } => {
                    inner.datasets.entry(dataset).or_default().insert(key, value);
                }
                WriteOp::Delete { dataset, key } => {
                    if let Some(d) = inner.datasets.get_mut(&dataset) {
                        d.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn increment(&self, counter: &str) -> Result<u64> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let value = inner.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryStore::new();
        assert!(store.get("docs", "1").await.unwrap().is_none());
        store.put("docs", "1", b"one").await.unwrap();
        assert_eq!(store.get("docs", "1").await.unwrap().unwrap(), b"one");
        assert!(store.has("docs", "1").await.unwrap());
        assert!(!store.has("other", "1").await.unwrap());
        assert!(store.delete("docs", "1").await.unwrap());
        assert!(!store.delete("docs", "1").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_sorted_and_get_many() {
        let store = InMemoryStore::new();
        store.put("d", "b", b"2").await.unwrap();
        store.put("d", "a", b"1").await.unwrap();
        assert_eq!(store.keys("d").await.unwrap(), vec!["a", "b"]);

        let got = store
            .get_many("d", &["b".into(), "zz".into(), "a".into()])
            .await
            .unwrap();
        assert_eq!(got, vec![Some(b"2".to_vec()), None, Some(b"1".to_vec())]);
    }

    #[tokio::test]
    async fn test_apply_batch() {
        let store = InMemoryStore::new();
        store.put("d", "gone", b"x").await.unwrap();
        store
            .apply(vec![
                WriteOp::put("d", "a", b"1".to_vec()),
                WriteOp::put("e", "b", b"2".to_vec()),
                WriteOp::delete("d", "gone"),
            ])
            .await
            .unwrap();
        assert_eq!(store.len("d"), 1);
        assert_eq!(store.len("e"), 1);
    }

    #[tokio::test]
    async fn test_increment_starts_at_one() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("c").await.unwrap(), 1);
        assert_eq!(store.increment("c").await.unwrap(), 2);
        assert_eq!(store.increment("other").await.unwrap(), 1);
    }
}
