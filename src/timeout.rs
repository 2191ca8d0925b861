//! Time-bounded [`Store`] wrapper.
//!
//! Every backend call made through [`TimeoutStore`] is raced against a
//! deadline; an expired call surfaces as [`Error::Timeout`], which callers
//! can treat as retryable.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use context_engine_core::error::{Error, Result};
use context_engine_core::store::{Store, WriteOp};

/// Wraps any store and bounds each call by `timeout`.
pub struct TimeoutStore {
    inner: Arc<dyn Store>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("storage call exceeded {:?}", self.timeout);
                Err(Error::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl Store for TimeoutStore {
    async fn get(&self, dataset: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.bounded(self.inner.get(dataset, key)).await
    }

    async fn get_many(&self, dataset: &str, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.bounded(self.inner.get_many(dataset, keys)).await
    }

    async fn put(&self, dataset: &str, key: &str, value: &[u8]) -> Result<()> {
        self.bounded(self.inner.put(dataset, key, value)).await
    }

    async fn delete(&self, dataset: &str, key: &str) -> Result<bool> {
        self.bounded(self.inner.delete(dataset, key)).await
    }

    async fn has(&self, dataset: &str, key: &str) -> Result<bool> {
        self.bounded(self.inner.has(dataset, key)).await
    }

    async fn keys(&self, dataset: &str) -> Result<Vec<String>> {
        self.bounded(self.inner.keys(dataset)).await
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        self.bounded(self.inner.apply(ops)).await
    }

    async fn increment(&self, counter: &str) -> Result<u64> {
        self.bounded(self.inner.increment(counter)).await
    }
}
