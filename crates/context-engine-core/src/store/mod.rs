//! Storage abstraction for Context Engine.
//!
//! The [`Store`] trait is the only persistence contract the engine
//! depends on: keyed byte values grouped into named datasets, an atomic
//! write batch, and an atomic counter. Any backend satisfying it (SQLite,
//! in-memory, a remote key-value service) can host the bitmaps, layers,
//! tree snapshots, and documents.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get`](Store::get) | Read one value |
//! | [`get_many`](Store::get_many) | Read several values, preserving order |
//! | [`put`](Store::put) | Write one value |
//! | [`delete`](Store::delete) | Remove one value |
//! | [`keys`](Store::keys) | List the keys of a dataset |
//! | [`apply`](Store::apply) | Commit a batch of writes all-or-nothing |
//! | [`increment`](Store::increment) | Atomically bump a named counter |

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

/// A single write inside an atomic [`Store::apply`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        dataset: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        dataset: String,
        key: String,
    },
}

impl WriteOp {
    pub fn put(dataset: &str, key: &str, value: Vec<u8>) -> Self {
        WriteOp::Put {
            dataset: dataset.to_string(),
            key: key.to_string(),
            value,
        }
    }

    pub fn delete(dataset: &str, key: &str) -> Self {
        WriteOp::Delete {
            dataset: dataset.to_string(),
            key: key.to_string(),
        }
    }
}

/// Abstract storage backend.
///
/// Failures must surface as [`Error::Storage`](crate::error::Error::Storage);
/// the engine never swallows them.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, dataset: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read several keys; the result is aligned with `keys`.
    async fn get_many(&self, dataset: &str, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(dataset, key).await?);
        }
        Ok(out)
    }

    async fn put(&self, dataset: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a key. Returns `true` if it existed.
    async fn delete(&self, dataset: &str, key: &str) -> Result<bool>;

    async fn has(&self, dataset: &str, key: &str) -> Result<bool> {
        Ok(self.get(dataset, key).await?.is_some())
    }

    /// All keys of a dataset, in ascending order.
    async fn keys(&self, dataset: &str) -> Result<Vec<String>>;

    /// Commit every write or none of them.
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Atomically increment a counter and return its new value (first call returns 1).
    async fn increment(&self, counter: &str) -> Result<u64>;
}
