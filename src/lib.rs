//! # Context Engine
//!
//! A local-first context engine: documents are tagged along three axes
//! (a hierarchical **context** path, **features**, and **filters**) and
//! queried by intersecting compressed bitmaps.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Context   │──▶│ ContextTree  │──▶│  LayerIndex  │
//! │ url, arrays │   │ name paths   │   │ name ↔ id    │
//! └──────┬──────┘   └──────────────┘   └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │    Index    │──▶│BitmapManager │──▶│    Store     │
//! │ documents   │   │ ×3 + cache   │   │ SQLite / mem │
//! └─────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! A url such as `universe:///work/projectA` is normalized, its path is
//! inserted into the tree (creating layers as needed), and the layer ids
//! along it become the context's tag ids. Documents inserted through the
//! context are ticked into those ids' bitmaps; listing intersects them.
//!
//! The data structures (bitmaps, layers, the tree, urls, documents, the
//! [`Store`](context_engine_core::store::Store) trait) live in the
//! `context-engine-core` crate and are re-exported as [`core`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` backend |
//! | [`timeout`] | Time-bounded `Store` wrapper |
//! | [`bitmap_manager`] | Persistent, cached bitmap collections |
//! | [`layer_index`] | Layer registry |
//! | [`tree`] | Persistent context tree |
//! | [`index`] | Content-addressed document index |
//! | [`events`] | Context notifications |
//! | [`context`] | Per-session contexts and their manager |
//! | [`engine`] | Component wiring |
//! | [`tree_cmd`], [`layer_cmd`], [`doc_cmd`], [`stats`] | `ctx` commands |

pub use context_engine_core as core;

pub mod bitmap_manager;
pub mod config;
pub mod context;
pub mod db;
pub mod doc_cmd;
pub mod engine;
pub mod events;
pub mod index;
pub mod layer_cmd;
pub mod layer_index;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;
pub mod timeout;
pub mod tree;
pub mod tree_cmd;
