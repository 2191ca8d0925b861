//! # Context Engine Core
//!
//! Shared, WASM-safe logic for Context Engine: range-constrained bitmaps,
//! layers, the context tree, url normalization, documents, the error
//! taxonomy, and the storage abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. It compiles to both native targets and
//! `wasm32-unknown-unknown`.

pub mod bitmap;
pub mod document;
pub mod error;
pub mod layer;
pub mod store;
pub mod tree;
pub mod url;

pub use bitmap::{Bitmap, BitmapRange};
pub use document::{ChecksumAlgorithm, Document, DocumentUpdate};
pub use error::{Error, Result};
pub use layer::{Layer, LayerOptions, LayerType, LayerUpdate};
pub use tree::{Tree, TreeNode, TreeView};
pub use url::{Url, UrlRules};
