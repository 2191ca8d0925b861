//! The persistent context tree.
//!
//! [`ContextTree`] wraps the structural [`Tree`] from the core crate with
//! name resolution through the [`LayerIndex`], layer auto-creation, and
//! whole-snapshot persistence.
//!
//! Every mutation is staged on a clone of the tree: new layer records
//! and the resulting snapshot are committed in one [`Store::apply`]
//! batch, and only then do the in-memory tree and layer registry change.
//! A rejected or failed mutation leaves both untouched.
//!
//! Paths are user-facing name paths (`/work/projecta`). A segment naming
//! an internal layer (`.user`, `.session`, ...) is only accepted as the
//! first segment, i.e. at the layer's fixed built-in position.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use context_engine_core::error::{Error, Result};
use context_engine_core::store::{Store, WriteOp};
use context_engine_core::url::{normalize_path, split_path};
use context_engine_core::{Layer, LayerOptions, Tree, TreeNode, TreeView};

use crate::layer_index::LayerIndex;

pub const TREE_DATASET: &str = "tree";
pub const TREE_KEY: &str = "default";

/// Layers resolved for a path, plus any that must be created with it.
struct Staged {
    ids: Vec<String>,
    layers: Vec<Layer>,
    created: Vec<Layer>,
}

pub struct ContextTree {
    store: Arc<dyn Store>,
    layers: Arc<LayerIndex>,
    tree: RwLock<Tree>,
    write: Mutex<()>,
}

impl ContextTree {
    /// Load the stored snapshot, or start from a bare root.
    ///
    /// Nodes bound to layers the index no longer knows are dropped (their
    /// children are promoted) and the repaired tree is written back.
    pub async fn open(store: Arc<dyn Store>, layers: Arc<LayerIndex>) -> Result<Self> {
        let mut tree = match store.get(TREE_DATASET, TREE_KEY).await? {
            Some(bytes) => Tree::from_snapshot_bytes(&bytes)?,
            None => Tree::new(),
        };

        let dropped = tree.retain_layers(|id| layers.get_layer_by_id(id).is_some());
        if !dropped.is_empty() {
            for id in &dropped {
                tracing::warn!(id = %id, "dropping tree node bound to unknown layer");
            }
            store.put(TREE_DATASET, TREE_KEY, &tree.to_snapshot()?).await?;
        }

        Ok(Self {
            store,
            layers,
            tree: RwLock::new(tree),
            write: Mutex::new(()),
        })
    }

    pub fn layers(&self) -> &Arc<LayerIndex> {
        &self.layers
    }

    fn segments(path: &str) -> Vec<String> {
        split_path(&normalize_path(path))
    }

    fn display(names: &[String]) -> String {
        format!("/{}", names.join("/"))
    }

    /// Map name segments to layers, staging new layers when allowed.
    ///
    /// Returns `None` when a segment has no layer and `auto_create` is off.
    fn stage(&self, names: &[String], auto_create: bool) -> Result<Option<Staged>> {
        let mut staged = Staged {
            ids: Vec::with_capacity(names.len()),
            layers: Vec::with_capacity(names.len()),
            created: Vec::new(),
        };
        for (depth, name) in names.iter().enumerate() {
            let layer = match self.layers.get_layer(name) {
                Some(layer) => layer,
                None => match staged.created.iter().find(|l| &l.name == name) {
                    Some(layer) => layer.clone(),
                    None if auto_create => {
                        let Some(layer) = self.layers.prepare(LayerOptions::named(name))? else {
                            return Err(Error::conflict(format!("layer '{}' already exists", name)));
                        };
                        staged.created.push(layer.clone());
                        layer
                    }
                    None => return Ok(None),
                },
            };
            if layer.is_root() {
                return Err(Error::validation(
                    "tree path",
                    "the root layer cannot appear below the root",
                ));
            }
            if layer.is_internal() && depth > 0 {
                return Err(Error::validation(
                    "tree path",
                    format!("internal layer '{}' is only reachable at its built-in path", layer.name),
                ));
            }
            staged.ids.push(layer.id.clone());
            staged.layers.push(layer);
        }
        Ok(Some(staged))
    }

    /// Ids of an existing path, or `NotFound`.
    fn existing_ids(&self, tree: &Tree, names: &[String]) -> Result<Vec<String>> {
        let ids = names
            .iter()
            .map(|n| self.layers.name_to_id(n))
            .collect::<Option<Vec<String>>>();
        match ids {
            Some(ids) if tree.contains_path(&ids) => Ok(ids),
            _ => Err(Error::not_found("tree path", Self::display(names))),
        }
    }

    /// Persist `next` together with `extra` writes, then publish it.
    async fn commit(&self, next: Tree, created: Vec<Layer>, extra: Vec<WriteOp>) -> Result<()> {
        let mut ops = Vec::with_capacity(created.len() + extra.len() + 1);
        for layer in &created {
            ops.push(LayerIndex::put_op(layer)?);
        }
        ops.extend(extra);
        ops.push(WriteOp::put(TREE_DATASET, TREE_KEY, next.to_snapshot()?));
        self.store.apply(ops).await?;

        for layer in &created {
            tracing::info!(id = %layer.id, name = %layer.name, "auto-created layer");
        }
        self.layers.register(created);
        *self.tree.write() = next;
        Ok(())
    }

    /// Make sure `path` exists and return the layers along it.
    ///
    /// Returns `Ok(None)` without changing anything if a segment has no
    /// layer and `auto_create` is off.
    pub async fn ensure_path(&self, path: &str, auto_create: bool) -> Result<Option<Vec<Layer>>> {
        let names = Self::segments(path);
        let _tree_guard = self.write.lock().await;
        let _layer_guard = self.layers.write_guard().await;

        let Some(staged) = self.stage(&names, auto_create)? else {
            return Ok(None);
        };
        let mut next = self.tree.read().clone();
        if !next.insert(&staged.ids) && staged.created.is_empty() {
            return Ok(Some(staged.layers));
        }
        self.commit(next, staged.created, Vec::new()).await?;
        tracing::info!(path = %Self::display(&names), "inserted tree path");
        Ok(Some(staged.layers))
    }

    /// Insert `path`, creating missing layers if `auto_create` is set.
    ///
    /// Returns `false` (and changes nothing) when a layer is missing and
    /// `auto_create` is off.
    pub async fn insert(&self, path: &str, auto_create: bool) -> Result<bool> {
        Ok(self.ensure_path(path, auto_create).await?.is_some())
    }

    /// Re-parent the node at `from` under `to`, creating `to` if needed.
    ///
    /// A non-recursive move leaves the node's children with its former parent.
    pub async fn move_path(&self, from: &str, to: &str, recursive: bool) -> Result<()> {
        let (from_names, to_names) = (Self::segments(from), Self::segments(to));
        let _tree_guard = self.write.lock().await;
        let _layer_guard = self.layers.write_guard().await;

        let mut next = self.tree.read().clone();
        let from_ids = self.existing_ids(&next, &from_names)?;
        let staged = self
            .stage(&to_names, true)?
            .ok_or_else(|| Error::not_found("tree path", Self::display(&to_names)))?;
        context_engine_core::tree::ensure_not_within(&from_ids, &staged.ids)?;

        next.insert(&staged.ids);
        next.move_node(&from_ids, &staged.ids, recursive)?;
        self.commit(next, staged.created, Vec::new()).await?;
        tracing::info!(
            from = %Self::display(&from_names),
            to = %Self::display(&to_names),
            recursive,
            "moved tree path"
        );
        Ok(())
    }

    /// Place a copy of the node at `from` under `to`, creating `to` if needed.
    ///
    /// The copy references the same layers as the source.
    pub async fn copy_path(&self, from: &str, to: &str, recursive: bool) -> Result<()> {
        let (from_names, to_names) = (Self::segments(from), Self::segments(to));
        let _tree_guard = self.write.lock().await;
        let _layer_guard = self.layers.write_guard().await;

        let mut next = self.tree.read().clone();
        let from_ids = self.existing_ids(&next, &from_names)?;
        let staged = self
            .stage(&to_names, true)?
            .ok_or_else(|| Error::not_found("tree path", Self::display(&to_names)))?;
        context_engine_core::tree::ensure_not_within(&from_ids, &staged.ids)?;

        next.insert(&staged.ids);
        next.copy_node(&from_ids, &staged.ids, recursive)?;
        self.commit(next, staged.created, Vec::new()).await?;
        tracing::info!(
            from = %Self::display(&from_names),
            to = %Self::display(&to_names),
            recursive,
            "copied tree path"
        );
        Ok(())
    }

    /// Remove the node at `path`.
    ///
    /// Without `recursive` its children move up to its former parent.
    /// Layers are never removed here.
    pub async fn remove_path(&self, path: &str, recursive: bool) -> Result<()> {
        let names = Self::segments(path);
        let _tree_guard = self.write.lock().await;

        let mut next = self.tree.read().clone();
        let ids = self.existing_ids(&next, &names)?;
        next.remove(&ids, recursive)?;
        self.commit(next, Vec::new(), Vec::new()).await?;
        tracing::info!(path = %Self::display(&names), recursive, "removed tree path");
        Ok(())
    }

    /// Remove a layer and every childless tree node bound to it.
    ///
    /// Fails with `Locked` for locked layers, and with `Conflict` while the
    /// layer still anchors a subtree anywhere in the tree: callers must
    /// move or remove those children first. This is the only place that
    /// rule is enforced.
    pub async fn remove_layer(&self, name: &str) -> Result<Layer> {
        let _tree_guard = self.write.lock().await;
        let _layer_guard = self.layers.write_guard().await;

        let layer = self
            .layers
            .get_layer(name)
            .ok_or_else(|| Error::not_found("layer", name))?;
        layer.check_removable()?;

        let mut next = self.tree.read().clone();
        for ids in next.paths_of(&layer.id) {
            if next.get_node(&ids).is_some_and(TreeNode::has_children) {
                return Err(Error::conflict(format!(
                    "layer '{}' still anchors a subtree at {}",
                    layer.name,
                    self.display_ids(&ids)
                )));
            }
        }
        let detached = next.remove_leaves_of(&layer.id);

        self.commit(next, Vec::new(), vec![LayerIndex::delete_op(&layer)])
            .await?;
        self.layers.unregister(&layer.id);
        tracing::info!(id = %layer.id, name = %layer.name, detached, "removed layer");
        Ok(layer)
    }

    /// Rename a layer; every path through it follows automatically.
    pub async fn rename_layer(&self, name: &str, new_name: &str) -> Result<Layer> {
        self.layers.rename_layer(name, new_name).await
    }

    /// Copy of the node at `path`, if it exists.
    pub fn get_node(&self, path: &str) -> Option<TreeNode> {
        let names = Self::segments(path);
        let tree = self.tree.read();
        let ids = self.existing_ids(&tree, &names).ok()?;
        tree.get_node(&ids).cloned()
    }

    pub fn path_exists(&self, path: &str) -> bool {
        self.get_node(path).is_some()
    }

    /// Layers along an existing path, root excluded.
    pub fn resolve_layers(&self, path: &str) -> Result<Vec<Layer>> {
        let names = Self::segments(path);
        let ids = self.existing_ids(&self.tree.read(), &names)?;
        ids.iter()
            .map(|id| {
                self.layers
                    .get_layer_by_id(id)
                    .ok_or_else(|| Error::not_found("layer", id.clone()))
            })
            .collect()
    }

    fn display_ids(&self, ids: &[String]) -> String {
        let names: Vec<String> = ids
            .iter()
            .map(|id| self.layers.id_to_name(id).unwrap_or_else(|| id.clone()))
            .collect();
        Self::display(&names)
    }

    /// Every materialized path, depth-first.
    pub fn paths(&self) -> Vec<String> {
        let id_paths = self.tree.read().id_paths();
        id_paths.iter().map(|ids| self.display_ids(ids)).collect()
    }

    /// Every path at which `layer_id` is placed.
    pub fn layer_paths(&self, layer_id: &str) -> Vec<String> {
        let id_paths = self.tree.read().paths_of(layer_id);
        id_paths.iter().map(|ids| self.display_ids(ids)).collect()
    }

    /// Read-only view with layer metadata.
    pub fn view(&self) -> Option<TreeView> {
        let layers = self.layers.snapshot();
        self.tree.read().view(|id| layers.get(id))
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.view())?)
    }
}
