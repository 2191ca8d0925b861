//! The context tree: a hierarchical namespace of layer ids.
//!
//! Nodes own their children, so the structure can never contain a cycle.
//! Paths are addressed here as slices of layer ids below the root (the
//! empty slice is the root itself); name resolution lives one level up,
//! in the application's `ContextTree`.
//!
//! When a node lands under a parent that already has a child bound to the
//! same layer, the two subtrees are merged instead of duplicated.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layer::{Layer, LayerType, ROOT_LAYER_ID};

/// A tree position bound to one layer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
        }
    }

    pub fn child(&self, id: &str) -> Option<&TreeNode> {
        self.children.iter().find(|c| c.id == id)
    }

    fn child_mut(&mut self, id: &str) -> Option<&mut TreeNode> {
        self.children.iter_mut().find(|c| c.id == id)
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    /// Attach `node`, merging into an existing child bound to the same layer.
    pub fn merge_child(&mut self, node: TreeNode) {
        match self.child_mut(&node.id) {
            Some(existing) => {
                for grandchild in node.children {
                    existing.merge_child(grandchild);
                }
            }
            None => self.children.push(node),
        }
    }

    fn remove_child(&mut self, id: &str) -> Option<TreeNode> {
        let pos = self.children.iter().position(|c| c.id == id)?;
        Some(self.children.remove(pos))
    }
}

/// Fail if `target` is `source` itself or lies below it.
///
/// Every operation that re-inserts an existing node checks this first.
pub fn ensure_not_within(source: &[String], target: &[String]) -> Result<()> {
    if target.starts_with(source) {
        return Err(Error::validation(
            "tree path",
            "target is the source node or one of its descendants",
        ));
    }
    Ok(())
}

/// A rooted tree of layer ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    root: TreeNode,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding only the root node.
    pub fn new() -> Self {
        Self {
            root: TreeNode::new(ROOT_LAYER_ID),
        }
    }

    /// Rebuild from a stored snapshot, requiring the built-in root.
    pub fn from_snapshot(root: TreeNode) -> Result<Self> {
        if root.id != ROOT_LAYER_ID {
            return Err(Error::corrupt(
                "tree",
                format!("root node is bound to '{}', not the root layer", root.id),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Snapshot for storage: nested `{id, children}`.
    pub fn to_snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.root)?)
    }

    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self> {
        let root: TreeNode = serde_json::from_slice(bytes)
            .map_err(|e| Error::corrupt("tree", e.to_string()))?;
        Self::from_snapshot(root)
    }

    pub fn get_node(&self, path: &[String]) -> Option<&TreeNode> {
        let mut node = &self.root;
        for id in path {
            node = node.child(id)?;
        }
        Some(node)
    }

    fn get_node_mut(&mut self, path: &[String]) -> Option<&mut TreeNode> {
        let mut node = &mut self.root;
        for id in path {
            node = node.child_mut(id)?;
        }
        Some(node)
    }

    pub fn contains_path(&self, path: &[String]) -> bool {
        self.get_node(path).is_some()
    }

    /// Create every missing node along `path`. Returns `true` if anything was created.
    pub fn insert(&mut self, path: &[String]) -> bool {
        let mut created = false;
        let mut node = &mut self.root;
        for id in path {
            if node.child(id).is_none() {
                node.children.push(TreeNode::new(id.clone()));
                created = true;
            }
            node = match node.child_mut(id) {
                Some(child) => child,
                None => unreachable!("child was just ensured"),
            };
        }
        created
    }

    /// Attach an existing subtree under `parent`.
    pub fn insert_node(&mut self, parent: &[String], node: TreeNode) -> Result<()> {
        let parent_node = self
            .get_node_mut(parent)
            .ok_or_else(|| Error::not_found("tree path", display_ids(parent)))?;
        parent_node.merge_child(node);
        Ok(())
    }

    /// Detach the node at `path`.
    ///
    /// Non-recursive removal re-parents the node's children to its former
    /// parent; the returned node then has no children. Recursive removal
    /// returns the whole subtree.
    pub fn remove(&mut self, path: &[String], recursive: bool) -> Result<TreeNode> {
        let (id, parent_path) = path
            .split_last()
            .ok_or_else(|| Error::validation("tree path", "the root node cannot be removed"))?;
        let parent = self
            .get_node_mut(parent_path)
            .ok_or_else(|| Error::not_found("tree path", display_ids(path)))?;
        let mut node = parent
            .remove_child(id)
            .ok_or_else(|| Error::not_found("tree path", display_ids(path)))?;
        if !recursive {
            for child in std::mem::take(&mut node.children) {
                parent.merge_child(child);
            }
        }
        Ok(node)
    }

    /// Re-parent the node at `from` under the existing node at `to`.
    ///
    /// Non-recursive moves leave the node's children behind with its
    /// former parent.
    pub fn move_node(&mut self, from: &[String], to: &[String], recursive: bool) -> Result<()> {
        ensure_not_within(from, to)?;
        if !self.contains_path(to) {
            return Err(Error::not_found("tree path", display_ids(to)));
        }
        let node = self.remove(from, recursive)?;
        self.insert_node(to, node)
    }

    /// Place a copy of the node at `from` under `to`.
    ///
    /// Copies share layer identity with the source: only tree structure is cloned.
    pub fn copy_node(&mut self, from: &[String], to: &[String], recursive: bool) -> Result<()> {
        ensure_not_within(from, to)?;
        if from.is_empty() {
            return Err(Error::validation("tree path", "the root node cannot be copied"));
        }
        let source = self
            .get_node(from)
            .ok_or_else(|| Error::not_found("tree path", display_ids(from)))?;
        let copy = if recursive {
            source.clone()
        } else {
            TreeNode::new(source.id.clone())
        };
        self.insert_node(to, copy)
    }

    /// Every id path in the tree, depth-first, excluding the root.
    pub fn id_paths(&self) -> Vec<Vec<String>> {
        fn walk(node: &TreeNode, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
            for child in &node.children {
                prefix.push(child.id.clone());
                out.push(prefix.clone());
                walk(child, prefix, out);
                prefix.pop();
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut Vec::new(), &mut out);
        out
    }

    /// Id paths of every node bound to `layer_id`.
    pub fn paths_of(&self, layer_id: &str) -> Vec<Vec<String>> {
        self.id_paths()
            .into_iter()
            .filter(|p| p.last().map(String::as_str) == Some(layer_id))
            .collect()
    }

    pub fn contains_layer(&self, layer_id: &str) -> bool {
        layer_id == self.root.id || !self.paths_of(layer_id).is_empty()
    }

    /// Detach every childless node bound to `layer_id`; returns how many were removed.
    pub fn remove_leaves_of(&mut self, layer_id: &str) -> usize {
        fn walk(node: &mut TreeNode, layer_id: &str) -> usize {
            let before = node.children.len();
            node.children
                .retain(|c| !(c.id == layer_id && c.children.is_empty()));
            let mut removed = before - node.children.len();
            for child in &mut node.children {
                removed += walk(child, layer_id);
            }
            removed
        }
        walk(&mut self.root, layer_id)
    }

    /// Drop nodes whose layer fails `known`, promoting their children.
    ///
    /// Returns the ids that were dropped.
    pub fn retain_layers(&mut self, known: impl Fn(&str) -> bool) -> Vec<String> {
        fn walk(node: &mut TreeNode, known: &dyn Fn(&str) -> bool, dropped: &mut Vec<String>) {
            let mut kept: Vec<TreeNode> = Vec::new();
            let mut pending: Vec<TreeNode> = std::mem::take(&mut node.children);
            while let Some(child) = pending.pop() {
                if known(&child.id) {
                    kept.push(child);
                } else {
                    dropped.push(child.id);
                    pending.extend(child.children);
                }
            }
            kept.reverse();
            for child in kept {
                node.merge_child(child);
            }
            for child in &mut node.children {
                walk(child, known, dropped);
            }
        }
        let mut dropped = Vec::new();
        walk(&mut self.root, &known, &mut dropped);
        dropped
    }

    /// Read-only view with layer metadata, for external consumers.
    ///
    /// A node whose layer cannot be resolved is left out together with
    /// its subtree, with a warning.
    pub fn view<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Layer>) -> Option<TreeView> {
        fn build<'a>(node: &TreeNode, lookup: &dyn Fn(&str) -> Option<&'a Layer>) -> Option<TreeView> {
            let Some(layer) = lookup(&node.id) else {
                tracing::warn!(
                    id = %node.id,
                    children = node.children.len(),
                    "tree view skipping node bound to unknown layer"
                );
                return None;
            };
            Some(TreeView {
                id: layer.id.clone(),
                layer_type: layer.layer_type,
                name: layer.name.clone(),
                label: layer.label.clone(),
                description: layer.description.clone(),
                color: layer.color.clone(),
                locked: layer.locked,
                children: node
                    .children
                    .iter()
                    .filter_map(|c| build(c, lookup))
                    .collect(),
            })
        }
        build(&self.root, &lookup)
    }
}

/// External representation of a tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeView {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub name: String,
    pub label: String,
    pub description: String,
    pub color: Option<String>,
    pub locked: bool,
    pub children: Vec<TreeView>,
}

fn display_ids(path: &[String]) -> String {
    format!("/{}", path.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.insert(&p(&["a", "b", "c"]));
        tree.insert(&p(&["a", "d"]));
        tree
    }

    #[test]
    fn test_insert_creates_chain() {
        let mut tree = Tree::new();
        assert!(tree.insert(&p(&["a", "b", "c"])));
        assert!(!tree.insert(&p(&["a", "b"])));
        assert!(tree.contains_path(&p(&["a", "b", "c"])));
        assert_eq!(tree.root().descendant_count(), 3);
    }

    #[test]
    fn test_remove_non_recursive_reparents_children() {
        let mut tree = sample();
        let removed = tree.remove(&p(&["a", "b"]), false).unwrap();
        assert!(removed.children.is_empty());
        assert!(tree.contains_path(&p(&["a", "c"])));
        assert!(!tree.contains_path(&p(&["a", "b"])));
    }

    #[test]
    fn test_remove_recursive_drops_subtree() {
        let mut tree = sample();
        let removed = tree.remove(&p(&["a", "b"]), true).unwrap();
        assert_eq!(removed.descendant_count(), 1);
        assert!(!tree.contains_path(&p(&["a", "c"])));
        assert!(tree.contains_path(&p(&["a", "d"])));
    }

    #[test]
    fn test_remove_root_and_missing() {
        let mut tree = sample();
        assert!(matches!(tree.remove(&[], true), Err(Error::Validation { .. })));
        assert!(matches!(
            tree.remove(&p(&["zzz"]), true),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_move_recursive_keeps_subtree() {
        let mut tree = sample();
        tree.move_node(&p(&["a", "b"]), &p(&["a", "d"]), true).unwrap();
        assert!(tree.contains_path(&p(&["a", "d", "b", "c"])));
        assert!(!tree.contains_path(&p(&["a", "b"])));
    }

    #[test]
    fn test_move_non_recursive_flattens_one_level() {
        let mut tree = sample();
        tree.move_node(&p(&["a", "b"]), &p(&["a", "d"]), false).unwrap();
        assert!(tree.contains_path(&p(&["a", "d", "b"])));
        assert!(tree.contains_path(&p(&["a", "c"])));
        assert!(tree.get_node(&p(&["a", "d", "b"])).unwrap().children.is_empty());
    }

    #[test]
    fn test_move_into_descendant_rejected_both_modes() {
        for recursive in [true, false] {
            let mut tree = sample();
            let before = tree.clone();
            assert!(tree.move_node(&p(&["a"]), &p(&["a", "b"]), recursive).is_err());
            assert!(tree.move_node(&p(&["a"]), &p(&["a"]), recursive).is_err());
            assert_eq!(tree, before);
        }
    }

    #[test]
    fn test_move_merges_with_existing_child() {
        let mut tree = sample();
        tree.insert(&p(&["x", "b", "y"]));
        tree.move_node(&p(&["x", "b"]), &p(&["a"]), true).unwrap();
        let b = tree.get_node(&p(&["a", "b"])).unwrap();
        assert!(b.child("c").is_some());
        assert!(b.child("y").is_some());
        assert_eq!(tree.paths_of("b").len(), 1);
    }

    #[test]
    fn test_copy_shares_ids() {
        let mut tree = sample();
        tree.copy_node(&p(&["a", "b"]), &p(&["a", "d"]), true).unwrap();
        assert!(tree.contains_path(&p(&["a", "b", "c"])));
        assert!(tree.contains_path(&p(&["a", "d", "b", "c"])));
        assert_eq!(tree.paths_of("c").len(), 2);

        tree.insert(&p(&["e"]));
        tree.copy_node(&p(&["a", "b"]), &p(&["e"]), false).unwrap();
        assert!(tree.get_node(&p(&["e", "b"])).unwrap().children.is_empty());
        assert!(tree.copy_node(&p(&["a"]), &p(&["a", "d"]), true).is_err());
    }

    #[test]
    fn test_snapshot_round_trip_and_root_check() {
        let tree = sample();
        let bytes = tree.to_snapshot().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["id"], ROOT_LAYER_ID);
        assert_eq!(json["children"][0]["id"], "a");
        assert_eq!(Tree::from_snapshot_bytes(&bytes).unwrap(), tree);

        assert!(Tree::from_snapshot(TreeNode::new("nope")).is_err());
    }

    #[test]
    fn test_remove_leaves_of() {
        let mut tree = sample();
        tree.insert(&p(&["d"]));
        assert_eq!(tree.remove_leaves_of("d"), 2);
        assert_eq!(tree.remove_leaves_of("b"), 0);
        assert!(tree.contains_path(&p(&["a", "b", "c"])));
    }

    #[test]
    fn test_retain_layers_promotes_children() {
        let mut tree = sample();
        let dropped = tree.retain_layers(|id| id != "b");
        assert_eq!(dropped, vec!["b".to_string()]);
        assert!(tree.contains_path(&p(&["a", "c"])));
        assert!(tree.contains_path(&p(&["a", "d"])));
    }

    #[test]
    fn test_id_paths_depth_first() {
        let tree = sample();
        assert_eq!(
            tree.id_paths(),
            vec![p(&["a"]), p(&["a", "b"]), p(&["a", "b", "c"]), p(&["a", "d"])]
        );
    }

    #[test]
    fn test_view_skips_unknown_layers() {
        use crate::layer::LayerOptions;
        use std::collections::HashMap;

        let a = Layer::new(LayerOptions::named("a")).unwrap();
        let c = Layer::new(LayerOptions::named("c")).unwrap();
        let layers: HashMap<String, Layer> = Layer::builtins()
            .into_iter()
            .chain([a.clone(), c.clone()])
            .map(|l| (l.id.clone(), l))
            .collect();

        let mut tree = Tree::new();
        tree.insert(&[a.id.clone(), "ghost".to_string(), c.id.clone()]);
        tree.insert(&[c.id.clone()]);

        let view = tree.view(|id| layers.get(id)).unwrap();
        let names: Vec<&str> = view.children.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(view.children[0].children.is_empty());
    }
}
