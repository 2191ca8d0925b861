//! `ctx tree` subcommands: inspect and reshape the context tree.

use anyhow::Result;

use context_engine_core::TreeView;

use crate::config::Config;
use crate::engine::Engine;

/// Print the tree, indented by depth, or as JSON.
pub async fn run_tree_show(config: &Config, json: bool) -> Result<()> {
    let engine = Engine::open(config).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&engine.tree().to_json()?)?);
        return Ok(());
    }
    match engine.tree().view() {
        Some(view) => print_node(&view, 0),
        None => println!("(empty tree)"),
    }
    Ok(())
}

fn print_node(node: &TreeView, depth: usize) {
    let lock = if node.locked { " [locked]" } else { "" };
    println!(
        "{}{}  ({}, {}){}",
        "  ".repeat(depth),
        node.name,
        node.layer_type,
        node.id,
        lock
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

pub async fn run_tree_insert(config: &Config, path: &str, create: bool) -> Result<()> {
    let engine = Engine::open(config).await?;
    if engine.tree().insert(path, create).await? {
        println!("Inserted {}", path);
        Ok(())
    } else {
        anyhow::bail!(
            "path {} names a layer that does not exist (run without --no-create to create it)",
            path
        )
    }
}

pub async fn run_tree_move(config: &Config, from: &str, to: &str, recursive: bool) -> Result<()> {
    let engine = Engine::open(config).await?;
    engine.tree().move_path(from, to, recursive).await?;
    println!("Moved {} -> {}", from, to);
    Ok(())
}

pub async fn run_tree_copy(config: &Config, from: &str, to: &str, recursive: bool) -> Result<()> {
    let engine = Engine::open(config).await?;
    engine.tree().copy_path(from, to, recursive).await?;
    println!("Copied {} -> {}", from, to);
    Ok(())
}

pub async fn run_tree_remove(config: &Config, path: &str, recursive: bool) -> Result<()> {
    let engine = Engine::open(config).await?;
    engine.tree().remove_path(path, recursive).await?;
    println!("Removed {}", path);
    Ok(())
}
