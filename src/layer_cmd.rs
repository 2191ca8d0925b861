//! `ctx layer` subcommands.

use anyhow::Result;

use context_engine_core::{LayerOptions, LayerType};

use crate::config::Config;
use crate::engine::Engine;

pub async fn run_layer_list(config: &Config) -> Result<()> {
    let engine = Engine::open(config).await?;
    let layers = engine.layers().list_layers();

    println!(
        "{:<24} {:<10} {:<38} {:<6} {}",
        "NAME", "TYPE", "ID", "LOCK", "PATHS"
    );
    println!("{}", "-".repeat(90));
    for layer in &layers {
        let paths = engine.tree().layer_paths(&layer.id);
        println!(
            "{:<24} {:<10} {:<38} {:<6} {}",
            layer.name,
            layer.layer_type,
            layer.id,
            if layer.locked { "yes" } else { "" },
            paths.join(", ")
        );
    }
    println!();
    println!("{} layer(s)", layers.len());
    Ok(())
}

pub struct CreateLayerArgs {
    pub name: String,
    pub layer_type: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

pub async fn run_layer_create(config: &Config, args: CreateLayerArgs) -> Result<()> {
    let engine = Engine::open(config).await?;
    let layer_type = args
        .layer_type
        .as_deref()
        .map(str::parse::<LayerType>)
        .transpose()?;
    let options = LayerOptions {
        layer_type,
        label: args.label,
        description: args.description,
        color: args.color,
        ..LayerOptions::named(args.name.clone())
    };
    match engine.layers().create_layer(options).await? {
        Some(layer) => {
            println!("Created layer {} ({})", layer.name, layer.id);
            Ok(())
        }
        None => anyhow::bail!("layer '{}' already exists", args.name),
    }
}

pub async fn run_layer_rename(config: &Config, name: &str, new_name: &str) -> Result<()> {
    let engine = Engine::open(config).await?;
    let layer = engine.tree().rename_layer(name, new_name).await?;
    println!("Renamed {} -> {}", name, layer.name);
    Ok(())
}

pub async fn run_layer_remove(config: &Config, name: &str) -> Result<()> {
    let engine = Engine::open(config).await?;
    let layer = engine.remove_layer(name).await?;
    println!("Removed layer {} ({})", layer.name, layer.id);
    Ok(())
}
