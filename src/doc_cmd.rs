//! `ctx doc` subcommands.
//!
//! Each command opens a short-lived context at the given url and works
//! through it, so documents pick up the url's context and feature ids
//! exactly as an interactive session would.

use anyhow::{bail, Context as _, Result};

use context_engine_core::Document;

use crate::config::Config;
use crate::engine::Engine;

const CLI_SESSION: &str = "cli";

pub async fn run_doc_insert(
    config: &Config,
    url: &str,
    schema: &str,
    data: &str,
    features: &[String],
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(data).with_context(|| "--data must be valid JSON")?;
    let engine = Engine::open(config).await?;
    let ctx = engine
        .contexts()
        .create_context(CLI_SESSION, Some(url), true)
        .await?;

    let mut doc = Document::new(schema, payload);
    doc.features.extend(features.iter().cloned());
    let doc = ctx.insert_document(doc, None, None).await?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

pub async fn run_doc_list(
    config: &Config,
    url: &str,
    features: &[String],
    filters: &[String],
) -> Result<()> {
    let engine = Engine::open(config).await?;
    let ctx = engine
        .contexts()
        .create_context(CLI_SESSION, Some(url), false)
        .await?;

    let features = (!features.is_empty()).then_some(features);
    let filters = (!filters.is_empty()).then_some(filters);
    let docs = ctx.list_documents(None, features, filters).await?;

    if docs.is_empty() {
        println!("No documents in {}.", ctx.url());
        return Ok(());
    }
    println!("{:<12} {:<12} {:<20} {}", "ID", "SCHEMA", "UPDATED", "FEATURES");
    println!("{}", "-".repeat(70));
    for doc in &docs {
        println!(
            "{:<12} {:<12} {:<20} {}",
            doc.id,
            doc.schema,
            doc.updated_at.format("%Y-%m-%d %H:%M"),
            doc.features.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    println!();
    println!("{} document(s) in {}", docs.len(), ctx.url());
    Ok(())
}

pub async fn run_doc_get(config: &Config, id: u32) -> Result<()> {
    let engine = Engine::open(config).await?;
    match engine.index().get_document(id).await? {
        Some(doc) => {
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        None => bail!("document not found: {}", id),
    }
}

pub async fn run_doc_remove(config: &Config, url: &str, id: u32) -> Result<()> {
    let engine = Engine::open(config).await?;
    let ctx = engine
        .contexts()
        .create_context(CLI_SESSION, Some(url), false)
        .await?;
    if !ctx.remove_document(id, None, None).await? {
        bail!("document not found: {}", id);
    }
    println!("Removed document {} from {}", id, ctx.url());
    Ok(())
}

pub async fn run_doc_delete(config: &Config, id: u32) -> Result<()> {
    let engine = Engine::open(config).await?;
    if !engine.index().delete_document(id).await? {
        bail!("document not found: {}", id);
    }
    println!("Deleted document {}", id);
    Ok(())
}
