//! Database statistics overview.
//!
//! Gives a quick summary of what is stored: documents, layers, tree
//! paths, and bitmaps per dataset. Used by `ctx stats`.

use anyhow::Result;

use crate::config::Config;
use crate::engine::Engine;

/// Run the stats command: open the engine and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let engine = Engine::open(config).await?;
    let stats = engine.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Context Engine — Database Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Layers:      {}", stats.layers);
    println!("  Tree paths:  {}", stats.tree_paths);
    println!();
    println!("  Bitmaps:");
    println!("    context    {:>6}", stats.context_bitmaps);
    println!("    features   {:>6}", stats.feature_bitmaps);
    println!("    filters    {:>6}", stats.filter_bitmaps);
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
