//! # Context Engine CLI (`ctx`)
//!
//! Operator interface over the context engine: database setup, the
//! context tree, layers, and documents.
//!
//! ## Usage
//!
//! ```bash
//! ctx --config ./config/ctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctx init` | Create the SQLite database and run schema migrations |
//! | `ctx tree show` | Print the context tree (`--json` for the external view) |
//! | `ctx tree insert <path>` | Create a path, auto-creating layers |
//! | `ctx tree move <from> <to>` | Re-parent a node (`--recursive` keeps its subtree) |
//! | `ctx tree copy <from> <to>` | Place a copy of a node, sharing its layers |
//! | `ctx tree remove <path>` | Remove a node (`--recursive` drops its subtree) |
//! | `ctx layer list` | List layers and where they are placed |
//! | `ctx layer create <name>` | Create a layer |
//! | `ctx layer rename <name> <new>` | Rename a layer |
//! | `ctx layer remove <name>` | Remove a layer |
//! | `ctx doc insert <url>` | Insert a JSON document into a context |
//! | `ctx doc list <url>` | List documents in a context |
//! | `ctx doc get <id>` | Print one document |
//! | `ctx doc remove <url> <id>` | Detach a document from a context |
//! | `ctx doc delete <id>` | Purge a document everywhere |
//! | `ctx stats` | Show counts |
//!
//! ## Examples
//!
//! ```bash
//! ctx init
//! ctx doc insert /work/projectA --schema note --data '{"title": "kickoff"}'
//! ctx doc list /work/projectA --feature note
//! ctx tree move /work/projecta /archive --recursive
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` to change the level.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use context_engine::config;
use context_engine::layer_cmd::CreateLayerArgs;
use context_engine::{doc_cmd, layer_cmd, migrate, stats, tree_cmd};

/// Context Engine CLI — hierarchical contexts over a bitmap-indexed
/// document store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ctx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ctx",
    about = "Context Engine — hierarchical contexts over a bitmap-indexed document store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ctx.toml`. When the file does not exist, all
    /// defaults are used with the database at `./data/ctx.sqlite`.
    #[arg(long, global = true, default_value = "./config/ctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and its tables. This command is
    /// idempotent; running it multiple times is safe.
    Init,

    /// Inspect and reshape the context tree.
    Tree {
        #[command(subcommand)]
        action: TreeAction,
    },

    /// Manage layers.
    Layer {
        #[command(subcommand)]
        action: LayerAction,
    },

    /// Insert, list, and remove documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Show document, layer, and bitmap counts.
    Stats,
}

#[derive(Subcommand)]
enum TreeAction {
    /// Print the tree.
    Show {
        /// Print the external JSON view instead of an outline.
        #[arg(long)]
        json: bool,
    },
    /// Create a path.
    Insert {
        path: String,
        /// Fail instead of creating missing layers.
        #[arg(long)]
        no_create: bool,
    },
    /// Re-parent a node under another path (created if missing).
    Move {
        from: String,
        to: String,
        /// Move the whole subtree; otherwise children stay behind.
        #[arg(long)]
        recursive: bool,
    },
    /// Place a copy of a node under another path.
    Copy {
        from: String,
        to: String,
        /// Copy the whole subtree.
        #[arg(long)]
        recursive: bool,
    },
    /// Remove a node.
    Remove {
        path: String,
        /// Remove the whole subtree; otherwise children move up.
        #[arg(long)]
        recursive: bool,
    },
}

#[derive(Subcommand)]
enum LayerAction {
    /// List all layers.
    List,
    /// Create a layer without placing it in the tree.
    Create {
        name: String,
        /// One of workspace, canvas, context, label.
        #[arg(long = "type")]
        layer_type: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// `#rgb` or `#rrggbb`.
        #[arg(long)]
        color: Option<String>,
    },
    /// Rename a layer.
    Rename { name: String, new_name: String },
    /// Remove a layer. Fails while it anchors a subtree.
    Remove { name: String },
}

#[derive(Subcommand)]
enum DocAction {
    /// Insert a JSON document at a context url.
    Insert {
        url: String,
        #[arg(long)]
        schema: String,
        /// JSON payload.
        #[arg(long)]
        data: String,
        /// Extra feature ids (repeatable).
        #[arg(long = "feature")]
        features: Vec<String>,
    },
    /// List documents at a context url.
    List {
        url: String,
        #[arg(long = "feature")]
        features: Vec<String>,
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Print a document.
    Get { id: u32 },
    /// Detach a document from a context; the record is kept.
    Remove { url: String, id: u32 },
    /// Delete a document and every membership it has.
    Delete { id: u32 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("context_engine=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        config::Config::minimal()
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Tree { action } => match action {
            TreeAction::Show { json } => tree_cmd::run_tree_show(&cfg, json).await?,
            TreeAction::Insert { path, no_create } => {
                tree_cmd::run_tree_insert(&cfg, &path, !no_create).await?
            }
            TreeAction::Move {
                from,
                to,
                recursive,
            } => tree_cmd::run_tree_move(&cfg, &from, &to, recursive).await?,
            TreeAction::Copy {
                from,
                to,
                recursive,
            } => tree_cmd::run_tree_copy(&cfg, &from, &to, recursive).await?,
            TreeAction::Remove { path, recursive } => {
                tree_cmd::run_tree_remove(&cfg, &path, recursive).await?
            }
        },
        Commands::Layer { action } => match action {
            LayerAction::List => layer_cmd::run_layer_list(&cfg).await?,
            LayerAction::Create {
                name,
                layer_type,
                label,
                description,
                color,
            } => {
                layer_cmd::run_layer_create(
                    &cfg,
                    CreateLayerArgs {
                        name,
                        layer_type,
                        label,
                        description,
                        color,
                    },
                )
                .await?
            }
            LayerAction::Rename { name, new_name } => {
                layer_cmd::run_layer_rename(&cfg, &name, &new_name).await?
            }
            LayerAction::Remove { name } => layer_cmd::run_layer_remove(&cfg, &name).await?,
        },
        Commands::Doc { action } => match action {
            DocAction::Insert {
                url,
                schema,
                data,
                features,
            } => doc_cmd::run_doc_insert(&cfg, &url, &schema, &data, &features).await?,
            DocAction::List {
                url,
                features,
                filters,
            } => doc_cmd::run_doc_list(&cfg, &url, &features, &filters).await?,
            DocAction::Get { id } => doc_cmd::run_doc_get(&cfg, id).await?,
            DocAction::Remove { url, id } => doc_cmd::run_doc_remove(&cfg, &url, id).await?,
            DocAction::Delete { id } => doc_cmd::run_doc_delete(&cfg, id).await?,
        },
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}
