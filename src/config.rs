//! TOML configuration parsing and validation.
//!
//! The configuration is loaded once at startup and passed down by
//! reference; nothing in the engine reads process-wide state.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/ctx.sqlite"
//! timeout_ms = 5000
//!
//! [index]
//! primary_checksum = "sha256"
//! checksum_algorithms = ["sha256"]
//! feature_mode = "or"
//! filter_mode = "and"
//!
//! [context]
//! max_contexts = 1024
//! default_url = "universe:///"
//!
//! [url]
//! protocol = "universe"
//! allowed_internal_segments = []
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use context_engine_core::bitmap::BitmapRange;
use context_engine_core::{ChecksumAlgorithm, UrlRules};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub url: UrlConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl DbConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How several requested feature or filter bitmaps combine.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    And,
    Or,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_primary_checksum")]
    pub primary_checksum: ChecksumAlgorithm,
    #[serde(default = "default_checksum_algorithms")]
    pub checksum_algorithms: Vec<ChecksumAlgorithm>,
    #[serde(default = "default_feature_mode")]
    pub feature_mode: MatchMode,
    #[serde(default = "default_filter_mode")]
    pub filter_mode: MatchMode,
    #[serde(default = "default_document_id_start")]
    pub document_id_start: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            primary_checksum: default_primary_checksum(),
            checksum_algorithms: default_checksum_algorithms(),
            feature_mode: default_feature_mode(),
            filter_mode: default_filter_mode(),
            document_id_start: default_document_id_start(),
        }
    }
}

fn default_primary_checksum() -> ChecksumAlgorithm {
    ChecksumAlgorithm::Sha256
}
fn default_checksum_algorithms() -> Vec<ChecksumAlgorithm> {
    vec![ChecksumAlgorithm::Sha256]
}
fn default_feature_mode() -> MatchMode {
    MatchMode::Or
}
fn default_filter_mode() -> MatchMode {
    MatchMode::And
}
fn default_document_id_start() -> u32 {
    BitmapRange::USER.min
}

impl IndexConfig {
    /// Member range of the context, feature, and filter bitmaps.
    pub fn document_range(&self) -> BitmapRange {
        BitmapRange {
            min: self.document_id_start,
            max: BitmapRange::USER.max,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_contexts")]
    pub max_contexts: usize,
    #[serde(default = "default_url")]
    pub default_url: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_contexts: default_max_contexts(),
            default_url: default_url(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_contexts() -> usize {
    1024
}
fn default_url() -> String {
    "universe:///".to_string()
}
fn default_event_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct UrlConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub allowed_internal_segments: Vec<String>,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            allowed_internal_segments: Vec::new(),
        }
    }
}

fn default_protocol() -> String {
    context_engine_core::url::DEFAULT_PROTOCOL.to_string()
}

impl UrlConfig {
    pub fn rules(&self) -> UrlRules {
        UrlRules {
            protocol: self.protocol.to_lowercase(),
            allowed_internal: self
                .allowed_internal_segments
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
        }
    }
}

impl Config {
    /// All defaults, with the database in `./data/ctx.sqlite`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/ctx.sqlite"),
                timeout_ms: default_timeout_ms(),
            },
            index: IndexConfig::default(),
            context: ContextConfig::default(),
            url: UrlConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.db.timeout_ms == 0 {
        anyhow::bail!("db.timeout_ms must be > 0");
    }

    if !config
        .index
        .checksum_algorithms
        .contains(&config.index.primary_checksum)
    {
        anyhow::bail!(
            "index.checksum_algorithms must include the primary checksum '{}'",
            config.index.primary_checksum
        );
    }

    if config.index.document_id_start < BitmapRange::USER.min {
        anyhow::bail!(
            "index.document_id_start must be >= {} (lower ids are reserved)",
            BitmapRange::USER.min
        );
    }

    if config.context.max_contexts == 0 {
        anyhow::bail!("context.max_contexts must be >= 1");
    }

    if config.context.event_capacity == 0 {
        anyhow::bail!("context.event_capacity must be >= 1");
    }

    let proto = &config.url.protocol;
    if proto.is_empty() || !proto.chars().all(|c| c.is_ascii_alphanumeric()) {
        anyhow::bail!("url.protocol must be a non-empty alphanumeric string");
    }

    for segment in &config.url.allowed_internal_segments {
        if !segment.trim().starts_with('.') {
            anyhow::bail!(
                "url.allowed_internal_segments entries must start with '.', got '{}'",
                segment
            );
        }
    }

    config
        .url
        .rules()
        .parse(&config.context.default_url, None)
        .map_err(|e| anyhow::anyhow!("context.default_url is invalid: {}", e))?;

    Ok(())
}
