//! Documents: the content-addressed records the bitmaps annotate.
//!
//! A document's identity for deduplication is the checksum of its
//! content under the configured primary algorithm. Checksums are taken
//! over the canonical JSON encoding of `[schema, schema_version, data]`
//! with object keys sorted explicitly, so two payloads that differ only
//! in key order hash the same, and equal payloads under different
//! schemas do not.
//!
//! Binary documents keep their bytes in an external backend referenced
//! by `paths`; their checksums must be supplied by the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Lower-case hex digest of `bytes`.
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(Error::validation(
                "checksum algorithm",
                format!("unknown algorithm '{}'. Must be sha256 or sha512", other),
            )),
        }
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Assigned by the index on first insert; `0` until then.
    #[serde(default)]
    pub id: u32,
    pub schema: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub checksums: BTreeMap<ChecksumAlgorithm, String>,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Payload bytes live at `paths`; `data` only carries metadata.
    #[serde(default)]
    pub binary: bool,
    #[serde(default)]
    pub parent_id: Option<u32>,
    #[serde(default)]
    pub versions: Vec<u32>,
    #[serde(default = "default_version")]
    pub version_number: u32,
    #[serde(default = "default_version")]
    pub latest_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    1
}

fn default_version() -> u32 {
    1
}

/// Partial update merged by [`Document::apply_update`].
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub data: Option<serde_json::Value>,
    /// Added to the existing feature set.
    pub features: Vec<String>,
    /// Replaces the storage paths when set.
    pub paths: Option<Vec<String>>,
    /// Replaces supplied checksums (required for binary payloads).
    pub checksums: BTreeMap<ChecksumAlgorithm, String>,
}

impl Document {
    pub fn new(schema: impl Into<String>, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            schema: schema.into(),
            schema_version: default_schema_version(),
            checksums: BTreeMap::new(),
            features: BTreeSet::new(),
            paths: Vec::new(),
            data,
            binary: false,
            parent_id: None,
            versions: Vec::new(),
            version_number: 1,
            latest_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    /// Checksum of the canonical content encoding under `algorithm`.
    pub fn compute_checksum(&self, algorithm: ChecksumAlgorithm) -> Result<String> {
        let canonical = serde_json::to_vec(&(
            self.schema.as_str(),
            self.schema_version,
            canonicalize(&self.data),
        ))?;
        Ok(algorithm.digest(&canonical))
    }

    /// Fill in checksums for `algorithms` and validate the primary entry.
    ///
    /// JSON payloads are always re-hashed so stale digests cannot survive
    /// an update; binary payloads keep the digests the caller supplied.
    pub fn compute_checksums(
        &mut self,
        primary: ChecksumAlgorithm,
        algorithms: &[ChecksumAlgorithm],
    ) -> Result<()> {
        if self.binary {
            if !self.checksums.contains_key(&primary) {
                return Err(Error::validation(
                    "document",
                    format!("binary documents must supply a {} checksum", primary),
                ));
            }
            return Ok(());
        }
        self.checksums.clear();
        for &algorithm in algorithms.iter().chain(std::iter::once(&primary)) {
            let digest = self.compute_checksum(algorithm)?;
            self.checksums.insert(algorithm, digest);
        }
        Ok(())
    }

    pub fn primary_checksum(&self, primary: ChecksumAlgorithm) -> Option<&str> {
        self.checksums.get(&primary).map(String::as_str)
    }

    /// Reject documents the index cannot store.
    pub fn validate(&self) -> Result<()> {
        if self.schema.trim().is_empty() {
            return Err(Error::validation("document", "schema must not be empty"));
        }
        if self.schema_version == 0 {
            return Err(Error::validation("document", "schema_version must be >= 1"));
        }
        if !self.binary && self.data.is_null() {
            return Err(Error::validation("document", "data must not be null"));
        }
        if self.binary && self.paths.is_empty() {
            return Err(Error::validation(
                "document",
                "binary documents must reference at least one storage path",
            ));
        }
        if self.features.iter().any(|f| f.trim().is_empty()) {
            return Err(Error::validation("document", "features must not be empty strings"));
        }
        Ok(())
    }

    /// Every feature bitmap this document belongs to, schema first.
    pub fn feature_keys(&self) -> Vec<String> {
        let mut keys = vec![self.schema.clone()];
        for f in &self.features {
            if *f != self.schema {
                keys.push(f.clone());
            }
        }
        keys
    }

    /// Merge `update` and bump `updated_at`. Checksums must be recomputed afterwards.
    pub fn apply_update(&mut self, update: DocumentUpdate) {
        if let Some(data) = update.data {
            self.data = data;
        }
        self.features.extend(update.features);
        if let Some(paths) = update.paths {
            self.paths = paths;
        }
        if !update.checksums.is_empty() {
            self.checksums = update.checksums;
        }
        self.updated_at = Utc::now();
    }
}

/// Copy of `value` with every object's keys inserted in sorted order.
///
/// Does not depend on `serde_json::Map` being a sorted map, which stops
/// being true once the `preserve_order` feature is enabled.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&String, &serde_json::Value> = map.iter().collect();
            serde_json::Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
