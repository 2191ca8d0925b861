//! Layers: the named tag records that make up the context namespace.
//!
//! A layer's own id doubles as its context-bitmap key. Layers also carry
//! the feature and filter bitmap ids that a context inherits when its
//! path passes through the layer.
//!
//! Built-in layers are seeded at startup with fixed ids and are
//! permanently locked.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::url::sanitize_segment;

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_LABEL_LEN: usize = 32;
pub const MAX_DESCRIPTION_LEN: usize = 255;

pub const ROOT_LAYER_ID: &str = "00000000-0000-4000-8000-000000000000";
pub const CANVAS_LAYER_ID: &str = "00000000-0000-4000-8000-000000000001";
pub const DEVICE_LAYER_ID: &str = "00000000-0000-4000-8000-000000000002";
pub const USER_LAYER_ID: &str = "00000000-0000-4000-8000-000000000003";
pub const SESSION_LAYER_ID: &str = "00000000-0000-4000-8000-000000000004";

pub const ROOT_LAYER_NAME: &str = "/";

/// Fixed `(id, name, type, description)` of every built-in layer.
const BUILTINS: [(&str, &str, LayerType, &str); 5] = [
    (ROOT_LAYER_ID, ROOT_LAYER_NAME, LayerType::Universe, "Root of the context tree"),
    (CANVAS_LAYER_ID, ".canvas", LayerType::System, "Canvas internals"),
    (DEVICE_LAYER_ID, ".device", LayerType::System, "Current device"),
    (USER_LAYER_ID, ".user", LayerType::System, "Current user"),
    (SESSION_LAYER_ID, ".session", LayerType::System, "Current session"),
];

/// The fixed set of layer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Universe,
    System,
    Workspace,
    Canvas,
    Context,
    Label,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Universe => "universe",
            LayerType::System => "system",
            LayerType::Workspace => "workspace",
            LayerType::Canvas => "canvas",
            LayerType::Context => "context",
            LayerType::Label => "label",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "universe" => Ok(LayerType::Universe),
            "system" => Ok(LayerType::System),
            "workspace" => Ok(LayerType::Workspace),
            "canvas" => Ok(LayerType::Canvas),
            "context" => Ok(LayerType::Context),
            "label" => Ok(LayerType::Label),
            other => Err(Error::validation(
                "layer type",
                format!(
                    "unknown type '{}'. Must be universe, system, workspace, canvas, context, or label",
                    other
                ),
            )),
        }
    }
}

/// A named, typed tag record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub feature_bitmaps: Vec<String>,
    #[serde(default)]
    pub filter_bitmaps: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Construction parameters for [`Layer::new`].
#[derive(Debug, Clone, Default)]
pub struct LayerOptions {
    pub name: String,
    pub layer_type: Option<LayerType>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub locked: bool,
    pub feature_bitmaps: Vec<String>,
    pub filter_bitmaps: Vec<String>,
}

impl LayerOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update applied by [`Layer::apply_update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct LayerUpdate {
    pub label: Option<String>,
    pub description: Option<String>,
    pub color: Option<Option<String>>,
    pub feature_bitmaps: Option<Vec<String>>,
    pub filter_bitmaps: Option<Vec<String>>,
}

impl Layer {
    /// Validate `options` and build a new unlocked-by-default layer with a fresh id.
    pub fn new(options: LayerOptions) -> Result<Self> {
        let name = validate_name(&options.name)?;
        let label = match options.label {
            Some(label) => validate_label(&label)?,
            None => validate_label(options.name.trim())?,
        };
        let description = validate_description(options.description.as_deref().unwrap_or(""))?;
        let color = options.color.as_deref().map(validate_color).transpose()?;
        let layer_type = options.layer_type.unwrap_or(LayerType::Context);
        if matches!(layer_type, LayerType::Universe | LayerType::System) {
            return Err(Error::validation(
                "layer",
                format!("type '{}' is reserved for built-in layers", layer_type),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            layer_type,
            name,
            label,
            description,
            color,
            locked: options.locked,
            feature_bitmaps: dedup(options.feature_bitmaps),
            filter_bitmaps: dedup(options.filter_bitmaps),
            created_at: now,
            updated_at: now,
        })
    }

    /// All built-in layers, locked, with their fixed ids.
    pub fn builtins() -> Vec<Layer> {
        let now = Utc::now();
        BUILTINS
            .iter()
            .map(|(id, name, layer_type, description)| Layer {
                id: id.to_string(),
                layer_type: *layer_type,
                name: name.to_string(),
                label: name.to_string(),
                description: description.to_string(),
                color: None,
                locked: true,
                feature_bitmaps: Vec::new(),
                filter_bitmaps: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .collect()
    }

    pub fn is_builtin_id(id: &str) -> bool {
        BUILTINS.iter().any(|(builtin, ..)| *builtin == id)
    }

    pub fn is_builtin(&self) -> bool {
        Self::is_builtin_id(&self.id)
    }

    /// Internal layers are only reachable through their fixed built-in path.
    pub fn is_internal(&self) -> bool {
        self.layer_type == LayerType::System
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_LAYER_ID
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked {
            Err(Error::locked(&self.name))
        } else {
            Ok(())
        }
    }

    /// Rename in place. Fails on locked layers and invalid names.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        self.ensure_unlocked()?;
        self.name = validate_name(new_name)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a partial update. Fails on locked layers; validates before mutating.
    pub fn apply_update(&mut self, update: LayerUpdate) -> Result<()> {
        self.ensure_unlocked()?;
        let label = update.label.as_deref().map(validate_label).transpose()?;
        let description = update
            .description
            .as_deref()
            .map(validate_description)
            .transpose()?;
        let color = match update.color {
            Some(Some(c)) => Some(Some(validate_color(&c)?)),
            Some(None) => Some(None),
            None => None,
        };

        if let Some(label) = label {
            self.label = label;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(color) = color {
            self.color = color;
        }
        if let Some(features) = update.feature_bitmaps {
            self.feature_bitmaps = dedup(features);
        }
        if let Some(filters) = update.filter_bitmaps {
            self.filter_bitmaps = dedup(filters);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Fail unless the layer may be removed.
    pub fn check_removable(&self) -> Result<()> {
        self.ensure_unlocked()
    }
}

/// Sanitize and validate a user-supplied layer name.
pub fn validate_name(raw: &str) -> Result<String> {
    let name = sanitize_segment(raw.trim());
    if name.is_empty() {
        return Err(Error::validation("layer name", "name must not be empty"));
    }
    if name.starts_with('.') {
        return Err(Error::validation(
            "layer name",
            format!("'{}' is reserved for internal layers", name),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::validation(
            "layer name",
            format!("'{}' exceeds {} characters", name, MAX_NAME_LEN),
        ));
    }
    Ok(name)
}

fn validate_label(raw: &str) -> Result<String> {
    let label = raw.trim();
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(Error::validation(
            "layer label",
            format!("exceeds {} characters", MAX_LABEL_LEN),
        ));
    }
    Ok(label.to_string())
}

fn validate_description(raw: &str) -> Result<String> {
    let description = raw.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(Error::validation(
            "layer description",
            format!("exceeds {} characters", MAX_DESCRIPTION_LEN),
        ));
    }
    Ok(description.to_string())
}

fn validate_color(raw: &str) -> Result<String> {
    let color = raw.trim().to_lowercase();
    let hex = color.strip_prefix('#').unwrap_or("");
    let ok = matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
    if !ok {
        return Err(Error::validation(
            "layer color",
            format!("'{}' is not a #rgb or #rrggbb color", raw),
        ));
    }
    Ok(color)
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_folds_name_and_keeps_label() {
        let layer = Layer::new(LayerOptions::named("ProjectA")).unwrap();
        assert_eq!(layer.name, "projecta");
        assert_eq!(layer.label, "ProjectA");
        assert_eq!(layer.layer_type, LayerType::Context);
        assert!(!layer.locked);
        assert!(Uuid::parse_str(&layer.id).is_ok());
    }

    #[test]
    fn test_name_rules() {
        assert!(Layer::new(LayerOptions::named("   ")).is_err());
        assert!(Layer::new(LayerOptions::named(".hidden")).is_err());
        assert!(Layer::new(LayerOptions::named("a".repeat(33))).is_err());
        assert!(Layer::new(LayerOptions::named("a".repeat(32))).is_ok());
    }

    #[test]
    fn test_description_and_color_caps() {
        let mut opts = LayerOptions::named("x");
        opts.description = Some("d".repeat(256));
        assert!(Layer::new(opts).is_err());

        let mut opts = LayerOptions::named("x");
        opts.color = Some("red".into());
        assert!(Layer::new(opts).is_err());

        let mut opts = LayerOptions::named("x");
        opts.color = Some("#FFAA00".into());
        assert_eq!(Layer::new(opts).unwrap().color.as_deref(), Some("#ffaa00"));
    }

    #[test]
    fn test_reserved_types_rejected() {
        let mut opts = LayerOptions::named("x");
        opts.layer_type = Some(LayerType::System);
        assert!(Layer::new(opts).is_err());
    }

    #[test]
    fn test_builtins_are_locked() {
        let builtins = Layer::builtins();
        assert_eq!(builtins.len(), 5);
        let root = &builtins[0];
        assert!(root.is_root());
        assert_eq!(root.name, "/");

        for layer in builtins {
            assert!(layer.locked);
            let mut l = layer.clone();
            assert!(matches!(l.rename("other"), Err(Error::Locked { .. })));
            assert!(matches!(
                l.apply_update(LayerUpdate::default()),
                Err(Error::Locked { .. })
            ));
            assert!(l.check_removable().is_err());
        }
    }

    #[test]
    fn test_update_validates_before_mutating() {
        let mut layer = Layer::new(LayerOptions::named("notes")).unwrap();
        let bad = LayerUpdate {
            label: Some("fine".into()),
            description: Some("d".repeat(300)),
            ..LayerUpdate::default()
        };
        assert!(layer.apply_update(bad).is_err());
        assert_eq!(layer.label, "notes");

        let good = LayerUpdate {
            feature_bitmaps: Some(vec!["note".into(), "note".into(), "tab".into()]),
            ..LayerUpdate::default()
        };
        layer.apply_update(good).unwrap();
        assert_eq!(layer.feature_bitmaps, vec!["note", "tab"]);
    }

    #[test]
    fn test_layer_type_parse() {
        assert_eq!("Workspace".parse::<LayerType>().unwrap(), LayerType::Workspace);
        assert!("folder".parse::<LayerType>().is_err());
    }

    #[test]
    fn test_json_uses_type_field() {
        let layer = Layer::new(LayerOptions::named("work")).unwrap();
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(json["type"], "context");
        let back: Layer = serde_json::from_value(json).unwrap();
        assert_eq!(back, layer);
    }
}
