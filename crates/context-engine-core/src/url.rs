//! Context address parsing and normalization.
//!
//! Context addresses have the form `<protocol>://<path>`, for example
//! `universe:///work/projecta`. Normalization:
//!
//! 1. Protocol and path are lower-cased.
//! 2. Backslashes become slashes; characters outside `[a-z0-9._-/]` are stripped.
//! 3. Consecutive slashes collapse; the trailing slash is dropped.
//! 4. `.` and `..` segments are resolved against the path built so far.
//! 5. Any other segment starting with `.` names an internal layer and is
//!    rejected unless explicitly whitelisted.
//!
//! Inputs without a leading `/` or a protocol are resolved relative to
//! the supplied base url.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Protocol used when the input does not carry one.
pub const DEFAULT_PROTOCOL: &str = "universe";

/// A normalized context address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Url {
    protocol: String,
    path: String,
}

impl Url {
    /// The root address of `protocol`.
    pub fn root(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            path: "/".to_string(),
        }
    }

    /// Parse with the default rules (no whitelisted internal segments).
    pub fn parse(input: &str) -> Result<Self> {
        UrlRules::default().parse(input, None)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Normalized path, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path segments, empty for the root.
    pub fn path_array(&self) -> Vec<String> {
        split_path(&self.path)
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.path)
    }
}

/// Parsing rules injected from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRules {
    /// Protocol assumed when the input has none.
    pub protocol: String,
    /// Dot-prefixed segment names users may type (e.g. `.user`).
    pub allowed_internal: Vec<String>,
}

impl Default for UrlRules {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            allowed_internal: Vec::new(),
        }
    }
}

impl UrlRules {
    /// Parse `input`, resolving relative paths against `base`.
    pub fn parse(&self, input: &str, base: Option<&Url>) -> Result<Url> {
        let trimmed = input.trim();
        let (protocol, raw_path, absolute) = match trimmed.split_once("://") {
            Some((proto, rest)) => {
                let proto = proto.to_lowercase();
                if proto.is_empty() || !proto.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(Error::validation(
                        "url",
                        format!("invalid protocol in '{}'", input),
                    ));
                }
                (proto, rest, true)
            }
            None => {
                let proto = base
                    .map(|b| b.protocol.clone())
                    .unwrap_or_else(|| self.protocol.clone());
                let absolute = trimmed.starts_with('/') || trimmed.starts_with('\\');
                (proto, trimmed, absolute)
            }
        };

        let mut segments: Vec<String> = match base {
            Some(b) if !absolute => b.path_array(),
            _ => Vec::new(),
        };

        for raw in raw_path.split(['/', '\\']) {
            let segment = sanitize_segment(raw);
            match segment.as_str() {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s if s.starts_with('.') && !self.allowed_internal.iter().any(|a| a == s) => {
                    return Err(Error::validation(
                        "url",
                        format!("segment '{}' is reserved for internal layers", s),
                    ));
                }
                _ => segments.push(segment),
            }
        }

        Ok(Url {
            protocol,
            path: join_path(&segments),
        })
    }
}

/// Lower-case a segment and strip characters outside `[a-z0-9._-]`.
pub fn sanitize_segment(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Normalize a bare path without applying the reserved-segment rule.
///
/// Used by the tree, which performs its own internal-layer check.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split(['/', '\\'])
        .map(sanitize_segment)
        .filter(|s| !s.is_empty() && s != ".")
        .collect();
    join_path(&segments)
}

/// Split a path into non-empty sanitized segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_path(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relative_defaults_protocol() {
        let url = Url::parse("work/projectA").unwrap();
        assert_eq!(url.protocol(), "universe");
        assert_eq!(url.path(), "/work/projecta");
        assert_eq!(url.path_array(), vec!["work", "projecta"]);
        assert_eq!(url.to_string(), "universe:///work/projecta");
    }

    #[test]
    fn test_parse_strips_and_collapses() {
        let url = Url::parse("Universe:///Work//Project A!//").unwrap();
        assert_eq!(url.protocol(), "universe");
        assert_eq!(url.path(), "/work/projecta");
    }

    #[test]
    fn test_root_forms() {
        for input in ["", "/", "universe://", "universe:///", "//"] {
            let url = Url::parse(input).unwrap();
            assert!(url.is_root(), "{:?} should be root", input);
            assert!(url.path_array().is_empty());
        }
    }

    #[test]
    fn test_relative_to_base() {
        let base = Url::parse("/work").unwrap();
        let rules = UrlRules::default();
        let url = rules.parse("projecta/notes", Some(&base)).unwrap();
        assert_eq!(url.path(), "/work/projecta/notes");

        let up = rules.parse("../home", Some(&url)).unwrap();
        assert_eq!(up.path(), "/work/projecta/home");

        let abs = rules.parse("/other", Some(&base)).unwrap();
        assert_eq!(abs.path(), "/other");
    }

    #[test]
    fn test_dot_dot_does_not_escape_root() {
        let url = Url::parse("/../../a").unwrap();
        assert_eq!(url.path(), "/a");
    }

    #[test]
    fn test_internal_segments_rejected_unless_whitelisted() {
        assert!(matches!(
            Url::parse("/.user/settings"),
            Err(Error::Validation { .. })
        ));

        let rules = UrlRules {
            allowed_internal: vec![".user".to_string()],
            ..UrlRules::default()
        };
        let url = rules.parse("/.user/settings", None).unwrap();
        assert_eq!(url.path(), "/.user/settings");
    }

    #[test]
    fn test_bad_protocol() {
        assert!(Url::parse("ht tp://x").is_err());
        assert!(Url::parse("://x").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a//B/./c/"), "/a/b/c");
        assert_eq!(normalize_path(""), "/");
    }
}
