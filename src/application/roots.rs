//! Mapping of public request paths to CMS content roots.

use std::collections::HashMap;

use crate::cache::normalize_path;

/// A request path resolved against the configured content roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub root: String,
    /// Normalized path within `root`.
    pub path: String,
}

/// Resolves request paths to `(root, path)` pairs.
///
/// A leading segment listed in `language_roots` selects that root and is
/// stripped; everything else lives under `default_root`.
#[derive(Debug, Clone)]
pub struct RootMapper {
    default_root: String,
    language_roots: HashMap<String, String>,
}

impl RootMapper {
    pub fn new(default_root: impl Into<String>, language_roots: HashMap<String, String>) -> Self {
        let language_roots = language_roots
            .into_iter()
            .map(|(segment, root)| (segment.to_ascii_lowercase(), root))
            .collect();
        Self {
            default_root: default_root.into(),
            language_roots,
        }
    }

    pub fn default_root(&self) -> &str {
        &self.default_root
    }

    pub fn resolve(&self, request_path: &str) -> ResolvedPath {
        let normalized = normalize_path(request_path);
        let trimmed = normalized.trim_start_matches('/');
        let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));

        match self.language_roots.get(first) {
            Some(root) => ResolvedPath {
                root: root.clone(),
                path: normalize_path(rest),
            },
            None => ResolvedPath {
                root: self.default_root.clone(),
                path: normalized,
            },
        }
    }
}

impl Default for RootMapper {
    fn default() -> Self {
        Self::new(
            "home",
            HashMap::from([("fr".to_string(), "home-fr".to_string())]),
        )
    }
}
