//! Cache key definitions.
//!
//! Page keys are `"<root>-<theme>-<path>"` strings; media keys are the
//! on-disk path an object is cached under.

use std::fmt;
use std::path::{Path, PathBuf};

const ROOT_PATH: &str = "/";
const THEME_COOKIE: &str = "Theme";

/// Visual theme a page was rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    /// Both variants, used when invalidating every rendering of a path.
    pub const ALL: [Theme; 2] = [Theme::Light, Theme::Dark];

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    /// Pick the theme from a raw `Cookie` header value.
    ///
    /// Anything other than an explicit `dark` selects the default theme.
    pub fn from_cookie_header(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Theme::default();
        };

        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == THEME_COOKIE)
            .map(|(_, value)| match value.trim() {
                "dark" => Theme::Dark,
                _ => Theme::Light,
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a request path for use in a page key.
///
/// Lowercases, collapses repeated `/`, guarantees a leading `/`, and drops a
/// trailing one. Empty or slash-only input maps to `/`.
pub fn normalize_path(path: &str) -> String {
    if path.chars().all(|c| c == '/') {
        return ROOT_PATH.to_string();
    }

    let mut out = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        out.push('/');
    }

    let mut previous = '\0';
    for c in path.chars() {
        if c != '/' || previous != '/' {
            out.extend(c.to_lowercase());
        }
        previous = c;
    }

    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Key of a rendered page in the page cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    root: String,
    theme: Theme,
    path: String,
}

impl PageKey {
    pub fn new(root: impl Into<String>, theme: Theme, path: &str) -> Self {
        Self {
            root: root.into(),
            theme,
            path: normalize_path(path),
        }
    }

    /// Keys for every theme variant of a `(root, path)` pair.
    pub fn variants(root: &str, path: &str) -> [PageKey; 2] {
        Theme::ALL.map(|theme| PageKey::new(root, theme, path))
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.root, self.theme, self.path)
    }
}

/// Resolve the on-disk location of a cached object under `cache_dir`.
///
/// Leading separators are ignored and repeated ones collapse. Returns `None`
/// for paths that are empty or would escape `cache_dir`.
pub fn media_cache_path(cache_dir: &Path, object_path: &str) -> Option<PathBuf> {
    let mut resolved = cache_dir.to_path_buf();
    let mut segments = 0usize;

    for segment in object_path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
        resolved.push(segment);
        segments += 1;
    }

    (segments > 0).then_some(resolved)
}
