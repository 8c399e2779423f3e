//! Path templates used by the manifest to address frames and segments.
//!
//! A template is a plain path with substitution tokens:
//!
//! | Token       | Replaced by                                  |
//! |-------------|----------------------------------------------|
//! | `[target]`  | target name                                  |
//! | `[type]`    | texture channel (`baseColor`, `normal`, ...) |
//! | `[tag]`     | texture tag                                  |
//! | `[ext]`     | file extension of the target's format        |
//! | `[###]`     | index, zero-padded to the number of `#`      |

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

static INDEX_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(#+)\]").expect("index placeholder pattern is valid")
});

/// Values substituted into a template. Unset tokens are left untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub target: Option<&'a str>,
    pub texture_type: Option<&'a str>,
    pub tag: Option<&'a str>,
    pub ext: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    pad_width: usize,
}

impl PathTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let pad_width = INDEX_PLACEHOLDER
            .captures(&raw)
            .map(|c| c[1].len())
            .unwrap_or(0);
        Self { raw, pad_width }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Width of the `[###]` placeholder, 0 when the template addresses a single file.
    pub fn pad_width(&self) -> usize {
        self.pad_width
    }

    pub fn has_index(&self) -> bool {
        self.pad_width > 0
    }

    /// Substitute every token. Pure: the same inputs always give the same path.
    pub fn render(&self, vars: &TemplateVars<'_>, index: u32) -> String {
        let mut path = self.raw.clone();
        for (token, value) in [
            ("[target]", vars.target),
            ("[type]", vars.texture_type),
            ("[tag]", vars.tag),
            ("[ext]", vars.ext),
        ] {
            if let Some(value) = value {
                path = path.replace(token, value);
            }
        }

        INDEX_PLACEHOLDER
            .replace_all(&path, |caps: &regex::Captures<'_>| pad(index, caps[1].len()))
            .into_owned()
    }
}

/// Left-pad `n` with zeros to `width` digits. Wider numbers are kept whole.
pub fn pad(n: u32, width: usize) -> String {
    format!("{:0width$}", n, width = width)
}

/// Resolve `path` against the URL of the manifest that declared it.
///
/// Absolute URLs are returned unchanged; protocol-relative (`//host/..`),
/// root-relative and plain relative paths are joined onto the manifest URL.
pub fn resolve_url(manifest_url: &str, path: &str) -> String {
    if Url::parse(path).is_ok() {
        return path.to_string();
    }

    match Url::parse(manifest_url).and_then(|base| base.join(path)) {
        Ok(url) => url.to_string(),
        Err(_) if path.starts_with('/') => path.to_string(),
        // Not a URL (local path): swap the last segment.
        Err(_) => match manifest_url.rfind('/') {
            Some(idx) => format!("{}/{}", &manifest_url[..idx], path.trim_start_matches("./")),
            None => path.to_string(),
        },
    }
}
