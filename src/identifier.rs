//! Stable content identifiers and the ways to recover them from URLs and
//! already-downloaded filenames.

use crate::errors::{AppError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

const ID_LEN: usize = 11;

/// 11-character video identifier, used as storage key and filename component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    /// Extract the identifier from a video URL.
    pub fn from_url(url: &str) -> Result<Self> {
        url_patterns()
            .iter()
            .find_map(|pattern| pattern.captures(url))
            .and_then(|captures| captures.get(1))
            .and_then(|m| Self::parse(m.as_str()))
            .ok_or_else(|| {
                AppError::ExtractionFailed(format!("no video identifier in URL: {}", url))
            })
    }

    /// Best-effort recovery from a conventionally named local file.
    pub fn from_filename(filename: &str) -> Option<Self> {
        filename_patterns()
            .iter()
            .find_map(|pattern| pattern.captures(filename))
            .and_then(|captures| captures.get(1))
            .and_then(|m| Self::parse(m.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(regex) => Some(regex),
            Err(e) => {
                log::error!("[IDENTIFIER] Invalid pattern {}: {}", p, e);
                None
            }
        })
        .collect()
}

fn url_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            r"[?&]v=([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)",
            r"/embed/([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)",
            r"youtu\.be/([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)",
            r"/shorts/([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)",
            r"/(?:v|live)/([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)",
            // any bare path segment of identifier length
            r"/([0-9A-Za-z_-]{11})(?:[^0-9A-Za-z_-]|$)",
        ])
    })
}

fn filename_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            // trailing, right before the extension
            r"[-_]([a-zA-Z0-9_-]{11})(?:\.|$)",
            r"\[([a-zA-Z0-9_-]{11})\]",
            r"\(([a-zA-Z0-9_-]{11})\)",
        ])
    })
}
