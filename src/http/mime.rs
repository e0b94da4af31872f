//! File suffix to `Content-Type` lookup for file responses.

use std::{collections::HashMap, path::Path};

const FALLBACK: &str = "application/octet-stream";

/// Maps file suffixes (without the dot, lowercase) to MIME types.
///
/// Each [`Server`](crate::Server) owns one. Extra mappings come from
/// [`ServerBuilder::mime`](crate::ServerBuilder::mime) or the `mime` table of
/// the [configuration file](crate::config::Config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeTypes {
    map: HashMap<String, String>,
}

impl Default for MimeTypes {
    fn default() -> Self {
        #[rustfmt::skip]
        let defaults = [
            ("css",  "text/css"),
            ("js",   "application/javascript"),
            ("json", "application/json"),
            ("webp", "image/webp"),
            ("jpg",  "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("png",  "image/png"),
            ("gif",  "image/gif"),
            ("svg",  "image/svg+xml"),
            ("ico",  "image/x-icon"),
            ("htm",  "text/html; charset=UTF-8"),
            ("html", "text/html; charset=UTF-8"),
            ("txt",  "text/plain; charset=UTF-8"),
            ("pdf",  "application/pdf"),
            ("mp4",  "video/mp4"),
            ("wasm", "application/wasm"),
        ];

        Self {
            map: defaults
                .into_iter()
                .map(|(suffix, mime)| (suffix.to_string(), mime.to_string()))
                .collect(),
        }
    }
}

impl MimeTypes {
    /// Adds or replaces the mapping for `suffix`.
    pub fn insert(&mut self, suffix: &str, mime: impl Into<String>) {
        let suffix = suffix.trim_start_matches('.').to_ascii_lowercase();
        self.map.insert(suffix, mime.into());
    }

    pub fn get(&self, suffix: &str) -> Option<&str> {
        self.map
            .get(&suffix.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The type for a file, `application/octet-stream` when unknown.
    pub fn for_path(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|suffix| suffix.to_str())
            .and_then(|suffix| self.get(suffix))
            .unwrap_or(FALLBACK)
    }
}

impl<S: AsRef<str>, M: Into<String>> Extend<(S, M)> for MimeTypes {
    fn extend<I: IntoIterator<Item = (S, M)>>(&mut self, iter: I) {
        for (suffix, mime) in iter {
            self.insert(suffix.as_ref(), mime);
        }
    }
}
