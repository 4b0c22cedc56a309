//! Asset reference scanner
//!
//! Finds remote-store URLs anywhere in a row. The scanner does not know which
//! columns hold URLs; strings are matched against the store hostname, arrays
//! and objects are walked recursively, other scalars contribute nothing.

use std::collections::BTreeSet;

use errors::{SyncError, SyncResult};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::value::Row;

/// Characters trimmed from the end of a matched URL (sentence punctuation)
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Path segment after which the store identifier starts
const UPLOAD_SEGMENT: &str = "upload";

#[derive(Debug, Clone)]
pub struct AssetScanner {
    host: String,
    pattern: Regex,
}

impl AssetScanner {
    pub fn new(host: &str) -> SyncResult<Self> {
        let host = host.trim().trim_end_matches('/').to_ascii_lowercase();
        if host.is_empty() {
            return Err(SyncError::InvalidConfig {
                field: "assets.host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let pattern = Regex::new(&format!(
            r#"(?i)https?://{}/[^\s"'<>()\\]+"#,
            regex::escape(&host)
        ))
        .map_err(|e| SyncError::Configuration(format!("invalid asset host pattern: {}", e)))?;

        Ok(Self { host, pattern })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Every store URL referenced anywhere inside `value`
    pub fn extract_urls(&self, value: &JsonValue) -> BTreeSet<String> {
        let mut urls = BTreeSet::new();
        self.collect(value, &mut urls);
        urls
    }

    /// Every store URL referenced by any column of `row`
    pub fn extract_from_row(&self, row: &Row) -> BTreeSet<String> {
        let mut urls = BTreeSet::new();
        for value in row.values() {
            self.collect(value, &mut urls);
        }
        urls
    }

    /// Union over a parent row and its child rows
    pub fn extract_from_rows<'a>(&self, rows: impl IntoIterator<Item = &'a Row>) -> BTreeSet<String> {
        let mut urls = BTreeSet::new();
        for row in rows {
            for value in row.values() {
                self.collect(value, &mut urls);
            }
        }
        urls
    }

    fn collect(&self, value: &JsonValue, urls: &mut BTreeSet<String>) {
        match value {
            JsonValue::String(s) => {
                for m in self.pattern.find_iter(s) {
                    let url = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
                    if !url.is_empty() {
                        urls.insert(url.to_string());
                    }
                }
            },
            JsonValue::Array(items) => {
                for item in items {
                    self.collect(item, urls);
                }
            },
            JsonValue::Object(map) => {
                for item in map.values() {
                    self.collect(item, urls);
                }
            },
            _ => {},
        }
    }

    /// Store identifier for a URL
    ///
    /// The path after the host is cut after an `upload` segment and after a
    /// version segment (`v123`), whichever come last; the file extension is
    /// dropped. `None` when the URL is foreign or carries neither marker.
    pub fn public_id(&self, url: &str) -> Option<String> {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))?;
        let (host, path) = rest.split_once('/')?;
        if !host.eq_ignore_ascii_case(&self.host) {
            return None;
        }

        let path = path.split(['?', '#']).next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut start = None;
        if let Some(pos) = segments.iter().position(|s| *s == UPLOAD_SEGMENT) {
            start = Some(pos + 1);
        }
        let search_from = start.unwrap_or(0);
        if let Some(pos) = segments[search_from.min(segments.len())..]
            .iter()
            .position(|s| is_version_segment(s))
        {
            start = Some(search_from + pos + 1);
        }

        let start = start?;
        let tail = segments.get(start..)?;
        if tail.is_empty() {
            return None;
        }

        let mut id = tail.join("/");
        let name_start = id.rfind('/').map_or(0, |i| i + 1);
        if let Some(dot) = id[name_start..].rfind('.') {
            if dot > 0 {
                id.truncate(name_start + dot);
            }
        }
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

fn is_version_segment(segment: &str) -> bool {
    segment.len() > 1
        && segment.starts_with('v')
        && segment[1..].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // unwrap is acceptable in tests
mod tests {
    use super::*;
    use serde_json::json;

    fn scanner() -> AssetScanner {
        AssetScanner::new("res.cloudinary.com").unwrap()
    }

    #[test]
    fn test_extracts_from_nested_values() {
        let value = json!({
            "cover": "https://res.cloudinary.com/demo/image/upload/v1/news/cover.jpg",
            "blocks": [
                {"html": "<img src=\"https://res.cloudinary.com/demo/image/upload/v2/a.png\">"},
                {"caption": "See https://res.cloudinary.com/demo/raw/upload/v3/doc.pdf."}
            ],
            "count": 3,
            "other": "https://example.com/x.jpg"
        });
        let urls = scanner().extract_urls(&value);
        assert_eq!(
            urls.into_iter().collect::<Vec<_>>(),
            vec![
                "https://res.cloudinary.com/demo/image/upload/v1/news/cover.jpg",
                "https://res.cloudinary.com/demo/image/upload/v2/a.png",
                "https://res.cloudinary.com/demo/raw/upload/v3/doc.pdf",
            ]
        );
    }

    #[test]
    fn test_json_text_column_is_scanned() {
        let mut row = Row::new();
        row.insert(
            "content".into(),
            json!(r#"{"images":["https://res.cloudinary.com/demo/image/upload/v9/x.webp"]}"#),
        );
        let urls = scanner().extract_from_row(&row);
        assert!(urls.contains("https://res.cloudinary.com/demo/image/upload/v9/x.webp"));
    }

    #[test]
    fn test_public_id_strips_version_and_extension() {
        let s = scanner();
        assert_eq!(
            s.public_id("https://res.cloudinary.com/demo/image/upload/v1712345/news/cover.jpg").as_deref(),
            Some("news/cover")
        );
        assert_eq!(
            s.public_id("https://res.cloudinary.com/demo/image/upload/c_fill,w_300/v17/a.b.png?x=1").as_deref(),
            Some("a.b")
        );
        assert_eq!(
            s.public_id("https://res.cloudinary.com/demo/image/upload/team/photo.jpg").as_deref(),
            Some("team/photo")
        );
    }

    #[test]
    fn test_public_id_on_version_only_url() {
        let s = AssetScanner::new("store").unwrap();
        assert_eq!(s.public_id("https://store/img/v1/a.jpg").as_deref(), Some("a"));
    }

    #[test]
    fn test_public_id_rejects_foreign_or_shapeless() {
        let s = scanner();
        assert!(s.public_id("https://example.com/demo/image/upload/v1/a.jpg").is_none());
        assert!(s.public_id("https://res.cloudinary.com/demo/image/a.jpg").is_none());
        assert!(s.public_id("https://res.cloudinary.com/demo/image/upload/v1/").is_none());
        assert!(s.public_id("not a url").is_none());
    }
}
