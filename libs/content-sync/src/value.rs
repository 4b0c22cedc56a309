//! Value normalizer
//!
//! Produces the canonical string form of a field value used for equality
//! checks between the two stores. Canonical strings are never written back.
//!
//! Rules, selected by the lower-cased column type tag:
//! - null / absent → `"null"`
//! - temporal (`timestamp*`, `date`, `datetime`) → epoch milliseconds, or a
//!   `YYYY-MM-DD` day string when the column is literally named `date`
//! - json / jsonb → parsed, object keys and array elements sorted, re-serialized
//! - anything else → plain string form; arrays keep their element order

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

/// Sentinel for null and absent values
pub const NULL_SENTINEL: &str = "null";

/// Separator between key parts of a composite key
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Column name that carries calendar-day semantics
const CALENDAR_DATE_COLUMN: &str = "date";

/// A row: column name to dynamic value
pub type Row = serde_json::Map<String, JsonValue>;

/// Normalization behaviour selected by a type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Temporal,
    Json,
    Plain,
}

impl TypeClass {
    pub fn of(type_tag: &str) -> Self {
        let tag = type_tag.to_ascii_lowercase();
        if tag.contains("json") {
            Self::Json
        } else if tag.contains("timestamp") || tag.contains("date") {
            Self::Temporal
        } else {
            Self::Plain
        }
    }
}

/// Canonical string of `value` for a column of the given type
pub fn normalize(value: &JsonValue, column_type: &str, column_name: &str) -> String {
    if value.is_null() {
        return NULL_SENTINEL.to_string();
    }

    match TypeClass::of(column_type) {
        TypeClass::Temporal => normalize_temporal(value, column_name),
        TypeClass::Json => normalize_json(value),
        TypeClass::Plain => stringify(value),
    }
}

/// Canonical string of a row field, absent columns treated as null
pub fn normalize_field(row: &Row, column: &str, column_types: &HashMap<String, String>) -> String {
    let type_tag = column_types.get(column).map(String::as_str).unwrap_or("");
    normalize(row.get(column).unwrap_or(&JsonValue::Null), type_tag, column)
}

/// Composite identity of a row from its key columns
pub fn composite_key(row: &Row, key_columns: &[String], column_types: &HashMap<String, String>) -> String {
    let mut key = String::new();
    for (i, column) in key_columns.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&normalize_field(row, column, column_types));
    }
    key
}

fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => NULL_SENTINEL.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        // Array columns (e.g. `text[]`) are ordered; a reorder is a change
        other => other.to_string(),
    }
}

fn normalize_temporal(value: &JsonValue, column_name: &str) -> String {
    let millis = match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => parse_timestamp_millis(s),
        _ => None,
    };

    match millis {
        Some(ms) if column_name.eq_ignore_ascii_case(CALENDAR_DATE_COLUMN) => {
            match Utc.timestamp_millis_opt(ms).single() {
                Some(dt) => dt.format("%Y-%m-%d").to_string(),
                None => ms.to_string(),
            }
        },
        Some(ms) => ms.to_string(),
        None => stringify(value),
    }
}

/// Parse the textual timestamp shapes emitted by Postgres and SQLite
pub fn parse_timestamp_millis(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }

    // Postgres text output: "2024-03-01 10:00:00+00" / "+05:30"
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.timestamp_millis());
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn normalize_json(value: &JsonValue) -> String {
    match value {
        // Text-stored JSON (SQLite) is parsed first, plain strings stay strings
        JsonValue::String(s) => match serde_json::from_str::<JsonValue>(s) {
            Ok(parsed) => canonical_json(&parsed),
            Err(_) => canonical_json(value),
        },
        other => canonical_json(other),
    }
}

/// Order-independent serialization: sorted keys, sorted array elements
pub fn canonical_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, String)> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", JsonValue::String(k.clone()), v))
                .collect();
            format!("{{{}}}", body.join(","))
        },
        JsonValue::Array(items) => {
            let mut elements: Vec<String> = items.iter().map(canonical_json).collect();
            elements.sort();
            format!("[{}]", elements.join(","))
        },
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // unwrap is acceptable in tests
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_and_absent_share_sentinel() {
        let types = HashMap::from([("title".to_string(), "text".to_string())]);
        let row = Row::new();
        assert_eq!(normalize_field(&row, "title", &types), "null");
        assert_eq!(normalize(&JsonValue::Null, "jsonb", "meta"), "null");
        assert_eq!(normalize(&JsonValue::Null, "timestamp", "created_at"), "null");
    }

    #[test]
    fn test_json_key_order_irrelevant() {
        let a = json!({"b": 1, "a": {"y": [3, 1], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, 3]}, "b": 1});
        assert_eq!(normalize(&a, "jsonb", "meta"), normalize(&b, "json", "meta"));
    }

    #[test]
    fn test_json_text_matches_structured() {
        let structured = json!({"images": ["https://x/1.jpg"], "caption": "hi"});
        let text = JsonValue::String(r#"{"caption":"hi","images":["https://x/1.jpg"]}"#.into());
        assert_eq!(normalize(&structured, "jsonb", "content"), normalize(&text, "json", "content"));
    }

    #[test]
    fn test_json_difference_detected() {
        let a = json!({"caption": "old"});
        let b = json!({"caption": "new"});
        assert_ne!(normalize(&a, "jsonb", "c"), normalize(&b, "jsonb", "c"));
    }

    #[test]
    fn test_timestamp_formats_compare_equal() {
        let pg = json!("2024-03-01T10:00:00+00:00");
        let sqlite = json!("2024-03-01 10:00:00");
        let offset = json!("2024-03-01 12:00:00+02");
        let expected = normalize(&pg, "timestamp with time zone", "created_at");
        assert_eq!(expected, "1709287200000");
        assert_eq!(normalize(&sqlite, "timestamp", "created_at"), expected);
        assert_eq!(normalize(&offset, "timestamptz", "created_at"), expected);
    }

    #[test]
    fn test_date_column_truncates_to_day() {
        let morning = json!("2024-03-01T08:00:00Z");
        let evening = json!("2024-03-01 22:15:00");
        let day = json!("2024-03-01");
        assert_eq!(normalize(&morning, "timestamp", "date"), "2024-03-01");
        assert_eq!(normalize(&evening, "timestamp", "date"), "2024-03-01");
        assert_eq!(normalize(&day, "date", "date"), "2024-03-01");

        // Other temporal columns keep full precision
        assert_ne!(
            normalize(&morning, "timestamp", "published_at"),
            normalize(&evening, "timestamp", "published_at")
        );
    }

    #[test]
    fn test_unparseable_temporal_falls_back_to_text() {
        assert_eq!(normalize(&json!("someday"), "date", "date"), "someday");
    }

    #[test]
    fn test_plain_values_stringify() {
        assert_eq!(normalize(&json!("abc"), "text", "name"), "abc");
        assert_eq!(normalize(&json!(42), "integer", "id"), "42");
        assert_eq!(normalize(&json!(true), "boolean", "published"), "true");
    }

    #[test]
    fn test_plain_array_order_matters() {
        let gallery = json!(["https://x/1.jpg", "https://x/2.jpg"]);
        let reordered = json!(["https://x/2.jpg", "https://x/1.jpg"]);
        assert_ne!(normalize(&gallery, "array", "gallery"), normalize(&reordered, "array", "gallery"));
        assert_eq!(normalize(&gallery, "array", "gallery"), normalize(&gallery, "text[]", "gallery"));

        // The same elements in a JSON column stay order-independent
        assert_eq!(normalize(&gallery, "jsonb", "gallery"), normalize(&reordered, "jsonb", "gallery"));
    }

    #[test]
    fn test_composite_key_joins_normalized_parts() {
        let types = HashMap::from([
            ("a".to_string(), "integer".to_string()),
            ("b".to_string(), "text".to_string()),
        ]);
        let mut row = Row::new();
        row.insert("a".into(), json!(1));
        row.insert("b".into(), json!("x"));
        let key = composite_key(&row, &["a".to_string(), "b".to_string()], &types);
        assert_eq!(key, "1\u{1f}x");
    }

    #[test]
    fn test_type_class() {
        assert_eq!(TypeClass::of("JSONB"), TypeClass::Json);
        assert_eq!(TypeClass::of("timestamp without time zone"), TypeClass::Temporal);
        assert_eq!(TypeClass::of("datetime"), TypeClass::Temporal);
        assert_eq!(TypeClass::of("character varying"), TypeClass::Plain);
    }
}
