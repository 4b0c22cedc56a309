//! Shared Serde helpers
//!
//! Config values arrive from YAML/TOML files and from environment variables,
//! so list and boolean fields accept both native and string forms:
//! - `"image,raw"` or `["image", "raw"]` → `vec!["image", "raw"]`
//! - `"yes"`, `"1"`, `true` → `true`

use serde::{Deserialize, Deserializer};

/// Default value: true
pub fn bool_true() -> bool {
    true
}

/// Default value: false
pub fn bool_false() -> bool {
    false
}

/// Boolean that also accepts 0/1 and "true"/"false"/"yes"/"no" (case-insensitive)
pub fn deserialize_bool_flexible<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrStringOrInt {
        Bool(bool),
        Int(i64),
        String(String),
    }

    match BoolOrStringOrInt::deserialize(deserializer)? {
        BoolOrStringOrInt::Bool(b) => Ok(b),
        BoolOrStringOrInt::Int(0) => Ok(false),
        BoolOrStringOrInt::Int(1) => Ok(true),
        BoolOrStringOrInt::Int(i) => Err(D::Error::custom(format!(
            "Invalid integer value {}, expected 0 or 1",
            i
        ))),
        BoolOrStringOrInt::String(s) => {
            let t = s.trim();
            if t == "1" || t.eq_ignore_ascii_case("true") || t.eq_ignore_ascii_case("yes") {
                Ok(true)
            } else if t.is_empty()
                || t == "0"
                || t.eq_ignore_ascii_case("false")
                || t.eq_ignore_ascii_case("no")
            {
                Ok(false)
            } else {
                Err(D::Error::custom(format!(
                    "Invalid boolean value '{}', expected: 1/0, true/false, yes/no, or boolean",
                    s
                )))
            }
        },
    }
}

/// String list given either natively or as a comma separated string
///
/// Empty items are dropped, so `""` yields an empty list.
pub fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        String(String),
    }

    let items = match ListOrString::deserialize(deserializer)? {
        ListOrString::List(items) => items,
        ListOrString::String(s) => s.split(',').map(str::to_string).collect(),
    };

    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
