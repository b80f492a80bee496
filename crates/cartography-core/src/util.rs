//! Small helpers shared by loaders and sync stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CartographyError, CartographyResult};

/// Default number of items written per query.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Numeric stamp written as `lastupdated` on every node and relationship of a
/// sync run. Cleanup jobs delete whatever still carries an older tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateTag(pub i64);

impl UpdateTag {
    /// Tag for a run starting now (epoch seconds).
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for UpdateTag {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for UpdateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split items into chunks of at most `size` elements.
///
/// ```
/// use cartography_core::util::batch;
///
/// let chunks = batch(vec![1, 2, 3, 4, 5, 6, 7, 8], 3);
/// assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8]]);
/// ```
pub fn batch<T: Clone>(items: impl IntoIterator<Item = T>, size: usize) -> Vec<Vec<T>> {
    let items: Vec<T> = items.into_iter().collect();
    items.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}

/// Convert a CamelCase name to snake_case.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Stringify the value under `key`, if present and not null.
pub fn dict_value_to_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Read the date under `key` as epoch seconds.
///
/// Accepts RFC 3339 strings and numeric timestamps.
pub fn dict_date_to_epoch(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc).timestamp()),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

/// Check that a node label or relationship type is safe to splice into Cypher.
pub fn validate_identifier(name: &str) -> CartographyResult<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(name)
    } else {
        Err(CartographyError::InvalidIdentifier(name.to_string()))
    }
}
