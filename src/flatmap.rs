//! The legacy flat attribute encoding.
//!
//! State snapshots arrive as string-keyed, string-valued maps using dotted
//! paths with `.#` (list/set) and `.%` (map) count sentinels, e.g.
//!
//! ```text
//! ingress.#       = "2"
//! ingress.0.port  = "80"
//! ingress.1.port  = "443"
//! tags.%          = "1"
//! tags.env        = "prod"
//! ```
//!
//! [`FlatAttributeMap`] is the explicit serialization boundary for that
//! encoding. Encoding ([`FlatAttributeMap::write_value`]) lives here; the
//! schema-driven decode back into structured values lives with the state
//! reader, which is the only consumer that knows the shape to expand into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::FieldValue;

/// Marker stored in place of a value that is not yet known.
///
/// Never appears in persisted state; it only exists inside the engine when a
/// staged diff overlays a computed value onto a flattened snapshot.
pub(crate) const COMPUTED_SENTINEL: &str = "\u{1}computed\u{1}";

/// A flat, string-keyed attribute map with count sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlatAttributeMap(BTreeMap<String, String>);

impl FlatAttributeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a flat key/value pair.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a flat key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether a flat key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Remove a flat key.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of flat entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries strictly below `prefix`, yielding the remainder after the dot.
    ///
    /// For `prefix = "tags"` an entry `tags.env = prod` yields
    /// `("env", "prod")`; the bare `tags` key itself is not included.
    pub fn under_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let dotted = format!("{}.", prefix);
        self.0.iter().filter_map(move |(k, v)| {
            k.strip_prefix(&dotted).map(|rest| (rest, v.as_str()))
        })
    }

    /// Flatten `value` into this map at `prefix`, writing count sentinels for
    /// containers and normalized strings for primitive leaves.
    pub fn write_value(&mut self, prefix: &str, value: &FieldValue) {
        match value {
            FieldValue::List(items) => {
                self.insert(format!("{}.#", prefix), items.len().to_string());
                for (i, item) in items.iter().enumerate() {
                    self.write_value(&format!("{}.{}", prefix, i), item);
                }
            },
            FieldValue::Set(set) => {
                self.insert(format!("{}.#", prefix), set.len().to_string());
                for (code, item) in set.iter() {
                    self.write_value(&format!("{}.{}", prefix, code), item);
                }
            },
            FieldValue::Map(entries) => {
                self.insert(format!("{}.%", prefix), entries.len().to_string());
                for (k, v) in entries {
                    self.write_value(&format!("{}.{}", prefix, k), v);
                }
            },
            FieldValue::Object(fields) => {
                for (k, v) in fields {
                    self.write_value(&format!("{}.{}", prefix, k), v);
                }
            },
            FieldValue::Unknown => {
                self.insert(prefix, COMPUTED_SENTINEL);
            },
            primitive => {
                self.insert(prefix, primitive.flat_string().unwrap_or_default());
            },
        }
    }
}

impl FromIterator<(String, String)> for FlatAttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for FlatAttributeMap {
    fn from(entries: [(&str, &str); N]) -> Self {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
