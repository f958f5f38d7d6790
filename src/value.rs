//! Weakly typed field values.
//!
//! The legacy encoding flattens every structured value into string-keyed,
//! string-valued attribute maps, so values read back from state carry string
//! leaves regardless of their declared type. [`FieldValue`] models that
//! universe: readers normalize primitive leaves to their flat string form,
//! while richer variants ([`FieldValue::Bool`], [`FieldValue::Int`],
//! [`FieldValue::Float`]) exist so schema defaults and customization hook
//! mutations can be written naturally and normalized at the boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single field value as seen by the diff engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A boolean value.
    Bool(bool),
    /// A 64-bit integer.
    Int(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A string value (also the normalized form of every primitive).
    String(String),
    /// An ordered list of values.
    List(Vec<FieldValue>),
    /// An unordered, content-addressed collection of values.
    Set(SetValue),
    /// A map from string keys to values.
    Map(BTreeMap<String, FieldValue>),
    /// One instance of a nested block, keyed by field name.
    ///
    /// Distinct from [`FieldValue::Map`]: blocks have a fixed field set and
    /// do not carry a `%` count sentinel in the flat encoding.
    Object(BTreeMap<String, FieldValue>),
    /// A value that is not yet known and will be supplied by the remote
    /// system (a computed placeholder in configuration).
    Unknown,
}

impl FieldValue {
    /// Whether this value is the unknown placeholder.
    pub fn is_unknown(&self) -> bool {
        matches!(self, FieldValue::Unknown)
    }

    /// Whether this value contains an unknown placeholder anywhere.
    pub fn contains_unknown(&self) -> bool {
        match self {
            FieldValue::Unknown => true,
            FieldValue::List(items) => items.iter().any(FieldValue::contains_unknown),
            FieldValue::Set(set) => set.values().any(FieldValue::contains_unknown),
            FieldValue::Map(entries) | FieldValue::Object(entries) => {
                entries.values().any(FieldValue::contains_unknown)
            },
            _ => false,
        }
    }

    /// The flat string form of a primitive value.
    ///
    /// Returns `None` for lists, sets, maps and objects, which have no single
    /// flat representation. The unknown placeholder flattens to the empty
    /// string; its "not yet known" quality travels separately as a computed
    /// flag.
    pub fn flat_string(&self) -> Option<String> {
        match self {
            FieldValue::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(format_float(*f)),
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Unknown => Some(String::new()),
            _ => None,
        }
    }

    /// Recursively normalize primitive leaves to their flat string form.
    pub fn normalize(&self) -> FieldValue {
        match self {
            FieldValue::Bool(_) | FieldValue::Int(_) | FieldValue::Float(_) => {
                FieldValue::String(self.flat_string().unwrap_or_default())
            },
            FieldValue::String(_) | FieldValue::Unknown => self.clone(),
            FieldValue::List(items) => {
                FieldValue::List(items.iter().map(FieldValue::normalize).collect())
            },
            FieldValue::Set(set) => {
                let mut out = SetValue::new();
                for (code, value) in set.iter() {
                    out.insert(code.clone(), value.normalize());
                }
                FieldValue::Set(out)
            },
            FieldValue::Map(entries) => FieldValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.normalize()))
                    .collect(),
            ),
            FieldValue::Object(fields) => FieldValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.normalize()))
                    .collect(),
            ),
        }
    }

    /// Weakly decode this value into a flat string-to-string map.
    ///
    /// Fails with a reason when the value is not a map or when one of its
    /// entries is itself structured.
    pub fn as_string_map(&self) -> Result<BTreeMap<String, String>, String> {
        let entries = match self {
            FieldValue::Map(entries) => entries,
            other => return Err(format!("expected a map, got {}", other.kind_name())),
        };
        let mut out = BTreeMap::new();
        for (k, v) in entries {
            match v.flat_string() {
                Some(s) => {
                    out.insert(k.clone(), s);
                },
                None => {
                    return Err(format!(
                        "map entry '{}' is {} and cannot be decoded to a string",
                        k,
                        v.kind_name()
                    ))
                },
            }
        }
        Ok(out)
    }

    /// A short name for the value's shape, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::String(_) => "string",
            FieldValue::List(_) => "list",
            FieldValue::Set(_) => "set",
            FieldValue::Map(_) => "map",
            FieldValue::Object(_) => "object",
            FieldValue::Unknown => "unknown",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

fn format_float(f: f64) -> String {
    // Integral floats print without a trailing fraction, matching the
    // flat encoding the state snapshots carry.
    if f.fract() == 0.0 && f.is_finite() {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

/// An unordered collection whose elements are keyed by identity code.
///
/// Set identity is established per element by a hash (the schema's
/// `set_hash` or [`default_set_hash`]); two sets are considered equal by the
/// differ when their sorted code lists match, because computed placeholders
/// inside elements break deep structural comparison.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetValue {
    elems: BTreeMap<String, FieldValue>,
}

impl SetValue {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an element under its identity code.
    pub fn insert(&mut self, code: String, value: FieldValue) {
        self.elems.insert(code, value);
    }

    /// The sorted list of element identity codes.
    pub fn codes(&self) -> Vec<String> {
        self.elems.keys().cloned().collect()
    }

    /// Look up an element by its identity code.
    pub fn get(&self, code: &str) -> Option<&FieldValue> {
        self.elems.get(code)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Iterate over `(code, value)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.elems.iter()
    }

    /// Iterate over element values in code order.
    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.elems.values()
    }

    /// Elements of `self` whose codes are not present in `other`.
    pub fn difference(&self, other: &SetValue) -> SetValue {
        let mut out = SetValue::new();
        for (code, value) in &self.elems {
            if !other.elems.contains_key(code) {
                out.insert(code.clone(), value.clone());
            }
        }
        out
    }

    /// The elements as an ordered list (code order).
    pub fn to_list(&self) -> Vec<FieldValue> {
        self.elems.values().cloned().collect()
    }
}

/// The structural identity hash used for set elements when a schema does not
/// supply its own `set_hash`.
///
/// Hashes a canonical rendering of the value, so element order inside nested
/// containers never affects identity.
pub fn default_set_hash(value: &FieldValue) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut repr = String::new();
    write_canonical(value, &mut repr);
    let mut hasher = DefaultHasher::new();
    repr.hash(&mut hasher);
    hasher.finish()
}

fn write_canonical(value: &FieldValue, out: &mut String) {
    match value {
        FieldValue::Bool(b) => out.push_str(if *b { "b:true;" } else { "b:false;" }),
        FieldValue::Int(i) => {
            out.push_str("s:");
            out.push_str(&i.to_string());
            out.push(';');
        },
        FieldValue::Float(f) => {
            out.push_str("s:");
            out.push_str(&format_float(*f));
            out.push(';');
        },
        FieldValue::String(s) => {
            out.push_str("s:");
            out.push_str(s);
            out.push(';');
        },
        FieldValue::List(items) => {
            out.push_str("l[");
            for item in items {
                write_canonical(item, out);
            }
            out.push(']');
        },
        FieldValue::Set(set) => {
            out.push_str("t[");
            for value in set.values() {
                write_canonical(value, out);
            }
            out.push(']');
        },
        FieldValue::Map(entries) => {
            out.push_str("m[");
            for (k, v) in entries {
                out.push_str(k);
                out.push('=');
                write_canonical(v, out);
            }
            out.push(']');
        },
        FieldValue::Object(fields) => {
            out.push_str("o[");
            for (k, v) in fields {
                out.push_str(k);
                out.push('=');
                write_canonical(v, out);
            }
            out.push(']');
        },
        FieldValue::Unknown => out.push('?'),
    }
}
