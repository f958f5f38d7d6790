//! Value readers: the three interchangeable sources of a field's value.
//!
//! A diff consults up to three sources — persisted state, practitioner
//! configuration and the in-progress diff overlay — unified behind one query
//! interface. [`MultiLevelReader::read_merge`] consults the levels selected
//! by a [`LevelMask`] in ascending priority (state, then config, then diff);
//! the highest selected level that has a value wins.
//! [`MultiLevelReader::read_exact`] restricts lookup to exactly one level and
//! skips fallback.
//!
//! Readers are purely computed views over immutable inputs; they perform no
//! I/O and hold no mutable state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::diff::ChangeSet;
use crate::error::DiffError;
use crate::flatmap::{FlatAttributeMap, COMPUTED_SENTINEL};
use crate::path::{AttrPath, PathStep};
use crate::schema::{AttributeSchema, BlockSchema, SchemaElement, ValueKind, ID_KEY};
use crate::value::{FieldValue, SetValue};

/// The result of reading one field from a reader.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldReadResult {
    /// The value read, when one is present.
    pub value: Option<FieldValue>,
    /// Whether the source had any value at this path. Distinguishes "read
    /// succeeded with an identical value" from "no value present".
    pub exists: bool,
    /// Whether the value at this path is not yet known and will be supplied
    /// by the remote system.
    pub computed: bool,
}

impl FieldReadResult {
    /// No value present at this path.
    pub fn missing() -> Self {
        Self::default()
    }

    /// A concrete value.
    pub fn found(value: FieldValue) -> Self {
        Self {
            value: Some(value),
            exists: true,
            computed: false,
        }
    }

    /// A value that exists but is not yet known.
    pub fn unknown() -> Self {
        Self {
            value: None,
            exists: true,
            computed: true,
        }
    }
}

/// A single source of field values.
pub trait FieldReader {
    /// Read the value at `path`.
    fn read(&self, path: &AttrPath) -> Result<FieldReadResult, DiffError>;
}

/// The three value source levels, in ascending priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Last-known persisted values.
    State,
    /// Practitioner-supplied configuration.
    Config,
    /// Attribute changes already staged for this diff.
    Diff,
}

impl Level {
    /// All levels in ascending priority order.
    pub const ALL: [Level; 3] = [Level::State, Level::Config, Level::Diff];

    /// The mask bit for this level.
    pub const fn mask(self) -> LevelMask {
        match self {
            Level::State => LevelMask::STATE,
            Level::Config => LevelMask::CONFIG,
            Level::Diff => LevelMask::DIFF,
        }
    }
}

/// A bitmask selecting which levels a merged read consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelMask(u8);

impl LevelMask {
    /// The state level (bit 1).
    pub const STATE: LevelMask = LevelMask(1);
    /// The config level (bit 2).
    pub const CONFIG: LevelMask = LevelMask(2);
    /// The diff level (bit 4).
    pub const DIFF: LevelMask = LevelMask(4);
    /// All levels.
    pub const ALL: LevelMask = LevelMask(7);

    /// Whether the mask selects `level`.
    pub fn contains(self, level: Level) -> bool {
        self.0 & level.mask().0 != 0
    }
}

impl std::ops::BitOr for LevelMask {
    type Output = LevelMask;

    fn bitor(self, rhs: LevelMask) -> LevelMask {
        LevelMask(self.0 | rhs.0)
    }
}

/// The 5-tuple describing how a field changed between old and new reads.
#[derive(Debug, Clone)]
pub struct ValueChange {
    /// The old-side read (state level only).
    pub old: FieldReadResult,
    /// The new-side read: the staged diff for customized paths, the
    /// configuration for everything else. Never falls back to state, so a
    /// value dropped from configuration reads as absent.
    pub new: FieldReadResult,
    /// Whether the two sides differ.
    pub changed: bool,
    /// Whether the new-side value is itself not fully known.
    pub computed: bool,
    /// Whether a customization hook already touched this path; default
    /// suppression heuristics are skipped for such paths.
    pub customized: bool,
}

/// A legacy flatmap-encoded state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceState {
    /// The resource's identity.
    pub id: String,
    /// The flattened attribute values.
    pub attributes: FlatAttributeMap,
    /// Whether the resource is marked for destroy-and-recreate regardless of
    /// attribute changes.
    pub tainted: bool,
}

impl InstanceState {
    /// Create a state snapshot with the given identity.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut attributes = FlatAttributeMap::new();
        if !id.is_empty() {
            attributes.insert(ID_KEY, id.clone());
        }
        Self {
            id,
            attributes,
            tainted: false,
        }
    }

    /// Add a flat attribute entry.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Mark the state tainted.
    pub fn tainted(mut self) -> Self {
        self.tainted = true;
        self
    }

    /// Look up a flat attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }
}

/// Practitioner-supplied configuration: a structured value plus the set of
/// paths whose values are not yet known.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfig {
    raw: JsonValue,
    unknown: BTreeSet<String>,
}

impl ResourceConfig {
    /// Wrap a configuration value.
    pub fn new(raw: JsonValue) -> Self {
        Self {
            raw,
            unknown: BTreeSet::new(),
        }
    }

    /// An empty configuration.
    pub fn empty() -> Self {
        Self::new(JsonValue::Object(Default::default()))
    }

    /// Mark a dotted path as not-yet-computed.
    pub fn with_unknown(mut self, path: impl Into<String>) -> Self {
        self.unknown.insert(path.into());
        self
    }

    /// The whole configuration value.
    pub fn raw(&self) -> &JsonValue {
        &self.raw
    }

    /// Get the raw value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let mut current = &self.raw;
        for part in path.split('.') {
            current = match current {
                JsonValue::Object(map) => map.get(part)?,
                JsonValue::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether the value at a dotted path (or any of its ancestors) is not
    /// yet known.
    pub fn is_computed(&self, path: &str) -> bool {
        if self.unknown.is_empty() {
            return false;
        }
        let mut prefix = String::new();
        for part in path.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            if self.unknown.contains(&prefix) {
                return true;
            }
        }
        false
    }
}

/// Resolve a structured path against a schema tree.
pub(crate) enum Resolved<'a> {
    /// The path addresses an attribute (possibly a nested element schema).
    Attr(&'a AttributeSchema),
    /// The path addresses a container's count sentinel.
    Count(&'a AttributeSchema),
}

pub(crate) fn resolve<'a>(
    root: &'a BlockSchema,
    path: &AttrPath,
) -> Result<Resolved<'a>, DiffError> {
    let unknown = || DiffError::UnknownAttribute(path.flatten());
    let mut steps = path.steps().iter().peekable();
    let mut attr = match steps.next() {
        Some(PathStep::Field(name)) => root.get(name).ok_or_else(unknown)?,
        _ => return Err(unknown()),
    };
    while let Some(step) = steps.next() {
        match step {
            PathStep::CountList | PathStep::CountMap => {
                if steps.peek().is_some() {
                    return Err(unknown());
                }
                return Ok(Resolved::Count(attr));
            },
            PathStep::Index(_) | PathStep::Code(_) => match attr.elem.as_ref() {
                Some(SchemaElement::Primitive(p)) => attr = p,
                Some(SchemaElement::Block(block)) => match steps.next() {
                    Some(PathStep::Field(f)) => {
                        attr = block.get(f).ok_or_else(unknown)?;
                    },
                    _ => return Err(unknown()),
                },
                None => return Err(DiffError::MissingElement(path.flatten())),
            },
            PathStep::Field(_) | PathStep::Key(_) => return Err(unknown()),
        }
    }
    Ok(Resolved::Attr(attr))
}

/// Parse a dotted key against a schema into a structured path.
pub(crate) fn parse_path(root: &BlockSchema, key: &str) -> Result<AttrPath, DiffError> {
    enum Cursor<'a> {
        Attr(&'a AttributeSchema),
        Block(&'a BlockSchema),
        Done,
    }

    let unknown = || DiffError::UnknownAttribute(key.to_string());
    let mut parts = key.split('.');
    let first = parts.next().filter(|s| !s.is_empty()).ok_or_else(unknown)?;
    let attr = root.get(first).ok_or_else(unknown)?;
    let mut path = AttrPath::root(first);
    let mut cursor = Cursor::Attr(attr);

    for part in parts {
        cursor = match cursor {
            Cursor::Done => return Err(unknown()),
            Cursor::Block(block) => {
                let field = block.get(part).ok_or_else(unknown)?;
                path = path.field(part);
                Cursor::Attr(field)
            },
            Cursor::Attr(attr) => match attr.kind {
                ValueKind::List | ValueKind::Set if part == "#" => {
                    path = path.count_list();
                    Cursor::Done
                },
                ValueKind::List => {
                    let i: usize = part.parse().map_err(|_| unknown())?;
                    path = path.index(i);
                    descend(attr, key)?
                },
                ValueKind::Set => {
                    path = path.code(part);
                    descend(attr, key)?
                },
                ValueKind::Map if part == "%" => {
                    path = path.count_map();
                    Cursor::Done
                },
                ValueKind::Map => {
                    path = path.key(part);
                    Cursor::Done
                },
                _ => return Err(unknown()),
            },
        };
    }
    return Ok(path);

    fn descend<'a>(attr: &'a AttributeSchema, key: &str) -> Result<Cursor<'a>, DiffError> {
        match attr.elem.as_ref() {
            Some(SchemaElement::Primitive(p)) => Ok(Cursor::Attr(p)),
            Some(SchemaElement::Block(block)) => Ok(Cursor::Block(block)),
            None => Err(DiffError::MissingElement(key.to_string())),
        }
    }
}

/// Schema-driven expansion of a flattened snapshot back into a structured
/// value. This is the decode side of the flatmap boundary.
pub(crate) fn expand_attr(
    map: &FlatAttributeMap,
    prefix: &str,
    attr: &AttributeSchema,
) -> Result<FieldReadResult, DiffError> {
    match attr.kind {
        ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String => {
            match map.get(prefix) {
                Some(v) if v == COMPUTED_SENTINEL => Ok(FieldReadResult::unknown()),
                Some(v) => Ok(FieldReadResult::found(FieldValue::String(v.to_string()))),
                None => Ok(FieldReadResult::missing()),
            }
        },
        ValueKind::List => expand_list(map, prefix, attr),
        ValueKind::Set => expand_set(map, prefix, attr),
        ValueKind::Map => expand_map(map, prefix),
    }
}

fn expand_list(
    map: &FlatAttributeMap,
    prefix: &str,
    attr: &AttributeSchema,
) -> Result<FieldReadResult, DiffError> {
    let count_key = format!("{}.#", prefix);
    let raw = match map.get(&count_key) {
        None => return Ok(FieldReadResult::missing()),
        Some(v) if v == COMPUTED_SENTINEL => return Ok(FieldReadResult::unknown()),
        Some(v) => v,
    };
    let count: usize = raw.parse().map_err(|_| DiffError::Coercion {
        path: count_key.clone(),
        reason: format!("invalid count '{}'", raw),
    })?;
    let elem = attr
        .elem
        .as_ref()
        .ok_or_else(|| DiffError::MissingElement(prefix.to_string()))?;
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        items.push(expand_element(map, &format!("{}.{}", prefix, i), elem)?);
    }
    Ok(FieldReadResult::found(FieldValue::List(items)))
}

fn expand_set(
    map: &FlatAttributeMap,
    prefix: &str,
    attr: &AttributeSchema,
) -> Result<FieldReadResult, DiffError> {
    let count_key = format!("{}.#", prefix);
    if map.get(&count_key) == Some(COMPUTED_SENTINEL) {
        return Ok(FieldReadResult::unknown());
    }
    let mut codes: BTreeSet<String> = BTreeSet::new();
    for (rest, _) in map.under_prefix(prefix) {
        let segment = rest.split('.').next().unwrap_or(rest);
        if segment != "#" {
            codes.insert(segment.to_string());
        }
    }
    if codes.is_empty() && !map.contains_key(&count_key) {
        return Ok(FieldReadResult::missing());
    }
    let elem = attr
        .elem
        .as_ref()
        .ok_or_else(|| DiffError::MissingElement(prefix.to_string()))?;
    let mut set = SetValue::new();
    for code in codes {
        let value = expand_element(map, &format!("{}.{}", prefix, code), elem)?;
        set.insert(code, value);
    }
    Ok(FieldReadResult::found(FieldValue::Set(set)))
}

fn expand_map(map: &FlatAttributeMap, prefix: &str) -> Result<FieldReadResult, DiffError> {
    let count_key = format!("{}.%", prefix);
    if map.get(&count_key) == Some(COMPUTED_SENTINEL) {
        return Ok(FieldReadResult::unknown());
    }
    let mut entries = BTreeMap::new();
    let mut present = map.contains_key(&count_key);
    for (rest, value) in map.under_prefix(prefix) {
        if rest == "%" {
            continue;
        }
        present = true;
        let entry = if value == COMPUTED_SENTINEL {
            FieldValue::Unknown
        } else {
            FieldValue::String(value.to_string())
        };
        entries.insert(rest.to_string(), entry);
    }
    if !present {
        return Ok(FieldReadResult::missing());
    }
    Ok(FieldReadResult::found(FieldValue::Map(entries)))
}

fn expand_element(
    map: &FlatAttributeMap,
    prefix: &str,
    elem: &SchemaElement,
) -> Result<FieldValue, DiffError> {
    match elem {
        SchemaElement::Primitive(p) => {
            let result = expand_attr(map, prefix, p)?;
            if result.computed {
                return Ok(FieldValue::Unknown);
            }
            Ok(result
                .value
                .unwrap_or_else(|| FieldValue::String(String::new())))
        },
        SchemaElement::Block(block) => {
            let mut fields = BTreeMap::new();
            for (name, fattr) in &block.attributes {
                let result = expand_attr(map, &format!("{}.{}", prefix, name), fattr)?;
                if result.computed {
                    fields.insert(name.clone(), FieldValue::Unknown);
                } else if let Some(v) = result.value {
                    fields.insert(name.clone(), v);
                }
            }
            Ok(FieldValue::Object(fields))
        },
    }
}

/// Reads fields out of a flattened state snapshot, expanding them back into
/// structured values guided by the schema.
#[derive(Debug, Clone, Copy)]
pub struct StateReader<'a> {
    schema: &'a BlockSchema,
    state: &'a InstanceState,
}

impl<'a> StateReader<'a> {
    /// Create a state reader.
    pub fn new(schema: &'a BlockSchema, state: &'a InstanceState) -> Self {
        Self { schema, state }
    }
}

impl FieldReader for StateReader<'_> {
    fn read(&self, path: &AttrPath) -> Result<FieldReadResult, DiffError> {
        let flat = path.flatten();
        match resolve(self.schema, path)? {
            Resolved::Count(_) => match self.state.attributes.get(&flat) {
                Some(v) => Ok(FieldReadResult::found(FieldValue::String(v.to_string()))),
                None => Ok(FieldReadResult::missing()),
            },
            Resolved::Attr(attr) => expand_attr(&self.state.attributes, &flat, attr),
        }
    }
}

/// Reads fields out of practitioner configuration, applying schema defaults
/// for absent values and reporting unknown placeholders as computed.
#[derive(Debug, Clone, Copy)]
pub struct ConfigReader<'a> {
    schema: &'a BlockSchema,
    config: &'a ResourceConfig,
}

impl<'a> ConfigReader<'a> {
    /// Create a config reader.
    pub fn new(schema: &'a BlockSchema, config: &'a ResourceConfig) -> Self {
        Self { schema, config }
    }

    fn json_to_field(
        &self,
        json: Option<&JsonValue>,
        attr: &AttributeSchema,
        dotted: &str,
    ) -> Result<FieldReadResult, DiffError> {
        if self.config.is_computed(dotted) {
            return Ok(FieldReadResult::unknown());
        }
        let value = match json {
            None | Some(JsonValue::Null) => {
                if let Some(default) = attr.default_value()? {
                    return Ok(FieldReadResult::found(default.normalize()));
                }
                return Ok(FieldReadResult::missing());
            },
            Some(v) => v,
        };

        match attr.kind {
            ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String => Ok(
                FieldReadResult::found(coerce_primitive(attr.kind, value, dotted)?),
            ),
            ValueKind::List | ValueKind::Set => {
                let items = value.as_array().ok_or_else(|| DiffError::Coercion {
                    path: dotted.to_string(),
                    reason: format!("expected array, got {}", json_kind(value)),
                })?;
                let elem = attr
                    .elem
                    .as_ref()
                    .ok_or_else(|| DiffError::MissingElement(dotted.to_string()))?;
                let mut converted = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    converted.push(self.json_element(item, elem, &format!("{}.{}", dotted, i))?);
                }
                if attr.kind == ValueKind::List {
                    Ok(FieldReadResult::found(FieldValue::List(converted)))
                } else {
                    let mut set = SetValue::new();
                    for item in converted {
                        let code = attr.hash_element(&item).to_string();
                        set.insert(code, item);
                    }
                    Ok(FieldReadResult::found(FieldValue::Set(set)))
                }
            },
            ValueKind::Map => {
                let obj = value.as_object().ok_or_else(|| DiffError::Coercion {
                    path: dotted.to_string(),
                    reason: format!("expected object, got {}", json_kind(value)),
                })?;
                let value_kind = match &attr.elem {
                    Some(SchemaElement::Primitive(p)) => p.kind,
                    _ => ValueKind::String,
                };
                let mut entries = BTreeMap::new();
                for (k, v) in obj {
                    let entry_path = format!("{}.{}", dotted, k);
                    if self.config.is_computed(&entry_path) {
                        entries.insert(k.clone(), FieldValue::Unknown);
                        continue;
                    }
                    if v.is_null() {
                        continue;
                    }
                    entries.insert(k.clone(), coerce_primitive(value_kind, v, &entry_path)?);
                }
                Ok(FieldReadResult::found(FieldValue::Map(entries)))
            },
        }
    }

    fn json_element(
        &self,
        json: &JsonValue,
        elem: &SchemaElement,
        dotted: &str,
    ) -> Result<FieldValue, DiffError> {
        if self.config.is_computed(dotted) {
            return Ok(FieldValue::Unknown);
        }
        match elem {
            SchemaElement::Primitive(p) => {
                if json.is_null() {
                    return Ok(FieldValue::String(String::new()));
                }
                coerce_primitive(p.kind, json, dotted)
            },
            SchemaElement::Block(block) => {
                let obj = json.as_object().ok_or_else(|| DiffError::Coercion {
                    path: dotted.to_string(),
                    reason: format!("expected object, got {}", json_kind(json)),
                })?;
                let mut fields = BTreeMap::new();
                for (name, fattr) in &block.attributes {
                    let field_path = format!("{}.{}", dotted, name);
                    let result = self.json_to_field(obj.get(name), fattr, &field_path)?;
                    if result.computed {
                        fields.insert(name.clone(), FieldValue::Unknown);
                    } else if let Some(v) = result.value {
                        fields.insert(name.clone(), v);
                    }
                }
                Ok(FieldValue::Object(fields))
            },
        }
    }
}

impl FieldReader for ConfigReader<'_> {
    fn read(&self, path: &AttrPath) -> Result<FieldReadResult, DiffError> {
        let name = path
            .first_field()
            .ok_or_else(|| DiffError::UnknownAttribute(path.flatten()))?;
        let attr = self
            .schema
            .get(name)
            .ok_or_else(|| DiffError::UnknownAttribute(path.flatten()))?;
        let root = self.json_to_field(self.config.get(name), attr, name)?;
        Ok(select(root, &path.steps()[1..]))
    }
}

fn select(mut result: FieldReadResult, steps: &[PathStep]) -> FieldReadResult {
    for step in steps {
        if result.computed {
            return FieldReadResult::unknown();
        }
        let Some(value) = result.value else {
            return FieldReadResult::missing();
        };
        let next = match (&value, step) {
            (FieldValue::List(items), PathStep::Index(i)) => items.get(*i).cloned(),
            (FieldValue::List(items), PathStep::CountList) => {
                Some(FieldValue::String(items.len().to_string()))
            },
            (FieldValue::Set(set), PathStep::Code(code)) => set.get(code).cloned(),
            (FieldValue::Set(set), PathStep::CountList) => {
                Some(FieldValue::String(set.len().to_string()))
            },
            (FieldValue::Map(entries), PathStep::Key(key)) => entries.get(key.as_str()).cloned(),
            (FieldValue::Map(entries), PathStep::CountMap) => {
                Some(FieldValue::String(entries.len().to_string()))
            },
            (FieldValue::Object(fields), PathStep::Field(name)) => {
                fields.get(name.as_str()).cloned()
            },
            _ => None,
        };
        result = match next {
            Some(FieldValue::Unknown) => FieldReadResult::unknown(),
            Some(v) => FieldReadResult::found(v),
            None => FieldReadResult::missing(),
        };
    }
    result
}

fn coerce_primitive(
    kind: ValueKind,
    value: &JsonValue,
    dotted: &str,
) -> Result<FieldValue, DiffError> {
    let fail = |expected: &str| DiffError::Coercion {
        path: dotted.to_string(),
        reason: format!("expected {}, got {}", expected, json_kind(value)),
    };
    let flat = match kind {
        ValueKind::Bool => match value {
            JsonValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            JsonValue::String(s) if matches!(s.as_str(), "true" | "false" | "1" | "0") => s.clone(),
            _ => return Err(fail("bool")),
        },
        ValueKind::Int => match value {
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => i.to_string(),
                None => return Err(fail("int")),
            },
            JsonValue::String(s) if s.parse::<i64>().is_ok() => s.clone(),
            _ => return Err(fail("int")),
        },
        ValueKind::Float => match value {
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) => FieldValue::Float(f).flat_string().unwrap_or_default(),
                None => return Err(fail("float")),
            },
            JsonValue::String(s) if s.parse::<f64>().is_ok() => s.clone(),
            _ => return Err(fail("float")),
        },
        ValueKind::String => match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            JsonValue::Number(n) => n.to_string(),
            _ => return Err(fail("string")),
        },
        _ => return Err(fail("primitive")),
    };
    Ok(FieldValue::String(flat))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Overlays staged change records on top of the state/config sources,
/// supporting incremental re-diffing after a customization pass.
pub struct DiffReader<'a> {
    schema: &'a BlockSchema,
    diff: &'a ChangeSet,
    source: Box<MultiLevelReader<'a>>,
}

impl<'a> DiffReader<'a> {
    /// Create a diff reader over the given sources.
    pub fn new(
        schema: &'a BlockSchema,
        state: Option<&'a InstanceState>,
        config: Option<&'a ResourceConfig>,
        diff: &'a ChangeSet,
    ) -> Self {
        Self {
            schema,
            diff,
            source: Box::new(MultiLevelReader::new(schema, state, config)),
        }
    }
}

impl FieldReader for DiffReader<'_> {
    fn read(&self, path: &AttrPath) -> Result<FieldReadResult, DiffError> {
        let flat = path.flatten();
        let resolved = resolve(self.schema, path)?;
        let container = match &resolved {
            Resolved::Attr(attr) => !attr.kind.is_primitive(),
            Resolved::Count(_) => false,
        };

        if !container {
            if let Some(record) = self.diff.get(&flat) {
                if record.new_computed {
                    return Ok(FieldReadResult::unknown());
                }
                if record.new_removed {
                    return Ok(FieldReadResult::missing());
                }
                return Ok(FieldReadResult::found(FieldValue::String(
                    record.new.clone(),
                )));
            }
            return self
                .source
                .read_merge(path, LevelMask::STATE | LevelMask::CONFIG);
        }

        let attr = match resolved {
            Resolved::Attr(attr) => attr,
            Resolved::Count(_) => unreachable!("count reads are primitive"),
        };
        let base = self
            .source
            .read_merge(path, LevelMask::STATE | LevelMask::CONFIG)?;
        let mut flatmap = FlatAttributeMap::new();
        if let Some(v) = &base.value {
            flatmap.write_value(&flat, v);
        }
        let mut touched = base.exists || base.computed;
        for (key, record) in self.diff.matching_prefix(&flat) {
            touched = true;
            if record.new_removed {
                flatmap.remove(key);
            } else if record.new_computed {
                flatmap.insert(key, COMPUTED_SENTINEL);
            } else {
                flatmap.insert(key, record.new.clone());
            }
        }
        if !touched {
            return Ok(FieldReadResult::missing());
        }
        expand_attr(&flatmap, &flat, attr)
    }
}

/// The unified, precedence-ordered view over the three value sources.
pub struct MultiLevelReader<'a> {
    state: Option<StateReader<'a>>,
    config: Option<ConfigReader<'a>>,
    diff: Option<DiffReader<'a>>,
    customized: BTreeSet<String>,
}

impl<'a> MultiLevelReader<'a> {
    /// A reader over state and config (the normal diff pass).
    pub fn new(
        schema: &'a BlockSchema,
        state: Option<&'a InstanceState>,
        config: Option<&'a ResourceConfig>,
    ) -> Self {
        Self {
            state: state.map(|s| StateReader::new(schema, s)),
            config: config.map(|c| ConfigReader::new(schema, c)),
            diff: None,
            customized: BTreeSet::new(),
        }
    }

    /// A reader that also consults a staged diff overlay; `customized` names
    /// the top-level keys a customization hook touched.
    pub fn with_diff(
        schema: &'a BlockSchema,
        state: Option<&'a InstanceState>,
        config: Option<&'a ResourceConfig>,
        diff: &'a ChangeSet,
        customized: BTreeSet<String>,
    ) -> Self {
        Self {
            state: state.map(|s| StateReader::new(schema, s)),
            config: config.map(|c| ConfigReader::new(schema, c)),
            diff: Some(DiffReader::new(schema, state, config, diff)),
            customized,
        }
    }

    /// Whether a state level is present.
    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    /// The instance identity from the state level, or "" when creating.
    pub fn instance_id(&self) -> &str {
        self.state.map(|r| r.state.id.as_str()).unwrap_or("")
    }

    /// Read from exactly one level, skipping fallback.
    pub fn read_exact(&self, path: &AttrPath, level: Level) -> Result<FieldReadResult, DiffError> {
        let reader: Option<&dyn FieldReader> = match level {
            Level::State => self.state.as_ref().map(|r| r as &dyn FieldReader),
            Level::Config => self.config.as_ref().map(|r| r as &dyn FieldReader),
            Level::Diff => self.diff.as_ref().map(|r| r as &dyn FieldReader),
        };
        match reader {
            Some(r) => r.read(path),
            None => Ok(FieldReadResult::missing()),
        }
    }

    /// Read across the levels selected by `mask`, consulted in ascending
    /// priority; the highest selected level with a value wins.
    pub fn read_merge(&self, path: &AttrPath, mask: LevelMask) -> Result<FieldReadResult, DiffError> {
        let mut result = FieldReadResult::missing();
        for level in Level::ALL {
            if !mask.contains(level) {
                continue;
            }
            let candidate = self.read_exact(path, level)?;
            if candidate.exists || candidate.computed {
                result = candidate;
            }
        }
        Ok(result)
    }

    /// The primary query interface: `get(path, level_mask)`.
    pub fn get(&self, path: &AttrPath, mask: LevelMask) -> Result<FieldReadResult, DiffError> {
        self.read_merge(path, mask)
    }

    /// The old/new change tuple for a path: old comes from the state level
    /// alone, new from the staged diff for paths a hook touched and from the
    /// configuration otherwise. State never backs the new side; a value
    /// dropped from configuration reads as absent so removals are visible.
    pub fn get_change(&self, path: &AttrPath) -> Result<ValueChange, DiffError> {
        let old = if self.state.is_some() {
            self.read_exact(path, Level::State)?
        } else {
            FieldReadResult::missing()
        };
        let customized_path = path
            .first_field()
            .map(|f| self.customized.contains(f))
            .unwrap_or(false);
        let new_level = if self.diff.is_some() && customized_path {
            Level::Diff
        } else {
            Level::Config
        };
        let new = self.read_exact(path, new_level)?;

        let old_value = if old.exists { old.value.clone() } else { None };
        let new_value = if new.exists { new.value.clone() } else { None };
        let changed = old_value != new_value;
        let computed = new.computed;
        Ok(ValueChange {
            old,
            new,
            changed,
            computed,
            customized: customized_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaElement;
    use serde_json::json;

    fn schema() -> BlockSchema {
        BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute("id", AttributeSchema::computed_string())
            .with_attribute(
                "ports",
                AttributeSchema::list(SchemaElement::int()).optional(),
            )
            .with_attribute("tags", AttributeSchema::map_of_strings().optional())
            .with_attribute(
                "ingress",
                AttributeSchema::list(SchemaElement::block(
                    BlockSchema::new()
                        .with_attribute("port", AttributeSchema::required_int())
                        .with_attribute("proto", AttributeSchema::optional_string()),
                ))
                .optional(),
            )
    }

    #[test]
    fn test_state_reader_primitive() {
        let schema = schema();
        let state = InstanceState::new("i-1").with_attribute("name", "web");
        let reader = StateReader::new(&schema, &state);

        let result = reader.read(&AttrPath::root("name")).unwrap();
        assert_eq!(result.value, Some(FieldValue::String("web".into())));
        assert!(result.exists);

        let result = reader.read(&AttrPath::root("tags")).unwrap();
        assert!(!result.exists);
    }

    #[test]
    fn test_state_reader_list_and_count() {
        let schema = schema();
        let state = InstanceState::new("i-1")
            .with_attribute("ports.#", "2")
            .with_attribute("ports.0", "80")
            .with_attribute("ports.1", "443");
        let reader = StateReader::new(&schema, &state);

        let result = reader.read(&AttrPath::root("ports")).unwrap();
        assert_eq!(
            result.value,
            Some(FieldValue::List(vec![
                FieldValue::String("80".into()),
                FieldValue::String("443".into()),
            ]))
        );

        let count = reader.read(&AttrPath::root("ports").count_list()).unwrap();
        assert_eq!(count.value, Some(FieldValue::String("2".into())));

        let elem = reader.read(&AttrPath::root("ports").index(1)).unwrap();
        assert_eq!(elem.value, Some(FieldValue::String("443".into())));
    }

    #[test]
    fn test_state_reader_map() {
        let schema = schema();
        let state = InstanceState::new("i-1")
            .with_attribute("tags.%", "2")
            .with_attribute("tags.env", "prod")
            .with_attribute("tags.team", "infra");
        let reader = StateReader::new(&schema, &state);

        let result = reader.read(&AttrPath::root("tags")).unwrap();
        let decoded = result.value.unwrap().as_string_map().unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_state_reader_nested_block() {
        let schema = schema();
        let state = InstanceState::new("i-1")
            .with_attribute("ingress.#", "1")
            .with_attribute("ingress.0.port", "80")
            .with_attribute("ingress.0.proto", "tcp");
        let reader = StateReader::new(&schema, &state);

        let result = reader
            .read(&AttrPath::root("ingress").index(0).field("port"))
            .unwrap();
        assert_eq!(result.value, Some(FieldValue::String("80".into())));
    }

    #[test]
    fn test_config_reader_primitives_and_defaults() {
        let schema = BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute(
                "size",
                AttributeSchema::optional_int().optional_computed().with_default(10_i64),
            );
        let config = ResourceConfig::new(json!({ "name": "web" }));
        let reader = ConfigReader::new(&schema, &config);

        let result = reader.read(&AttrPath::root("name")).unwrap();
        assert_eq!(result.value, Some(FieldValue::String("web".into())));

        // Absent value falls back to the schema default.
        let result = reader.read(&AttrPath::root("size")).unwrap();
        assert_eq!(result.value, Some(FieldValue::String("10".into())));
    }

    #[test]
    fn test_config_reader_unknown() {
        let schema = schema();
        let config = ResourceConfig::new(json!({ "name": "web" })).with_unknown("name");
        let reader = ConfigReader::new(&schema, &config);

        let result = reader.read(&AttrPath::root("name")).unwrap();
        assert!(result.computed);
        assert!(result.exists);
    }

    #[test]
    fn test_config_reader_coercion_error() {
        let schema = schema();
        let config = ResourceConfig::new(json!({ "ports": ["eighty"] }));
        let reader = ConfigReader::new(&schema, &config);

        let err = reader.read(&AttrPath::root("ports")).unwrap_err();
        assert!(matches!(err, DiffError::Coercion { .. }));
    }

    #[test]
    fn test_merge_precedence_config_over_state() {
        let schema = schema();
        let state = InstanceState::new("i-1").with_attribute("name", "old");
        let config = ResourceConfig::new(json!({ "name": "new" }));
        let reader = MultiLevelReader::new(&schema, Some(&state), Some(&config));

        let merged = reader
            .read_merge(&AttrPath::root("name"), LevelMask::STATE | LevelMask::CONFIG)
            .unwrap();
        assert_eq!(merged.value, Some(FieldValue::String("new".into())));

        let exact = reader
            .read_exact(&AttrPath::root("name"), Level::State)
            .unwrap();
        assert_eq!(exact.value, Some(FieldValue::String("old".into())));
    }

    #[test]
    fn test_merge_falls_back_to_state() {
        let schema = schema();
        let state = InstanceState::new("i-1").with_attribute("name", "kept");
        let config = ResourceConfig::new(json!({}));
        let reader = MultiLevelReader::new(&schema, Some(&state), Some(&config));

        let merged = reader
            .read_merge(&AttrPath::root("name"), LevelMask::STATE | LevelMask::CONFIG)
            .unwrap();
        assert_eq!(merged.value, Some(FieldValue::String("kept".into())));
    }

    #[test]
    fn test_get_change() {
        let schema = schema();
        let state = InstanceState::new("i-1").with_attribute("name", "old");
        let config = ResourceConfig::new(json!({ "name": "new" }));
        let reader = MultiLevelReader::new(&schema, Some(&state), Some(&config));

        let change = reader.get_change(&AttrPath::root("name")).unwrap();
        assert!(change.changed);
        assert!(!change.computed);
        assert!(!change.customized);
        assert_eq!(change.old.value, Some(FieldValue::String("old".into())));
        assert_eq!(change.new.value, Some(FieldValue::String("new".into())));
    }

    #[test]
    fn test_resource_config_paths() {
        let config = ResourceConfig::new(json!({
            "ingress": [{ "port": 80 }],
            "tags": { "env": "prod" }
        }))
        .with_unknown("tags.owner");

        assert_eq!(config.get("ingress.0.port"), Some(&json!(80)));
        assert_eq!(config.get("tags.env"), Some(&json!("prod")));
        assert_eq!(config.get("missing"), None);
        assert!(config.is_computed("tags.owner"));
        assert!(!config.is_computed("tags.env"));

        let nested_unknown = ResourceConfig::new(json!({})).with_unknown("ingress");
        assert!(nested_unknown.is_computed("ingress.0.port"));
    }

    #[test]
    fn test_parse_path() {
        let schema = schema();
        assert_eq!(
            parse_path(&schema, "ingress.0.port").unwrap(),
            AttrPath::root("ingress").index(0).field("port")
        );
        assert_eq!(
            parse_path(&schema, "ports.#").unwrap(),
            AttrPath::root("ports").count_list()
        );
        assert_eq!(
            parse_path(&schema, "tags.%").unwrap(),
            AttrPath::root("tags").count_map()
        );
        assert_eq!(
            parse_path(&schema, "tags.env").unwrap(),
            AttrPath::root("tags").key("env")
        );
        assert!(parse_path(&schema, "nope").is_err());
        assert!(parse_path(&schema, "name.0").is_err());
    }
}
