//! The differ: turns schema + state + config into a change-set.
//!
//! The walk is schema-driven: every declared top-level attribute is diffed by
//! its kind (primitive, list, map, set), recursing through element schemas
//! with structured [`AttrPath`]s and flattening only when records are keyed
//! into the [`ChangeSet`]. Set elements are identified by content hash, so
//! reordering a set never produces a diff.
//!
//! Two post-passes follow the walk: a registered customization hook may
//! mutate the draft (see [`crate::customize`]), and when the caller asks for
//! replacement handling, any requires-replacement record triggers a second,
//! state-less diff whose values win while the replacement flags are OR'd in
//! from the first pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::customize::{apply_mutations, CustomizeDiff, DiffView};
use crate::error::DiffError;
use crate::path::AttrPath;
use crate::reader::{
    FieldReadResult, InstanceState, LevelMask, MultiLevelReader, ResourceConfig,
};
use crate::schema::{AttributeSchema, BlockSchema, SchemaElement, ValueKind, ID_KEY};
use crate::value::{FieldValue, SetValue};

/// One attribute's change between old and new.
///
/// Values are the string-flattened representations used by the legacy
/// encoding; container membership changes appear as separate records under
/// the container's dotted keys, alongside a `.#`/`.%` count record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The old flattened value ("" when absent).
    pub old: String,
    /// The new flattened value ("" when absent or computed).
    pub new: String,
    /// The new value is not yet known and will be supplied by the remote
    /// system.
    pub new_computed: bool,
    /// An existing value disappears and is not merely defaulted.
    pub new_removed: bool,
    /// This change mandates destroy-then-create of the resource.
    pub requires_replacement: bool,
    /// Hidden in rendered output; display only, never execution semantics.
    pub sensitive: bool,
}

impl ChangeRecord {
    /// A plain old→new change.
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            ..Default::default()
        }
    }

    /// A change whose new value is not yet known.
    pub fn computed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_computed: true,
            ..Default::default()
        }
    }

    /// A removal of an existing value.
    pub fn removed(old: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new_removed: true,
            ..Default::default()
        }
    }

    /// Whether this record changes nothing.
    pub fn is_noop(&self) -> bool {
        self.old == self.new && !self.new_computed && !self.new_removed
    }
}

/// The finished diff: a map from flattened attribute key to change record.
///
/// An empty change-set is the valid "no differences" result, distinguished
/// from an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    attributes: BTreeMap<String, ChangeRecord>,
}

impl ChangeSet {
    /// Create an empty change-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record at a flattened key.
    pub fn insert(&mut self, key: impl Into<String>, record: ChangeRecord) {
        self.attributes.insert(key.into(), record);
    }

    /// The record at a flattened key.
    pub fn get(&self, key: &str) -> Option<&ChangeRecord> {
        self.attributes.get(key)
    }

    /// Remove the record at a flattened key.
    pub fn remove(&mut self, key: &str) -> Option<ChangeRecord> {
        self.attributes.remove(key)
    }

    /// Iterate over all records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChangeRecord)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// All record keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the change-set records no differences.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Whether any record requires resource replacement.
    pub fn requires_replacement(&self) -> bool {
        self.attributes.values().any(|r| r.requires_replacement)
    }

    /// Whether a record exists at `key` or anywhere below it.
    pub fn touches(&self, key: &str) -> bool {
        self.attributes.contains_key(key) || self.matching_prefix(key).next().is_some()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ChangeRecord)> {
        self.attributes.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Records strictly below `key`.
    pub(crate) fn matching_prefix<'s>(
        &'s self,
        key: &str,
    ) -> impl Iterator<Item = (&'s str, &'s ChangeRecord)> {
        let dotted = format!("{}.", key);
        self.attributes
            .iter()
            .filter(move |(k, _)| k.starts_with(&dotted))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Drop the record at `key` and every record below it.
    pub(crate) fn remove_subtree(&mut self, key: &str) {
        let dotted = format!("{}.", key);
        self.attributes
            .retain(|k, _| k != key && !k.starts_with(&dotted));
    }

    /// Flag the record at `key` and every record below it as requiring
    /// replacement.
    pub(crate) fn force_subtree(&mut self, key: &str) {
        let dotted = format!("{}.", key);
        for (k, record) in self.attributes.iter_mut() {
            if k == key || k.starts_with(&dotted) {
                record.requires_replacement = true;
            }
        }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = (&'a String, &'a ChangeRecord);
    type IntoIter = std::collections::btree_map::Iter<'a, String, ChangeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}

/// The diff engine for one resource schema.
///
/// Construction validates the schema tree once; malformed schemas are a
/// fatal registration-time error and never surface during a live diff.
#[derive(Debug, Clone, Copy)]
pub struct Differ<'a> {
    schema: &'a BlockSchema,
}

impl<'a> Differ<'a> {
    /// Create a differ, validating the schema.
    pub fn new(schema: &'a BlockSchema) -> Result<Self, DiffError> {
        schema.validate()?;
        Ok(Self { schema })
    }

    /// Compute the change-set between `state` and `config`.
    ///
    /// `customize` runs against the draft after the structural walk; its
    /// mutations are applied and the touched attributes re-diffed. When
    /// `handle_requires_new` is set and any record requires replacement, the
    /// whole diff is recomputed a second time without state (as if the
    /// resource were being created fresh) and the replacement flags from the
    /// first pass are OR'd onto the second pass's records.
    pub fn diff<M>(
        &self,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
        customize: Option<&dyn CustomizeDiff<M>>,
        meta: &M,
        handle_requires_new: bool,
    ) -> Result<ChangeSet, DiffError> {
        let mut result = self.run_pass(state, config, customize, meta)?;

        if handle_requires_new && result.requires_replacement() {
            debug!("replacement required, re-diffing without state");
            let mut fresh = self.run_pass(None, config, customize, meta)?;

            // The second pass simulates creation, so none of its own records
            // carry replacement; restore the pre-destroy old values so the
            // plan still shows what is being replaced.
            for (key, record) in fresh.iter_mut() {
                record.requires_replacement = false;
                record.old = match state {
                    Some(s) => s.attributes.get(key).unwrap_or("").to_string(),
                    None => String::new(),
                };
            }

            // Replacement flags OR in from the first pass so the caller can
            // see why replacement is required without losing the as-if-new
            // shape of the plan.
            for (key, record) in result.iter() {
                if !record.requires_replacement {
                    continue;
                }
                match fresh.attributes.get_mut(key) {
                    Some(existing) => existing.requires_replacement = true,
                    None => {
                        fresh.insert(key, record.clone());
                    },
                }
            }
            result = fresh;
        }

        self.flag_identity(state, &mut result);
        debug!(records = result.len(), "diff complete");
        Ok(result)
    }

    /// One full structural walk plus the customization hook.
    fn run_pass<M>(
        &self,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
        customize: Option<&dyn CustomizeDiff<M>>,
        meta: &M,
    ) -> Result<ChangeSet, DiffError> {
        let reader = MultiLevelReader::new(self.schema, state, Some(config));
        let mut result = ChangeSet::new();
        for (name, attr) in &self.schema.attributes {
            self.diff_attribute(&AttrPath::root(name), attr, &reader, false, &mut result)?;
        }

        let Some(hook) = customize else {
            return Ok(result);
        };

        // The hook runs against a deep copy of the schema so it can never
        // corrupt the shared schema tree.
        let schema_copy = self.schema.clone();
        let applied = {
            let view = DiffView::new(&schema_copy, state, Some(config), &result);
            let mutations = hook.customize(&view, meta)?;
            if mutations.is_empty() {
                None
            } else {
                trace!(mutations = mutations.len(), "applying hook mutations");
                Some(apply_mutations(&view, mutations)?)
            }
        };
        let Some(applied) = applied else {
            return Ok(result);
        };

        // Re-diff only the attributes the hook touched, with the mutated
        // draft layered in as the diff-level source.
        let reread = MultiLevelReader::with_diff(
            self.schema,
            state,
            Some(config),
            &applied.combined,
            applied.touched.clone(),
        );
        for name in &applied.touched {
            let attr = self
                .schema
                .get(name)
                .ok_or_else(|| DiffError::UnknownAttribute(name.clone()))?;
            result.remove_subtree(name);
            self.diff_attribute(&AttrPath::root(name), attr, &reread, false, &mut result)?;
        }
        for key in &applied.forced {
            result.force_subtree(key);
        }
        Ok(result)
    }

    /// Force the reserved identity attribute to require replacement whenever
    /// anything else does (or the instance is tainted), so consumers can
    /// detect replacement without re-walking every record.
    fn flag_identity(&self, state: Option<&InstanceState>, result: &mut ChangeSet) {
        let tainted = state.map(|s| s.tainted).unwrap_or(false);
        if !result.requires_replacement() && !tainted {
            return;
        }
        let old = state.map(|s| s.id.clone()).unwrap_or_default();
        let mut record = ChangeRecord::computed(old);
        record.requires_replacement = true;
        result.insert(ID_KEY, record);
    }

    fn diff_attribute(
        &self,
        path: &AttrPath,
        attr: &AttributeSchema,
        reader: &MultiLevelReader<'_>,
        all: bool,
        result: &mut ChangeSet,
    ) -> Result<(), DiffError> {
        if attr.kind.is_primitive() {
            self.diff_primitive(path, attr, reader, all, result)
        } else {
            match attr.kind {
                ValueKind::List => self.diff_list(path, attr, reader, all, result),
                ValueKind::Map => self.diff_map(path, attr, reader, all, result),
                ValueKind::Set => self.diff_set(path, attr, reader, all, result),
                _ => unreachable!("primitive kinds handled above"),
            }
        }
    }

    fn diff_primitive(
        &self,
        path: &AttrPath,
        attr: &AttributeSchema,
        reader: &MultiLevelReader<'_>,
        all: bool,
        result: &mut ChangeSet,
    ) -> Result<(), DiffError> {
        let key = path.flatten();
        let change = reader.get_change(path)?;
        let computed = change.computed;

        // State-encoding transform applies to the new side before comparing.
        let mut new_value = change.new.value.clone();
        if let Some(state_fn) = &attr.state_fn {
            new_value = new_value.map(|v| state_fn(&v));
        }

        let old_str = flat(&change.old.value);
        let new_str = if computed {
            String::new()
        } else {
            flat(&new_value)
        };

        if old_str == new_str && !computed && !all {
            // Identical values are a no-op once the resource exists. Before
            // creation an empty computed attribute still needs a record so
            // finalization can mark it pending.
            if !old_str.is_empty() || !reader.instance_id().is_empty() {
                return Ok(());
            }
            if !attr.computed {
                return Ok(());
            }
        }

        let removed = change.old.exists && !change.new.exists && !computed;
        if removed && attr.computed {
            // A computed value keeps its last-known value when config drops
            // it; the remote system owns it.
            return Ok(());
        }

        let record = ChangeRecord {
            old: old_str,
            new: new_str,
            new_computed: computed,
            new_removed: removed,
            requires_replacement: false,
            sensitive: false,
        };
        if let Some(record) = self.finalize(&key, attr, record, change.customized, all) {
            trace!(attribute = %key, "primitive change");
            result.insert(key, record);
        }
        Ok(())
    }

    fn diff_list(
        &self,
        path: &AttrPath,
        attr: &AttributeSchema,
        reader: &MultiLevelReader<'_>,
        all: bool,
        result: &mut ChangeSet,
    ) -> Result<(), DiffError> {
        let change = reader.get_change(path)?;
        let computed_list = change.computed;
        if change.old.exists && !change.new.exists && !computed_list && attr.computed {
            // A computed list keeps its last-known value when config drops it.
            return Ok(());
        }
        let old_items = coerce_items(&change.old);
        let new_items = if computed_list {
            Vec::new()
        } else {
            coerce_items(&change.new)
        };
        let new_set = change.new.exists && !computed_list;

        if !all && new_set && old_items == new_items {
            return Ok(());
        }

        let old_len = old_items.len();
        let new_len = new_items.len();
        let count_key = path.count_list().flatten();

        if computed_list {
            // The whole list is pending; only the count is recordable.
            let mut record = ChangeRecord::computed(old_len.to_string());
            record.requires_replacement = attr.force_new;
            result.insert(count_key, record);
            return Ok(());
        }

        let changed = old_len != new_len;
        let count_computed = old_len == 0 && new_len == 0 && attr.computed;
        if changed || count_computed || all {
            let count_schema = count_schema(attr);
            let (old_str, new_str) = if count_computed {
                (String::new(), String::new())
            } else {
                (old_len.to_string(), new_len.to_string())
            };
            let record = ChangeRecord::new(old_str, new_str);
            if let Some(record) =
                self.finalize(&count_key, &count_schema, record, change.customized, all)
            {
                result.insert(count_key, record);
            }
        }

        let elem = attr
            .elem
            .as_ref()
            .ok_or_else(|| DiffError::MissingElement(path.flatten()))?;
        for i in 0..old_len.max(new_len) {
            match elem {
                SchemaElement::Block(block) => {
                    for (name, child) in &block.attributes {
                        self.diff_attribute(&path.index(i).field(name), child, reader, all, result)?;
                    }
                },
                SchemaElement::Primitive(p) => {
                    let mut elem_schema = (**p).clone();
                    elem_schema.force_new = attr.force_new;
                    self.diff_attribute(&path.index(i), &elem_schema, reader, all, result)?;
                },
            }
        }
        Ok(())
    }

    fn diff_map(
        &self,
        path: &AttrPath,
        attr: &AttributeSchema,
        reader: &MultiLevelReader<'_>,
        all: bool,
        result: &mut ChangeSet,
    ) -> Result<(), DiffError> {
        let change = reader.get_change(path)?;
        let computed = change.computed;
        if change.old.exists && !change.new.exists && !computed && attr.computed {
            return Ok(());
        }
        let old_map = decode_string_map(&change.old, path)?;
        let new_map = if computed {
            BTreeMap::new()
        } else {
            decode_string_map(&change.new, path)?
        };
        let old_len = old_map.len();
        let new_len = new_map.len();
        let count_key = path.count_map().flatten();

        if computed {
            let mut record = ChangeRecord::computed(old_len.to_string());
            record.requires_replacement = attr.force_new;
            result.insert(count_key, record);
            return Ok(());
        }

        let changed = old_len != new_len;
        // Computed only when never instantiated; a map that existed once and
        // is now empty is a genuine removal, not pending computation.
        let count_computed =
            old_len == 0 && new_len == 0 && attr.computed && !change.old.exists;
        if changed || count_computed {
            let count_schema = count_schema(attr);
            let (old_str, new_str) = if count_computed {
                (String::new(), String::new())
            } else {
                (old_len.to_string(), new_len.to_string())
            };
            let record = ChangeRecord::new(old_str, new_str);
            if let Some(record) =
                self.finalize(&count_key, &count_schema, record, change.customized, all)
            {
                result.insert(count_key, record);
            }
        }

        // Entry records, preferring config-side values.
        let mut remaining = old_map;
        for (entry, new_value) in &new_map {
            let old_value = remaining.remove(entry);
            if old_value.as_deref() == Some(new_value.as_str()) && !all {
                continue;
            }
            let entry_key = path.key(entry).flatten();
            let record = ChangeRecord::new(old_value.unwrap_or_default(), new_value.clone());
            if let Some(record) = self.finalize(&entry_key, attr, record, change.customized, all) {
                result.insert(entry_key, record);
            }
        }
        for (entry, old_value) in remaining {
            let entry_key = path.key(&entry).flatten();
            let record = ChangeRecord::removed(old_value);
            if let Some(record) = self.finalize(&entry_key, attr, record, change.customized, all) {
                result.insert(entry_key, record);
            }
        }
        Ok(())
    }

    fn diff_set(
        &self,
        path: &AttrPath,
        attr: &AttributeSchema,
        reader: &MultiLevelReader<'_>,
        all: bool,
        result: &mut ChangeSet,
    ) -> Result<(), DiffError> {
        let change = reader.get_change(path)?;
        let computed_set = change.computed;
        if change.old.exists && !change.new.exists && !computed_set && attr.computed {
            return Ok(());
        }
        let old_set = coerce_set(&change.old);
        let new_set_value = if computed_set {
            SetValue::new()
        } else {
            coerce_set(&change.new)
        };
        let new_present = change.new.exists && !computed_set;

        // Changed means the sorted element hash lists differ; structural
        // equality breaks down when elements contain unknowns.
        if !all && new_present && old_set.codes() == new_set_value.codes() {
            return Ok(());
        }

        let count_key = path.count_list().flatten();
        let count_schema = count_schema(attr);

        if computed_set || (attr.computed && !new_present) {
            // Reuse a previously recorded count rather than fabricating a
            // spurious zero.
            let prior = reader.get(&path.count_list(), LevelMask::ALL)?;
            let prior_count = prior.value.as_ref().and_then(FieldValue::flat_string);
            if !computed_set && prior_count.as_deref() == Some("0") {
                return Ok(());
            }
            let old_str = match prior_count {
                Some(c) if prior.exists && !prior.computed => c,
                _ => String::new(),
            };
            let record = ChangeRecord::computed(old_str);
            if let Some(record) =
                self.finalize(&count_key, &count_schema, record, change.customized, all)
            {
                result.insert(count_key, record);
            }
            return Ok(());
        }

        let old_len = old_set.len();
        let new_len = new_set_value.len();
        if old_len != new_len || all {
            let record = ChangeRecord::new(old_len.to_string(), new_len.to_string());
            if let Some(record) =
                self.finalize(&count_key, &count_schema, record, change.customized, all)
            {
                result.insert(count_key, record);
            }
        }

        // Diff removed codes plus every new code, all in collect-everything
        // mode so each element's sub-attributes are represented for removal
        // display.
        let elem = attr
            .elem
            .as_ref()
            .ok_or_else(|| DiffError::MissingElement(path.flatten()))?;
        let removed = old_set.difference(&new_set_value);
        let codes: Vec<String> = removed
            .codes()
            .into_iter()
            .chain(new_set_value.codes())
            .collect();
        for code in codes {
            match elem {
                SchemaElement::Block(block) => {
                    for (name, child) in &block.attributes {
                        self.diff_attribute(
                            &path.code(&code).field(name),
                            child,
                            reader,
                            true,
                            result,
                        )?;
                    }
                },
                SchemaElement::Primitive(p) => {
                    let mut elem_schema = (**p).clone();
                    elem_schema.force_new = attr.force_new;
                    self.diff_attribute(&path.code(&code), &elem_schema, reader, true, result)?;
                },
            }
        }
        Ok(())
    }

    /// Schema-level record finalization: boolean normalization, diff
    /// suppression, computed erasure and replacement flagging.
    fn finalize(
        &self,
        key: &str,
        attr: &AttributeSchema,
        mut record: ChangeRecord,
        customized: bool,
        all: bool,
    ) -> Option<ChangeRecord> {
        if attr.kind == ValueKind::Bool {
            record.old = normalize_bool(record.old);
            record.new = normalize_bool(record.new);
        }

        if let Some(suppress) = &attr.diff_suppress {
            let changed = record.old != record.new || record.new_removed;
            if changed && !record.new_computed && !customized && suppress(key, &record.old, &record.new)
            {
                if all {
                    // A parent set is collecting its identity list; omit the
                    // suppressed record entirely.
                    return None;
                }
                // Neutralize into a no-op change.
                record = ChangeRecord::new(record.old.clone(), record.old);
            }
        }

        if !record.new_removed && attr.computed && !customized {
            if !record.old.is_empty() && record.new.is_empty() && !record.new_computed {
                record.new = record.old.clone();
            }
            if record.new.is_empty() && !record.new_computed {
                record.new_computed = true;
            }
        }

        if attr.force_new && (record.old != record.new || record.new_computed) {
            record.requires_replacement = true;
        }
        if attr.sensitive {
            record.sensitive = true;
        }
        Some(record)
    }
}

fn flat(value: &Option<FieldValue>) -> String {
    value
        .as_ref()
        .and_then(FieldValue::flat_string)
        .unwrap_or_default()
}

fn coerce_items(result: &FieldReadResult) -> Vec<FieldValue> {
    match &result.value {
        Some(FieldValue::List(items)) => items.clone(),
        Some(FieldValue::Set(set)) => set.to_list(),
        _ => Vec::new(),
    }
}

fn coerce_set(result: &FieldReadResult) -> SetValue {
    match &result.value {
        Some(FieldValue::Set(set)) => set.clone(),
        _ => SetValue::new(),
    }
}

fn decode_string_map(
    result: &FieldReadResult,
    path: &AttrPath,
) -> Result<BTreeMap<String, String>, DiffError> {
    match &result.value {
        None => Ok(BTreeMap::new()),
        Some(value) => value.as_string_map().map_err(|reason| DiffError::Coercion {
            path: path.flatten(),
            reason,
        }),
    }
}

/// The synthetic schema for a container's count record: an int inheriting
/// the container's computed and force-new behavior.
fn count_schema(attr: &AttributeSchema) -> AttributeSchema {
    let mut count = AttributeSchema::new(ValueKind::Int);
    count.computed = attr.computed;
    count.force_new = attr.force_new;
    count
}

fn normalize_bool(value: String) -> String {
    match value.as_str() {
        "0" => "false".to_string(),
        "1" => "true".to_string(),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customize::DiffMutation;
    use crate::flatmap::FlatAttributeMap;
    use serde_json::json;

    const NO_HOOK: Option<&dyn CustomizeDiff<()>> = None;

    fn diff(
        schema: &BlockSchema,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
    ) -> ChangeSet {
        Differ::new(schema)
            .unwrap()
            .diff(state, config, NO_HOOK, &(), false)
            .unwrap()
    }

    /// Conceptually apply a change-set to a state, for idempotence checks.
    fn apply(schema: &BlockSchema, state: &InstanceState, changes: &ChangeSet) -> InstanceState {
        let _ = schema;
        let mut attributes = state.attributes.clone();
        for (key, record) in changes.iter() {
            assert!(!record.new_computed, "cannot apply a computed record");
            if record.new_removed {
                attributes.remove(key);
            } else {
                attributes.insert(key, record.new.clone());
            }
        }
        InstanceState {
            id: state.id.clone(),
            attributes,
            tainted: false,
        }
    }

    #[test]
    fn test_no_change_is_empty() {
        let schema = BlockSchema::new().with_attribute("name", AttributeSchema::required_string());
        let state = InstanceState::new("i-1").with_attribute("name", "web");
        let config = ResourceConfig::new(json!({ "name": "web" }));
        assert!(diff(&schema, Some(&state), &config).is_empty());
    }

    #[test]
    fn test_primitive_change() {
        let schema = BlockSchema::new().with_attribute("name", AttributeSchema::required_string());
        let state = InstanceState::new("i-1").with_attribute("name", "old");
        let config = ResourceConfig::new(json!({ "name": "new" }));

        let changes = diff(&schema, Some(&state), &config);
        assert_eq!(changes.len(), 1);
        let record = changes.get("name").unwrap();
        assert_eq!(record.old, "old");
        assert_eq!(record.new, "new");
        assert!(!record.requires_replacement);
    }

    #[test]
    fn test_optional_removed() {
        let schema = BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute("desc", AttributeSchema::optional_string());
        let state = InstanceState::new("i-1")
            .with_attribute("name", "web")
            .with_attribute("desc", "hello");
        let config = ResourceConfig::new(json!({ "name": "web" }));

        let changes = diff(&schema, Some(&state), &config);
        let record = changes.get("desc").unwrap();
        assert!(record.new_removed);
        assert_eq!(record.old, "hello");
    }

    #[test]
    fn test_computed_keeps_value_when_config_drops_it() {
        let schema = BlockSchema::new().with_attribute(
            "size",
            AttributeSchema::optional_int().optional_computed(),
        );
        let state = InstanceState::new("i-1").with_attribute("size", "5");
        let config = ResourceConfig::empty();
        assert!(diff(&schema, Some(&state), &config).is_empty());
    }

    #[test]
    fn test_computed_attribute_on_create() {
        let schema = BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute("arn", AttributeSchema::computed_string());
        let config = ResourceConfig::new(json!({ "name": "web" }));

        let changes = diff(&schema, None, &config);
        assert!(changes.get("arn").unwrap().new_computed);
        assert_eq!(changes.get("name").unwrap().new, "web");
    }

    #[test]
    fn test_unknown_config_value() {
        let schema = BlockSchema::new().with_attribute("name", AttributeSchema::required_string());
        let state = InstanceState::new("i-1").with_attribute("name", "web");
        let config = ResourceConfig::new(json!({ "name": "web" })).with_unknown("name");

        let changes = diff(&schema, Some(&state), &config);
        let record = changes.get("name").unwrap();
        assert!(record.new_computed);
        assert_eq!(record.old, "web");
    }

    #[test]
    fn test_bool_normalization() {
        let schema = BlockSchema::new().with_attribute("on", AttributeSchema::optional_bool());
        let state = InstanceState::new("i-1").with_attribute("on", "0");
        let config = ResourceConfig::new(json!({ "on": true }));

        let changes = diff(&schema, Some(&state), &config);
        let record = changes.get("on").unwrap();
        assert_eq!(record.old, "false");
        assert_eq!(record.new, "true");
    }

    #[test]
    fn test_map_scenario() {
        // schema {name: required string, tags: optional+computed map}
        let schema = BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute(
                "tags",
                AttributeSchema::map_of_strings().optional_computed(),
            );
        let state = InstanceState::new("i-1")
            .with_attribute("name", "a")
            .with_attribute("tags.%", "1")
            .with_attribute("tags.env", "prod");
        let config = ResourceConfig::new(json!({
            "name": "a",
            "tags": { "env": "prod", "owner": "x" }
        }));

        let changes = diff(&schema, Some(&state), &config);
        assert_eq!(
            changes.keys().collect::<Vec<_>>(),
            vec!["tags.%", "tags.owner"]
        );
        let count = changes.get("tags.%").unwrap();
        assert_eq!(count.old, "1");
        assert_eq!(count.new, "2");
        let owner = changes.get("tags.owner").unwrap();
        assert_eq!(owner.old, "");
        assert_eq!(owner.new, "x");
    }

    #[test]
    fn test_map_key_removed() {
        let schema = BlockSchema::new()
            .with_attribute("tags", AttributeSchema::map_of_strings().optional());
        let state = InstanceState::new("i-1")
            .with_attribute("tags.%", "2")
            .with_attribute("tags.env", "prod")
            .with_attribute("tags.team", "infra");
        let config = ResourceConfig::new(json!({ "tags": { "env": "prod" } }));

        let changes = diff(&schema, Some(&state), &config);
        assert!(changes.get("tags.team").unwrap().new_removed);
        assert_eq!(changes.get("tags.%").unwrap().new, "1");
        assert!(changes.get("tags.env").is_none());
    }

    #[test]
    fn test_default_and_force_replacement_scenario() {
        // schema {id: computed string, size: optional+computed int with
        // default 10 and force-replacement}; state {id:"1", size:"5"}; config
        // leaves size unset.
        let schema = BlockSchema::new()
            .with_attribute("id", AttributeSchema::computed_string())
            .with_attribute(
                "size",
                AttributeSchema::optional_int()
                    .optional_computed()
                    .with_default(10_i64)
                    .with_force_new(),
            );
        let state = InstanceState::new("1").with_attribute("size", "5");
        let config = ResourceConfig::empty();

        let differ = Differ::new(&schema).unwrap();
        let changes = differ.diff(Some(&state), &config, NO_HOOK, &(), true).unwrap();

        let size = changes.get("size").unwrap();
        assert_eq!(size.old, "5");
        assert_eq!(size.new, "10");
        assert!(size.requires_replacement);

        let id = changes.get("id").unwrap();
        assert!(id.requires_replacement);
        assert!(id.new_computed);
        assert_eq!(id.old, "1");
    }

    #[test]
    fn test_list_growth() {
        let schema = BlockSchema::new().with_attribute(
            "ports",
            AttributeSchema::list(SchemaElement::int()).optional(),
        );
        let state = InstanceState::new("i-1")
            .with_attribute("ports.#", "1")
            .with_attribute("ports.0", "80");
        let config = ResourceConfig::new(json!({ "ports": [80, 443] }));

        let changes = diff(&schema, Some(&state), &config);
        let count = changes.get("ports.#").unwrap();
        assert_eq!(count.old, "1");
        assert_eq!(count.new, "2");
        let added = changes.get("ports.1").unwrap();
        assert_eq!(added.old, "");
        assert_eq!(added.new, "443");
        assert!(changes.get("ports.0").is_none());
    }

    #[test]
    fn test_list_of_blocks() {
        let schema = BlockSchema::new().with_attribute(
            "ingress",
            AttributeSchema::list(SchemaElement::block(
                BlockSchema::new()
                    .with_attribute("port", AttributeSchema::required_int())
                    .with_attribute("proto", AttributeSchema::optional_string()),
            ))
            .optional(),
        );
        let state = InstanceState::new("i-1")
            .with_attribute("ingress.#", "1")
            .with_attribute("ingress.0.port", "80")
            .with_attribute("ingress.0.proto", "tcp");
        let config = ResourceConfig::new(json!({
            "ingress": [{ "port": 8080, "proto": "tcp" }]
        }));

        let changes = diff(&schema, Some(&state), &config);
        let port = changes.get("ingress.0.port").unwrap();
        assert_eq!(port.old, "80");
        assert_eq!(port.new, "8080");
        assert!(changes.get("ingress.0.proto").is_none());
        assert!(changes.get("ingress.#").is_none());
    }

    #[test]
    fn test_idempotence() {
        let schema = BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute("tags", AttributeSchema::map_of_strings().optional())
            .with_attribute(
                "ports",
                AttributeSchema::list(SchemaElement::int()).optional(),
            );
        let state = InstanceState::new("i-1")
            .with_attribute("name", "old")
            .with_attribute("tags.%", "1")
            .with_attribute("tags.env", "dev")
            .with_attribute("ports.#", "1")
            .with_attribute("ports.0", "80");
        let config = ResourceConfig::new(json!({
            "name": "new",
            "tags": { "env": "prod", "owner": "x" },
            "ports": [80, 443]
        }));

        let changes = diff(&schema, Some(&state), &config);
        assert!(!changes.is_empty());
        let applied = apply(&schema, &state, &changes);
        assert!(diff(&schema, Some(&applied), &config).is_empty());
    }

    #[test]
    fn test_set_reorder_is_empty_diff() {
        let schema = BlockSchema::new().with_attribute(
            "zones",
            AttributeSchema::set(SchemaElement::string()).optional(),
        );
        let config_a = ResourceConfig::new(json!({ "zones": ["a", "b", "c"] }));
        let config_b = ResourceConfig::new(json!({ "zones": ["c", "a", "b"] }));

        // Build a state matching config_a, then diff against the reordering.
        let empty = InstanceState::new("");
        let changes = diff(&schema, None, &config_a);
        let state = apply(&schema, &empty, &changes);

        assert!(diff(&schema, Some(&state), &config_b).is_empty());
    }

    #[test]
    fn test_set_add_and_remove() {
        let schema = BlockSchema::new().with_attribute(
            "zones",
            AttributeSchema::set(SchemaElement::string()).optional(),
        );
        let config_a = ResourceConfig::new(json!({ "zones": ["a", "b"] }));
        let config_b = ResourceConfig::new(json!({ "zones": ["b", "c"] }));

        let empty = InstanceState::new("");
        let state = apply(&schema, &empty, &diff(&schema, None, &config_a));
        let changes = diff(&schema, Some(&state), &config_b);

        // One removed element, one added element; no count record since the
        // lengths are equal.
        assert!(changes.get("zones.#").is_none());
        let removed: Vec<_> = changes.iter().filter(|(_, r)| r.new_removed).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1.old, "a");
        let added: Vec<_> = changes
            .iter()
            .filter(|(_, r)| !r.new_removed && r.old.is_empty())
            .collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].1.new, "c");
        // The unchanged element appears as a no-op record in collect-all mode.
        let kept: Vec<_> = changes
            .iter()
            .filter(|(_, r)| r.old == r.new && r.old == "b")
            .collect();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_suppression_neutralizes_record() {
        let schema = BlockSchema::new().with_attribute(
            "zone",
            AttributeSchema::optional_string()
                .with_diff_suppress(|_, old, new| old.eq_ignore_ascii_case(new)),
        );
        let state = InstanceState::new("i-1").with_attribute("zone", "US-EAST");
        let config = ResourceConfig::new(json!({ "zone": "us-east" }));

        let changes = diff(&schema, Some(&state), &config);
        let record = changes.get("zone").unwrap();
        assert_eq!(record.new, record.old);
        assert_eq!(record.old, "US-EAST");
    }

    #[test]
    fn test_suppression_omits_record_in_set_collection() {
        let schema = BlockSchema::new().with_attribute(
            "zones",
            AttributeSchema::set(SchemaElement::primitive(
                AttributeSchema::new(ValueKind::String)
                    .with_diff_suppress(|_, _, _| true),
            ))
            .optional(),
        );
        let state = InstanceState::new("i-1")
            .with_attribute("zones.#", "1")
            .with_attribute("zones.123", "a");
        let config = ResourceConfig::new(json!({ "zones": ["b"] }));

        let changes = diff(&schema, Some(&state), &config);
        // Element records are suppressed entirely; only the count can remain.
        assert!(changes.iter().all(|(k, _)| k == "zones.#"));
    }

    #[test]
    fn test_force_replacement_flags_identity() {
        let schema = BlockSchema::new()
            .with_attribute("id", AttributeSchema::computed_string())
            .with_attribute(
                "zone",
                AttributeSchema::required_string().with_force_new(),
            );
        let state = InstanceState::new("i-1").with_attribute("zone", "a");
        let config = ResourceConfig::new(json!({ "zone": "b" }));

        let changes = diff(&schema, Some(&state), &config);
        assert!(changes.get("zone").unwrap().requires_replacement);
        let id = changes.get("id").unwrap();
        assert!(id.requires_replacement);
        assert!(id.new_computed);
        assert_eq!(id.old, "i-1");
    }

    #[test]
    fn test_tainted_state_forces_replacement() {
        let schema = BlockSchema::new()
            .with_attribute("id", AttributeSchema::computed_string())
            .with_attribute("name", AttributeSchema::required_string());
        let state = InstanceState::new("i-1")
            .with_attribute("name", "web")
            .tainted();
        let config = ResourceConfig::new(json!({ "name": "web" }));

        let changes = diff(&schema, Some(&state), &config);
        assert!(changes.get("id").unwrap().requires_replacement);
    }

    #[test]
    fn test_count_content_consistency() {
        let schema = BlockSchema::new().with_attribute(
            "ports",
            AttributeSchema::list(SchemaElement::int()).optional(),
        );
        let state = InstanceState::new("i-1")
            .with_attribute("ports.#", "1")
            .with_attribute("ports.0", "80");
        let config = ResourceConfig::new(json!({ "ports": [80, 443, 8080] }));

        let changes = diff(&schema, Some(&state), &config);
        let count = changes.get("ports.#").unwrap();
        let added = changes
            .iter()
            .filter(|(k, r)| *k != "ports.#" && !r.new_removed)
            .count();
        let old: usize = count.old.parse().unwrap();
        let new: usize = count.new.parse().unwrap();
        assert_eq!(new - old, added);
    }

    #[test]
    fn test_customize_set_new() {
        let schema = BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute(
                "size",
                AttributeSchema::optional_int().optional_computed(),
            );
        let state = InstanceState::new("i-1")
            .with_attribute("name", "web")
            .with_attribute("size", "5");
        let config = ResourceConfig::new(json!({ "name": "web" }));

        let hook = |_: &DiffView<'_>, _: &()| Ok(vec![DiffMutation::set_new("size", 20_i64)]);
        let changes = Differ::new(&schema)
            .unwrap()
            .diff(Some(&state), &config, Some(&hook), &(), false)
            .unwrap();

        let size = changes.get("size").unwrap();
        assert_eq!(size.old, "5");
        assert_eq!(size.new, "20");
        assert!(changes.get("name").is_none());
    }

    #[test]
    fn test_customize_rejects_non_computed() {
        let schema = BlockSchema::new().with_attribute("name", AttributeSchema::required_string());
        let state = InstanceState::new("i-1").with_attribute("name", "web");
        let config = ResourceConfig::new(json!({ "name": "web" }));

        let hook = |_: &DiffView<'_>, _: &()| Ok(vec![DiffMutation::set_new("name", "x")]);
        let err = Differ::new(&schema)
            .unwrap()
            .diff(Some(&state), &config, Some(&hook), &(), false)
            .unwrap_err();
        assert!(matches!(err, DiffError::NotComputed(_)));
    }

    #[test]
    fn test_customize_force_new() {
        let schema = BlockSchema::new()
            .with_attribute("id", AttributeSchema::computed_string())
            .with_attribute("name", AttributeSchema::required_string());
        let state = InstanceState::new("i-1").with_attribute("name", "old");
        let config = ResourceConfig::new(json!({ "name": "new" }));

        let hook = |view: &DiffView<'_>, _: &()| {
            if view.has_changes(&["name"]) {
                return Ok(vec![DiffMutation::force_new("name")]);
            }
            Ok(vec![])
        };
        let changes = Differ::new(&schema)
            .unwrap()
            .diff(Some(&state), &config, Some(&hook), &(), false)
            .unwrap();

        assert!(changes.get("name").unwrap().requires_replacement);
        assert!(changes.get("id").unwrap().requires_replacement);
    }

    #[test]
    fn test_customize_error_aborts() {
        let schema = BlockSchema::new().with_attribute("name", AttributeSchema::required_string());
        let config = ResourceConfig::new(json!({ "name": "web" }));

        let hook = |_: &DiffView<'_>, _: &()| {
            Err(DiffError::Customization("validation failed".to_string()))
        };
        let err = Differ::new(&schema)
            .unwrap()
            .diff(None, &config, Some(&hook), &(), false)
            .unwrap_err();
        assert!(matches!(err, DiffError::Customization(_)));
    }

    #[test]
    fn test_customize_set_new_computed() {
        let schema = BlockSchema::new()
            .with_attribute("name", AttributeSchema::required_string())
            .with_attribute("arn", AttributeSchema::computed_string());
        let state = InstanceState::new("i-1")
            .with_attribute("name", "old")
            .with_attribute("arn", "arn:old");
        let config = ResourceConfig::new(json!({ "name": "new" }));

        let hook = |_: &DiffView<'_>, _: &()| Ok(vec![DiffMutation::set_new_computed("arn")]);
        let changes = Differ::new(&schema)
            .unwrap()
            .diff(Some(&state), &config, Some(&hook), &(), false)
            .unwrap();

        let arn = changes.get("arn").unwrap();
        assert!(arn.new_computed);
        assert_eq!(arn.old, "arn:old");
    }

    #[test]
    fn test_state_fn_applies_before_compare() {
        let schema = BlockSchema::new().with_attribute(
            "content",
            AttributeSchema::optional_string().with_state_fn(|v| match v {
                FieldValue::String(s) => FieldValue::String(format!("len:{}", s.len())),
                other => other.clone(),
            }),
        );
        let state = InstanceState::new("i-1").with_attribute("content", "len:5");
        let config = ResourceConfig::new(json!({ "content": "hello" }));
        assert!(diff(&schema, Some(&state), &config).is_empty());

        let config = ResourceConfig::new(json!({ "content": "hello world" }));
        let changes = diff(&schema, Some(&state), &config);
        assert_eq!(changes.get("content").unwrap().new, "len:11");
    }

    #[test]
    fn test_serde_round_trip() {
        let mut changes = ChangeSet::new();
        changes.insert("name", ChangeRecord::new("old", "new"));
        changes.insert("id", ChangeRecord::computed("i-1"));

        let encoded = serde_json::to_string(&changes).unwrap();
        let decoded: ChangeSet = serde_json::from_str(&encoded).unwrap();
        assert_eq!(changes, decoded);
    }

    #[test]
    fn test_flatmap_state_round_trip_through_apply() {
        // A list shrink removes trailing flat keys via new_removed records.
        let schema = BlockSchema::new().with_attribute(
            "ports",
            AttributeSchema::list(SchemaElement::int()).optional(),
        );
        let state = InstanceState::new("i-1")
            .with_attribute("ports.#", "2")
            .with_attribute("ports.0", "80")
            .with_attribute("ports.1", "443");
        let config = ResourceConfig::new(json!({ "ports": [80] }));

        let changes = diff(&schema, Some(&state), &config);
        let count = changes.get("ports.#").unwrap();
        assert_eq!(count.new, "1");
        let dropped = changes.get("ports.1").unwrap();
        assert!(dropped.new_removed);

        let applied = apply(&schema, &state, &changes);
        assert_eq!(
            applied.attributes,
            FlatAttributeMap::from([("id", "i-1"), ("ports.#", "1"), ("ports.0", "80")])
        );
        assert!(diff(&schema, Some(&applied), &config).is_empty());
    }
}
