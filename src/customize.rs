//! The diff customization hook boundary.
//!
//! After the structural walk, a registered hook inspects the draft change-set
//! through a read-only [`DiffView`] and returns a list of explicit
//! [`DiffMutation`]s. The engine applies the mutations itself and then
//! re-diffs only the attributes the hook touched, so there is no shared
//! mutable diff and no ambiguity about re-entrancy or ordering.
//!
//! A hook may only override attributes that are `computed` in the schema;
//! overriding a purely required or optional field is rejected at the point of
//! use. A hook error aborts the diff entirely.

use std::collections::BTreeSet;

use crate::diff::{ChangeRecord, ChangeSet};
use crate::error::DiffError;
use crate::flatmap::{FlatAttributeMap, COMPUTED_SENTINEL};
use crate::reader::{
    parse_path, resolve, FieldReadResult, InstanceState, LevelMask, MultiLevelReader,
    ResourceConfig, Resolved, ValueChange,
};
use crate::schema::{BlockSchema, ValueKind};
use crate::value::FieldValue;

/// One explicit mutation requested by a customization hook.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffMutation {
    /// Override the new value at a dotted key.
    SetNew {
        /// The dotted attribute key.
        key: String,
        /// The replacement value.
        value: FieldValue,
    },
    /// Mark the new value at a dotted key as not yet known.
    SetNewComputed {
        /// The dotted attribute key.
        key: String,
    },
    /// Force replacement for the change at a dotted key.
    ForceNew {
        /// The dotted attribute key.
        key: String,
    },
}

impl DiffMutation {
    /// Override the new value at `key`.
    pub fn set_new(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        DiffMutation::SetNew {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Mark the new value at `key` as not yet known.
    pub fn set_new_computed(key: impl Into<String>) -> Self {
        DiffMutation::SetNewComputed { key: key.into() }
    }

    /// Force replacement for the change at `key`.
    pub fn force_new(key: impl Into<String>) -> Self {
        DiffMutation::ForceNew { key: key.into() }
    }

    fn key(&self) -> &str {
        match self {
            DiffMutation::SetNew { key, .. } => key,
            DiffMutation::SetNewComputed { key } => key,
            DiffMutation::ForceNew { key } => key,
        }
    }
}

/// A user-supplied hook that post-processes a structural diff before
/// finalization.
///
/// `M` is opaque provider metadata passed through unchanged; the engine does
/// not inspect it and imposes no timeout on the hook call.
pub trait CustomizeDiff<M> {
    /// Inspect the draft diff and return the mutations to apply.
    fn customize(&self, view: &DiffView<'_>, meta: &M) -> Result<Vec<DiffMutation>, DiffError>;
}

impl<M, F> CustomizeDiff<M> for F
where
    F: Fn(&DiffView<'_>, &M) -> Result<Vec<DiffMutation>, DiffError>,
{
    fn customize(&self, view: &DiffView<'_>, meta: &M) -> Result<Vec<DiffMutation>, DiffError> {
        self(view, meta)
    }
}

/// Read-only view of the draft diff handed to a customization hook.
///
/// Reads see the draft's staged values layered over config and state, the
/// same way the differ itself will when it re-diffs touched keys.
pub struct DiffView<'a> {
    pub(crate) schema: &'a BlockSchema,
    pub(crate) reader: MultiLevelReader<'a>,
    pub(crate) diff: &'a ChangeSet,
}

impl<'a> DiffView<'a> {
    pub(crate) fn new(
        schema: &'a BlockSchema,
        state: Option<&'a InstanceState>,
        config: Option<&'a ResourceConfig>,
        diff: &'a ChangeSet,
    ) -> Self {
        Self {
            schema,
            reader: MultiLevelReader::with_diff(schema, state, config, diff, BTreeSet::new()),
            diff,
        }
    }

    /// Read the effective new value at a dotted key.
    pub fn get(&self, key: &str) -> Result<FieldReadResult, DiffError> {
        let path = parse_path(self.schema, key)?;
        self.reader.read_merge(&path, LevelMask::ALL)
    }

    /// The old/new change tuple at a dotted key.
    pub fn get_change(&self, key: &str) -> Result<ValueChange, DiffError> {
        let path = parse_path(self.schema, key)?;
        self.reader.get_change(&path)
    }

    /// Whether the draft diff has a record at any of the given keys (or
    /// below them).
    pub fn has_changes(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.diff.touches(k))
    }

    /// The draft change-set.
    pub fn changes(&self) -> &ChangeSet {
        self.diff
    }

    /// Whether the resource is being created (no prior state).
    pub fn is_new_resource(&self) -> bool {
        !self.reader.has_state()
    }

    fn require_computed(&self, key: &str) -> Result<String, DiffError> {
        let root = key.split('.').next().unwrap_or(key);
        let attr = self
            .schema
            .get(root)
            .ok_or_else(|| DiffError::UnknownAttribute(key.to_string()))?;
        if !attr.computed {
            return Err(DiffError::NotComputed(key.to_string()));
        }
        Ok(root.to_string())
    }
}

/// The outcome of applying a hook's mutations.
#[derive(Debug)]
pub(crate) struct AppliedMutations {
    /// The draft change-set with the mutations folded in; the differ uses
    /// this as the diff-level overlay when re-diffing.
    pub combined: ChangeSet,
    /// Top-level attribute names touched by any mutation; only these are
    /// re-diffed.
    pub touched: BTreeSet<String>,
    /// Keys whose re-diffed records must be flagged as requiring
    /// replacement.
    pub forced: Vec<String>,
}

pub(crate) fn apply_mutations(
    view: &DiffView<'_>,
    mutations: Vec<DiffMutation>,
) -> Result<AppliedMutations, DiffError> {
    let mut combined = view.diff.clone();
    let mut touched = BTreeSet::new();
    let mut forced = Vec::new();

    for mutation in mutations {
        let path = parse_path(view.schema, mutation.key())?;
        match mutation {
            DiffMutation::SetNew { key, value } => {
                touched.insert(view.require_computed(&key)?);
                combined.remove_subtree(&key);

                // Flatten the override; base entries the new value no longer
                // carries become removals so stale state cannot leak through.
                let base = view
                    .reader
                    .read_merge(&path, LevelMask::STATE | LevelMask::CONFIG)?;
                let mut base_flat = FlatAttributeMap::new();
                if let Some(v) = &base.value {
                    base_flat.write_value(&key, v);
                }
                let mut new_flat = FlatAttributeMap::new();
                new_flat.write_value(&key, &value.normalize());

                for (k, old) in base_flat.iter() {
                    if !new_flat.contains_key(k) {
                        combined.insert(k, ChangeRecord::removed(old));
                    }
                }
                for (k, v) in new_flat.iter() {
                    if v == COMPUTED_SENTINEL {
                        combined.insert(k, ChangeRecord::computed(""));
                    } else {
                        combined.insert(k, ChangeRecord::new("", v));
                    }
                }
            },
            DiffMutation::SetNewComputed { key } => {
                touched.insert(view.require_computed(&key)?);
                combined.remove_subtree(&key);
                let record_key = match resolve(view.schema, &path)? {
                    Resolved::Attr(attr) => match attr.kind {
                        ValueKind::List | ValueKind::Set => path.count_list().flatten(),
                        ValueKind::Map => path.count_map().flatten(),
                        _ => key,
                    },
                    Resolved::Count(_) => key,
                };
                combined.insert(record_key, ChangeRecord::computed(""));
            },
            DiffMutation::ForceNew { key } => {
                let change = view.reader.get_change(&path)?;
                if !change.changed && !combined.touches(&key) {
                    return Err(DiffError::NoChange(key));
                }
                if let Some(root) = path.first_field() {
                    touched.insert(root.to_string());
                }
                forced.push(key);
            },
        }
    }

    Ok(AppliedMutations {
        combined,
        touched,
        forced,
    })
}
