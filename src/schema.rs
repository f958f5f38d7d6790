//! Attribute schemas describing resource structure and diff behavior.
//!
//! A schema is authored once per resource type and is immutable afterwards.
//! Beyond a field's type and cardinality it carries the behavioral flags the
//! differ acts on: computed, force-replacement, defaults, diff suppression
//! and set identity hashing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DiffError;
use crate::value::{default_set_hash, FieldValue};

/// The reserved identity attribute.
///
/// When any attribute in a change-set requires replacement, the record for
/// this key is forced to require replacement as well, so consumers can detect
/// replacement without re-walking every record.
pub const ID_KEY: &str = "id";

/// The type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// A boolean value.
    Bool,
    /// A 64-bit integer.
    Int,
    /// A 64-bit floating point number.
    Float,
    /// A string value.
    String,
    /// An ordered list of elements.
    List,
    /// A map from string keys to elements.
    Map,
    /// An unordered, content-addressed collection of elements.
    Set,
}

impl ValueKind {
    /// Whether this kind is a scalar.
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String
        )
    }

    /// The zero value for this kind, used when a removed attribute needs a
    /// concrete "new" side in its change record.
    pub fn zero(self) -> FieldValue {
        match self {
            ValueKind::Bool => FieldValue::Bool(false),
            ValueKind::Int => FieldValue::Int(0),
            ValueKind::Float => FieldValue::Float(0.0),
            ValueKind::String => FieldValue::String(String::new()),
            ValueKind::List => FieldValue::List(Vec::new()),
            ValueKind::Set => FieldValue::Set(Default::default()),
            ValueKind::Map => FieldValue::Map(BTreeMap::new()),
        }
    }
}

/// Predicate deciding whether an apparent change is a no-op.
///
/// Receives the flattened record key and the old and new string
/// representations.
pub type DiffSuppressFn = Arc<dyn Fn(&str, &str, &str) -> bool + Send + Sync>;

/// Computes a default value at diff time.
pub type DefaultValueFn = Arc<dyn Fn() -> Result<Option<FieldValue>, DiffError> + Send + Sync>;

/// Transforms a value before it is compared against state (e.g. a
/// hash-before-store encoding).
pub type StateFn = Arc<dyn Fn(&FieldValue) -> FieldValue + Send + Sync>;

/// Computes a set element's identity code.
pub type SetHashFn = Arc<dyn Fn(&FieldValue) -> u64 + Send + Sync>;

/// The element shape of a list, set or map attribute.
#[derive(Clone)]
pub enum SchemaElement {
    /// Elements are primitives described by a nested attribute schema.
    Primitive(Box<AttributeSchema>),
    /// Elements are nested blocks with their own attribute set.
    Block(BlockSchema),
}

impl SchemaElement {
    /// Primitive elements of the given kind.
    pub fn primitive(attr: AttributeSchema) -> Self {
        SchemaElement::Primitive(Box::new(attr))
    }

    /// String-typed primitive elements.
    pub fn string() -> Self {
        SchemaElement::Primitive(Box::new(AttributeSchema::new(ValueKind::String)))
    }

    /// Int-typed primitive elements.
    pub fn int() -> Self {
        SchemaElement::Primitive(Box::new(AttributeSchema::new(ValueKind::Int)))
    }

    /// Block elements with the given attribute set.
    pub fn block(block: BlockSchema) -> Self {
        SchemaElement::Block(block)
    }
}

impl fmt::Debug for SchemaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaElement::Primitive(attr) => f.debug_tuple("Primitive").field(attr).finish(),
            SchemaElement::Block(block) => f.debug_tuple("Block").field(block).finish(),
        }
    }
}

/// Declarative description of one attribute's type and behavior.
#[derive(Clone)]
pub struct AttributeSchema {
    /// The value type.
    pub kind: ValueKind,
    /// The attribute must be set in configuration.
    pub required: bool,
    /// The attribute may be set in configuration.
    pub optional: bool,
    /// The attribute is (or may be) supplied by the provider. Combined with
    /// `optional` it means "has a system-supplied default".
    pub computed: bool,
    /// The attribute is hidden in rendered output; display only, never
    /// execution semantics.
    pub sensitive: bool,
    /// A change to this attribute requires destroy-then-create of the whole
    /// resource.
    pub force_new: bool,
    /// Static default injected when configuration omits the attribute.
    pub default: Option<FieldValue>,
    /// Computed-at-diff-time default; mutually exclusive with `default`.
    pub default_fn: Option<DefaultValueFn>,
    /// State-encoding transform applied to the new value before comparison.
    pub state_fn: Option<StateFn>,
    /// Predicate that can declare an apparent change a no-op.
    pub diff_suppress: Option<DiffSuppressFn>,
    /// Identity hash for set elements; structural hash when unset.
    pub set_hash: Option<SetHashFn>,
    /// Element schema for list/set/map kinds.
    pub elem: Option<SchemaElement>,
    /// Attributes that may not be set together with this one.
    pub conflicts_with: Vec<String>,
    /// Human-readable description.
    pub description: Option<String>,
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self {
            kind: ValueKind::String,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            force_new: false,
            default: None,
            default_fn: None,
            state_fn: None,
            diff_suppress: None,
            set_hash: None,
            elem: None,
            conflicts_with: Vec::new(),
            description: None,
        }
    }
}

impl fmt::Debug for AttributeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSchema")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field("sensitive", &self.sensitive)
            .field("force_new", &self.force_new)
            .field("default", &self.default)
            .field("default_fn", &self.default_fn.is_some())
            .field("state_fn", &self.state_fn.is_some())
            .field("diff_suppress", &self.diff_suppress.is_some())
            .field("set_hash", &self.set_hash.is_some())
            .field("elem", &self.elem)
            .field("conflicts_with", &self.conflicts_with)
            .finish()
    }
}

impl AttributeSchema {
    /// Create a new attribute of the given kind with no role flags set.
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(ValueKind::String).required()
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(ValueKind::String).optional()
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(ValueKind::String).computed()
    }

    /// Create a required int attribute.
    pub fn required_int() -> Self {
        Self::new(ValueKind::Int).required()
    }

    /// Create an optional int attribute.
    pub fn optional_int() -> Self {
        Self::new(ValueKind::Int).optional()
    }

    /// Create a computed int attribute.
    pub fn computed_int() -> Self {
        Self::new(ValueKind::Int).computed()
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(ValueKind::Bool).required()
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(ValueKind::Bool).optional()
    }

    /// Create a list attribute with the given element schema.
    pub fn list(elem: SchemaElement) -> Self {
        Self::new(ValueKind::List).with_elem(elem)
    }

    /// Create a set attribute with the given element schema.
    pub fn set(elem: SchemaElement) -> Self {
        Self::new(ValueKind::Set).with_elem(elem)
    }

    /// Create a map attribute with string values.
    pub fn map_of_strings() -> Self {
        Self::new(ValueKind::Map).with_elem(SchemaElement::string())
    }

    /// Mark the attribute required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the attribute optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the attribute computed.
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Mark the attribute optional and computed (system-supplied default).
    pub fn optional_computed(mut self) -> Self {
        self.optional = true;
        self.computed = true;
        self
    }

    /// Mark the attribute sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Mark this attribute as forcing resource replacement when changed.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Set a static default value.
    pub fn with_default(mut self, default: impl Into<FieldValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set a computed-at-diff-time default.
    pub fn with_default_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<Option<FieldValue>, DiffError> + Send + Sync + 'static,
    {
        self.default_fn = Some(Arc::new(f));
        self
    }

    /// Set a state-encoding transform.
    pub fn with_state_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&FieldValue) -> FieldValue + Send + Sync + 'static,
    {
        self.state_fn = Some(Arc::new(f));
        self
    }

    /// Set a diff suppression predicate.
    pub fn with_diff_suppress<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str, &str) -> bool + Send + Sync + 'static,
    {
        self.diff_suppress = Some(Arc::new(f));
        self
    }

    /// Set a custom set element identity hash.
    pub fn with_set_hash<F>(mut self, f: F) -> Self
    where
        F: Fn(&FieldValue) -> u64 + Send + Sync + 'static,
    {
        self.set_hash = Some(Arc::new(f));
        self
    }

    /// Set the element schema for a list/set/map attribute.
    pub fn with_elem(mut self, elem: SchemaElement) -> Self {
        self.elem = Some(elem);
        self
    }

    /// Declare attributes that conflict with this one.
    pub fn with_conflicts(mut self, names: &[&str]) -> Self {
        self.conflicts_with = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether the attribute is computed-only (not settable by practitioners).
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    /// Resolve the default for this attribute, if any.
    pub fn default_value(&self) -> Result<Option<FieldValue>, DiffError> {
        if let Some(f) = &self.default_fn {
            return f();
        }
        Ok(self.default.clone())
    }

    /// Compute a set element's identity code.
    pub fn hash_element(&self, value: &FieldValue) -> u64 {
        match &self.set_hash {
            Some(f) => f(value),
            None => default_set_hash(value),
        }
    }

    fn validate(&self, name: &str, is_element: bool) -> Result<(), DiffError> {
        let invalid = |reason: &str| DiffError::InvalidSchema {
            attribute: name.to_string(),
            reason: reason.to_string(),
        };

        if is_element {
            if self.required {
                return Err(invalid("element schemas cannot be required"));
            }
        } else {
            if self.required && self.optional {
                return Err(invalid("required and optional are mutually exclusive"));
            }
            if self.required && self.computed {
                return Err(invalid("required excludes computed"));
            }
            if !self.required && !self.optional && !self.computed {
                return Err(invalid(
                    "one of required, optional or computed must be set",
                ));
            }
        }

        if self.force_new && self.is_computed_only() && !is_element {
            return Err(invalid(
                "force_new on a computed-only attribute is meaningless",
            ));
        }
        if (self.default.is_some() || self.default_fn.is_some()) && self.required {
            return Err(invalid("a default is incompatible with required"));
        }
        if self.default.is_some() && self.default_fn.is_some() {
            return Err(invalid("default and default_fn are mutually exclusive"));
        }
        if self.required && !self.conflicts_with.is_empty() {
            return Err(invalid("conflicts_with cannot be set on a required attribute"));
        }
        if self.set_hash.is_some() && self.kind != ValueKind::Set {
            return Err(invalid("set_hash is only meaningful on a set attribute"));
        }

        match self.kind {
            ValueKind::List | ValueKind::Set => match &self.elem {
                None => return Err(DiffError::MissingElement(name.to_string())),
                Some(SchemaElement::Primitive(p)) => {
                    p.validate(&format!("{}.elem", name), true)?;
                },
                Some(SchemaElement::Block(block)) => {
                    block.validate_inner(&format!("{}.", name))?;
                },
            },
            ValueKind::Map => match &self.elem {
                None => {},
                Some(SchemaElement::Primitive(p)) => {
                    p.validate(&format!("{}.elem", name), true)?;
                },
                Some(SchemaElement::Block(_)) => {
                    return Err(invalid("map elements must be primitives"));
                },
            },
            _ => {
                if self.elem.is_some() {
                    return Err(invalid("primitive attributes cannot declare elements"));
                }
            },
        }

        Ok(())
    }
}

/// A named set of attribute schemas: the root schema of a resource, or the
/// shape of one nested block.
#[derive(Debug, Clone, Default)]
pub struct BlockSchema {
    /// The attributes within this block, by name.
    pub attributes: BTreeMap<String, AttributeSchema>,
}

impl BlockSchema {
    /// Create a new empty block schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Look up an attribute by name.
    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Validate the whole schema tree.
    ///
    /// Fatal construction-time check, run once at registration by
    /// [`Differ::new`](crate::diff::Differ::new) and never during a live diff.
    pub fn validate(&self) -> Result<(), DiffError> {
        self.validate_inner("")
    }

    fn validate_inner(&self, prefix: &str) -> Result<(), DiffError> {
        for (name, attr) in &self.attributes {
            attr.validate(&format!("{}{}", prefix, name), false)?;
        }
        Ok(())
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message produced while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}
