//! Hemmer Schema Diff
//!
//! A schema-driven diff engine for Hemmer providers. Given a declarative
//! attribute schema, a last-known state snapshot and a desired configuration,
//! it computes a flat change-set describing exactly what must change,
//! including values that will only be known after the remote system responds.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Schema types**: [`BlockSchema`] and [`AttributeSchema`] describe a
//!   resource's attributes and their diff behavior (computed, defaults,
//!   force-replacement, diff suppression, set identity hashing)
//! - **Value readers**: state, config and diff-overlay sources behind one
//!   query interface with level masks
//! - **Differ**: the structural walk producing a [`ChangeSet`] of
//!   [`ChangeRecord`]s keyed by flattened attribute path
//! - **Customization hook**: a post-diff callback returning explicit
//!   [`DiffMutation`]s, re-merged into the diff
//! - **Validation**: collected [`Diagnostic`]s for configuration problems
//! - **Logging**: integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```
//! use hemmer_schema_diff::{
//!     AttributeSchema, BlockSchema, Differ, InstanceState, ResourceConfig,
//! };
//! use serde_json::json;
//!
//! let schema = BlockSchema::new()
//!     .with_attribute("name", AttributeSchema::required_string())
//!     .with_attribute("id", AttributeSchema::computed_string());
//!
//! let differ = Differ::new(&schema).unwrap();
//! let state = InstanceState::new("i-123").with_attribute("name", "web");
//! let config = ResourceConfig::new(json!({ "name": "web-2" }));
//!
//! let changes = differ.diff::<()>(Some(&state), &config, None, &(), false).unwrap();
//! let record = changes.get("name").unwrap();
//! assert_eq!(record.old, "web");
//! assert_eq!(record.new, "web-2");
//! ```
//!
//! # Change-Set Encoding
//!
//! Records are keyed by the legacy dotted-path flat encoding. Containers
//! carry an explicit count key:
//!
//! ```text
//! ingress.#       list/set element count
//! ingress.0.port  list element field
//! tags.%          map entry count
//! tags.env        map entry
//! ```
//!
//! Set elements are keyed by content hash rather than position, so
//! reordering a set never produces a diff.
//!
//! The engine is synchronous and holds no process-wide mutable state; one
//! diff invocation performs no I/O. An empty [`ChangeSet`] is the valid
//! "no differences" result, distinguished from an error.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod customize;
pub mod diff;
pub mod error;
pub mod flatmap;
pub mod logging;
pub mod path;
pub mod reader;
pub mod schema;
pub mod validation;
pub mod value;

// Re-export main types at crate root
pub use customize::{CustomizeDiff, DiffMutation, DiffView};
pub use diff::{ChangeRecord, ChangeSet, Differ};
pub use error::DiffError;
pub use flatmap::FlatAttributeMap;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use path::{AttrPath, PathStep};
pub use reader::{
    ConfigReader, DiffReader, FieldReadResult, FieldReader, InstanceState, Level, LevelMask,
    MultiLevelReader, ResourceConfig, StateReader, ValueChange,
};
pub use schema::{
    AttributeSchema, BlockSchema, Diagnostic, DiagnosticSeverity, SchemaElement, ValueKind, ID_KEY,
};
pub use validation::{is_valid, validate, validate_result};
pub use value::{FieldValue, SetValue};

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
