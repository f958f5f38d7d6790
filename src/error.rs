//! Error types for the schema diff engine.

use thiserror::Error;

/// Errors that can occur while constructing schemas or computing a diff.
///
/// Schema construction errors ([`DiffError::InvalidSchema`],
/// [`DiffError::MissingElement`]) are surfaced once at registration time by
/// [`Differ::new`](crate::diff::Differ::new) and never during a live diff.
/// All other variants abort a single diff invocation; none are fatal to the
/// process.
#[derive(Debug, Error)]
pub enum DiffError {
    /// A schema declared an invalid combination of flags.
    #[error("Invalid schema for '{attribute}': {reason}")]
    InvalidSchema {
        /// The attribute whose schema is invalid.
        attribute: String,
        /// Why the schema was rejected.
        reason: String,
    },

    /// An attribute path does not resolve against the schema.
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// A list or set schema is missing its element schema.
    #[error("Missing element schema for '{0}'")]
    MissingElement(String),

    /// A value could not be weakly coerced to the declared type.
    #[error("Cannot coerce value at '{path}': {reason}")]
    Coercion {
        /// The attribute path where coercion failed.
        path: String,
        /// Why the value could not be coerced.
        reason: String,
    },

    /// A customization hook tried to override a non-computed attribute.
    #[error("'{0}' is not computed and cannot be overridden by a customization hook")]
    NotComputed(String),

    /// A customization hook tried to force replacement on an unchanged attribute.
    #[error("Cannot force replacement of '{0}': attribute has no change")]
    NoChange(String),

    /// A customization hook failed; the whole diff is aborted.
    #[error("Diff customization failed: {0}")]
    Customization(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiffError::UnknownAttribute("tags.0.key".to_string());
        assert_eq!(format!("{}", err), "Unknown attribute: tags.0.key");

        let err = DiffError::Coercion {
            path: "ports.0".to_string(),
            reason: "expected a primitive".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Cannot coerce value at 'ports.0': expected a primitive"
        );

        let err = DiffError::NotComputed("name".to_string());
        assert!(format!("{}", err).contains("not computed"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DiffError = json_err.into();
        assert!(matches!(err, DiffError::Serialization(_)));
    }
}
