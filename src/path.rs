//! Structured attribute paths.
//!
//! The differ walks schemas using [`AttrPath`] values and only flattens them
//! to the legacy dotted form (`tags.0.key`, `ports.#`, `labels.%`) at the
//! reader and change-set boundaries. Keeping the path structured inside the
//! engine stops ad hoc string concatenation from leaking through it.

use std::fmt;

/// One step in an attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// A named attribute, at the root or inside a nested block.
    Field(String),
    /// A positional list index.
    Index(usize),
    /// A set element identity code.
    Code(String),
    /// A map entry key.
    Key(String),
    /// The `#` count sentinel of a list or set.
    CountList,
    /// The `%` count sentinel of a map.
    CountMap,
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Field(name) => f.write_str(name),
            PathStep::Index(i) => write!(f, "{}", i),
            PathStep::Code(code) => f.write_str(code),
            PathStep::Key(key) => f.write_str(key),
            PathStep::CountList => f.write_str("#"),
            PathStep::CountMap => f.write_str("%"),
        }
    }
}

/// A structured attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AttrPath(Vec<PathStep>);

impl AttrPath {
    /// A path addressing a single top-level attribute.
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![PathStep::Field(name.into())])
    }

    /// Extend with a nested field step.
    pub fn field(&self, name: impl Into<String>) -> Self {
        self.with(PathStep::Field(name.into()))
    }

    /// Extend with a list index step.
    pub fn index(&self, i: usize) -> Self {
        self.with(PathStep::Index(i))
    }

    /// Extend with a set identity code step.
    pub fn code(&self, code: impl Into<String>) -> Self {
        self.with(PathStep::Code(code.into()))
    }

    /// Extend with a map key step.
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.with(PathStep::Key(key.into()))
    }

    /// Extend with the list/set count sentinel.
    pub fn count_list(&self) -> Self {
        self.with(PathStep::CountList)
    }

    /// Extend with the map count sentinel.
    pub fn count_map(&self) -> Self {
        self.with(PathStep::CountMap)
    }

    /// The steps of this path.
    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// The top-level attribute name this path addresses, if any.
    pub fn first_field(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathStep::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// The legacy dotted form of this path.
    pub fn flatten(&self) -> String {
        self.to_string()
    }

    fn with(&self, step: PathStep) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}
