use std::fmt;

/// Operation that touched a property, carried by [`Error::PropertyMissing`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyOp {
    Get,
    Set,
    Recompute,
    AddDependents,
}

impl fmt::Display for PropertyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertyOp::Get => "get",
            PropertyOp::Set => "set",
            PropertyOp::Recompute => "recompute",
            PropertyOp::AddDependents => "add_dependents",
        })
    }
}

/// Which process-wide constructor table a tag was looked up in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryKind {
    Component,
    Extra,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegistryKind::Component => "component type",
            RegistryKind::Extra => "extra",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("property `{name}` is not mapped ({op})")]
    PropertyMissing { name: String, op: PropertyOp },

    #[error("property `{name}` rejected its value: {reason}")]
    PropertyValue { name: String, reason: String },

    #[error("path `{path}` not found: no `{segment}`")]
    PathNotFound { path: String, segment: String },

    #[error("{kind} `{tag}` is not registered")]
    TypeNotRegistered { kind: RegistryKind, tag: String },

    #[error("{kind} `{tag}` is already registered to a different constructor")]
    DuplicateRegistration { kind: RegistryKind, tag: String },

    #[error("`{name}` does not exist and its configuration has no `type`")]
    MissingType { name: String },

    #[error("dependency cycle: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("stale handle: {0}")]
    StaleNode(String),

    #[error("malformed configuration: {0}")]
    Config(String),

    #[error("render pass failed: {0}")]
    Render(#[source] anyhow::Error),

    #[error(transparent)]
    Listener(#[from] anyhow::Error),
}

impl Error {
    pub fn missing(name: impl Into<String>, op: PropertyOp) -> Self {
        Error::PropertyMissing {
            name: name.into(),
            op,
        }
    }

    pub fn path_not_found(path: impl Into<String>, segment: impl Into<String>) -> Self {
        Error::PathNotFound {
            path: path.into(),
            segment: segment.into(),
        }
    }

    /// True for failures raised while building from configuration; these abort
    /// the construction call that triggered them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::TypeNotRegistered { .. }
                | Error::MissingType { .. }
                | Error::DependencyCycle { .. }
                | Error::Config(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
