//! Errors raised while resolving, validating, and planning a stack.

use thiserror::Error;

use crate::resources::ResourceKind;

/// Errors that can occur while building or planning the desired state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// A CIDR block could not be parsed.
    #[error("Invalid CIDR block '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    /// Two resources were declared with the same logical name.
    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    /// A resource references a name that is not declared.
    #[error("Resource '{from}' references unknown resource '{to}'")]
    UnknownReference { from: String, to: String },

    /// A resource references a declared resource of the wrong kind.
    #[error("Resource '{from}' expects '{to}' to be a {expected}, found {found}")]
    WrongReferenceKind {
        from: String,
        to: String,
        expected: ResourceKind,
        found: ResourceKind,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle involving: {0}")]
    Cycle(String),

    /// The declared topology breaks a structural invariant.
    #[error("Invalid topology: {0}")]
    Topology(String),

    /// Configuration could not be parsed or resolved.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
