//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The display name was already assigned at handshake
    #[error("Display name already set to {current:?}")]
    IdentityAlreadySet { current: String },

    /// A display name must contain at least one visible character
    #[error("Display name is empty")]
    EmptyDisplayName,

    /// Parse error for operator-supplied data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
