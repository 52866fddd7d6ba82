//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur while building domain objects.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// A command pattern failed to compile
    #[error("Invalid command pattern {name}: {reason}")]
    InvalidPattern { name: String, reason: String },
}

impl DomainError {
    /// Creates a pattern error from a regex compilation failure.
    pub fn pattern(name: &str, err: &regex::Error) -> Self {
        Self::InvalidPattern {
            name: name.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
