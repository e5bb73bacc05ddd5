//! Error types for the steplock host vocabulary.

use thiserror::Error;

/// Errors raised while parsing shared vocabulary values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// A required identifier was empty or whitespace.
    #[error("Empty {0} identifier")]
    EmptyIdentifier(&'static str),
    
    /// Direction name not recognised
    #[error("Invalid direction: {0}")]
    InvalidDirection(String),
    
    /// Role name not recognised
    #[error("Invalid role: {0}")]
    InvalidRole(String),
}
