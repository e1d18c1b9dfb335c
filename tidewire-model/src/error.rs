use thiserror::Error;

/// Errors produced by model constructors and parsers.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

/// A task request that failed field-level validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
