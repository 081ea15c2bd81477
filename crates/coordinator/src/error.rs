//! Coordinator error types.

/// Errors returned synchronously when a clone request is rejected.
///
/// Nothing is registered when one of these is returned. Failures after
/// registration are reported through the operation handle instead.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("invalid operation id: {0}")]
    InvalidOperationId(String),

    #[error("operation already active: {0}")]
    DuplicateOperation(String),
}
