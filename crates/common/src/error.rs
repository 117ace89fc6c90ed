//! Flat error taxonomy shared by every component.
//!
//! The core never invents its own status codes: it reports one of a small,
//! closed set of kinds and lets the ambient HTTP layer (out of scope for
//! this crate) decide how to present them.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// The six user-visible failure kinds, plus the catch-all `Internal` kind
/// reserved for defects and unreachable collaborators.
#[derive(Debug, Error)]
pub enum AppError {
    /// No valid session / bad credentials.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Authenticated but not permitted to perform this operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input or state violates an invariant.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// A derived image rendition was requested before it was produced.
    #[error("image processing: {0}")]
    ImageProcessing(String),

    /// Anything else: bugs, unreachable providers, I/O failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure(_) => "AUTHENTICATION_FAILURE",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationFailure(_) => "VALIDATION_FAILURE",
            Self::ImageProcessing(_) => "IMAGE_PROCESSING",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error kind represents a defect rather than caller
    /// misuse, i.e. whether it should be logged at `error!` instead of
    /// `debug!`.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationFailure(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
