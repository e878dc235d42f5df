use miette::Diagnostic;
use reaper_core::ReaperError;
use thiserror::Error;

/// Controller error type
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Error returned by the object store
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] ReaperError),

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(reaper::controller::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(reaper::controller::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_conflict())
    }
}
