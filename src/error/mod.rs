//! Error types for mailbridge.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

use crate::auth::AuthError;

/// Primary error type for all mailbridge operations outside the auth flow.
#[derive(Error, Debug)]
pub enum MailbridgeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl MailbridgeError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Auth(err) => err.category(),
            Self::Io(_) => ErrorCategory::Io,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            Self::Timeout(_) => ErrorCategory::Timeout,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        is_retryable_category(self.category())
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        recovery_for(self.category())
    }
}

pub(crate) fn is_retryable_category(category: ErrorCategory) -> bool {
    matches!(
        category,
        ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server
    )
}

pub(crate) fn recovery_for(category: ErrorCategory) -> RecoverySuggestion {
    match category {
        ErrorCategory::Authorization | ErrorCategory::Flow => RecoverySuggestion::Reauthorize,
        ErrorCategory::Network | ErrorCategory::Server => RecoverySuggestion::RetryWithBackoff,
        ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
        ErrorCategory::Configuration | ErrorCategory::Io => RecoverySuggestion::CheckConfiguration,
        ErrorCategory::InvalidArgument => RecoverySuggestion::FixInput,
        ErrorCategory::Serialization | ErrorCategory::Unknown => RecoverySuggestion::ContactSupport,
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MailbridgeError>;
