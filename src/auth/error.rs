use thiserror::Error;

use crate::error::unified::{ErrorCategory, RecoverySuggestion};

/// Credential and authorization-flow errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No stored credential found")]
    CredentialNotFound,
    #[error("Stored credential is corrupt: {0}")]
    CredentialCorrupt(String),
    #[error("Credential expired and has no refresh token")]
    CredentialExpired,
    #[error("Failed to bind callback listener on {addr}: {message}")]
    ListenerBindFatal { addr: String, message: String },
    #[error("Authorization callback carried no code")]
    NoCodeProvided,
    #[error("Authorization denied by remote: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    RemoteDenied {
        error: String,
        description: Option<String>,
    },
    #[error("Authorization callback state does not match the live request")]
    StateMismatch,
    #[error("Token exchange failed: {message}")]
    ExchangeError {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    #[error("Token endpoint returned an unusable response: {0}")]
    MalformedTokenResponse(String),
    #[error("Timed out waiting for authorization callback after {0}ms")]
    CallbackTimeout(u64),
    #[error("Authorization flow cancelled")]
    Cancelled,
    #[error("An authorization flow is already in progress")]
    FlowInProgress,
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    pub(crate) fn exchange(message: impl Into<String>) -> Self {
        Self::ExchangeError {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CredentialNotFound | Self::CredentialCorrupt(_) | Self::CredentialExpired => {
                ErrorCategory::Authorization
            }
            Self::NoCodeProvided
            | Self::RemoteDenied { .. }
            | Self::StateMismatch
            | Self::Cancelled
            | Self::FlowInProgress => ErrorCategory::Flow,
            Self::ExchangeError { status, .. } => match status {
                None => ErrorCategory::Network,
                Some(500..=599) => ErrorCategory::Server,
                Some(_) => ErrorCategory::Authorization,
            },
            Self::CallbackTimeout(_) => ErrorCategory::Timeout,
            Self::ListenerBindFatal { .. } | Self::Io(_) => ErrorCategory::Io,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Network(_) => ErrorCategory::Network,
            Self::Serialization(_) | Self::MalformedTokenResponse(_) => {
                ErrorCategory::Serialization
            }
        }
    }

    /// Whether a later attempt of the same call may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        crate::error::is_retryable_category(self.category())
    }

    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        crate::error::recovery_for(self.category())
    }

    /// Whether the only way forward is a fresh interactive authorization.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            Self::CredentialNotFound | Self::CredentialCorrupt(_) | Self::CredentialExpired => true,
            Self::ExchangeError { code, .. } => code.as_deref() == Some("invalid_grant"),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_corrupt_credentials_require_reauthorization() {
        assert!(AuthError::CredentialNotFound.requires_reauthorization());
        assert!(AuthError::CredentialCorrupt("bad".into()).requires_reauthorization());
        assert!(AuthError::CredentialExpired.requires_reauthorization());
        assert!(!AuthError::Network("reset".into()).requires_reauthorization());
    }

    #[test]
    fn invalid_grant_requires_reauthorization_but_server_errors_retry() {
        let revoked = AuthError::ExchangeError {
            status: Some(400),
            code: Some("invalid_grant".into()),
            message: "Token has been expired or revoked.".into(),
        };
        assert!(revoked.requires_reauthorization());
        assert!(!revoked.is_retryable());

        let unavailable = AuthError::ExchangeError {
            status: Some(503),
            code: None,
            message: "unavailable".into(),
        };
        assert!(!unavailable.requires_reauthorization());
        assert!(unavailable.is_retryable());
        assert!(AuthError::exchange("connection reset").is_retryable());
    }

    #[test]
    fn malformed_token_response_is_not_transport_failure() {
        let err = AuthError::MalformedTokenResponse("missing access_token".into());
        assert_eq!(err.category(), ErrorCategory::Serialization);
        assert!(!err.is_retryable());
        assert!(!err.requires_reauthorization());
        assert_eq!(AuthError::Network("reset".into()).category(), ErrorCategory::Network);
    }

    #[test]
    fn remote_denied_message_includes_description() {
        let err = AuthError::RemoteDenied {
            error: "access_denied".into(),
            description: Some("user said no".into()),
        };
        assert_eq!(
            err.to_string(),
            "Authorization denied by remote: access_denied (user said no)"
        );
        assert_eq!(err.recovery_suggestion(), RecoverySuggestion::Reauthorize);
    }
}
