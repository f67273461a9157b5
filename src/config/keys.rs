//! OAuth client identity, as downloaded from the provider's developer console.

use std::path::Path;

use serde::Deserialize;

use super::{DEFAULT_AUTH_URI, DEFAULT_TOKEN_URI};
use crate::error::MailbridgeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_uri: String,
    pub token_uri: String,
}

impl OAuthClientConfig {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            auth_uri: DEFAULT_AUTH_URI.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        }
    }

    pub fn with_auth_uri(mut self, url: impl Into<String>) -> Self {
        self.auth_uri = url.into();
        self
    }

    pub fn with_token_uri(mut self, url: impl Into<String>) -> Self {
        self.token_uri = url.into();
        self
    }

    /// Parse a keys file with either an `installed` or a `web` client section.
    pub fn from_keys_file(path: impl AsRef<Path>) -> Result<Self, MailbridgeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_keys_json(&raw).map_err(|err| match err {
            MailbridgeError::Configuration(msg) => {
                MailbridgeError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_keys_json(raw: &str) -> Result<Self, MailbridgeError> {
        let file: KeysFile = serde_json::from_str(raw)?;
        let section = file.installed.or(file.web).ok_or_else(|| {
            MailbridgeError::Configuration(
                "OAuth keys file has neither an `installed` nor a `web` client".to_string(),
            )
        })?;
        let client_id = section.client_id.trim().to_string();
        if client_id.is_empty() {
            return Err(MailbridgeError::Configuration(
                "OAuth keys file has an empty client_id".to_string(),
            ));
        }
        Ok(Self {
            client_id,
            client_secret: section
                .client_secret
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            auth_uri: section
                .auth_uri
                .unwrap_or_else(|| DEFAULT_AUTH_URI.to_string()),
            token_uri: section
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct KeysFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Debug, Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: Option<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installed_section_is_parsed() {
        let config = OAuthClientConfig::from_keys_json(
            r#"{"installed":{"client_id":"abc.apps.googleusercontent.com","client_secret":"shh",
                "auth_uri":"https://accounts.google.com/o/oauth2/auth",
                "token_uri":"https://oauth2.googleapis.com/token",
                "redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        assert_eq!(config.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(config.client_secret.as_deref(), Some("shh"));
        assert_eq!(config.auth_uri, "https://accounts.google.com/o/oauth2/auth");
    }

    #[test]
    fn web_section_falls_back_to_default_uris() {
        let config =
            OAuthClientConfig::from_keys_json(r#"{"web":{"client_id":"web-id"}}"#).unwrap();
        assert_eq!(config.client_id, "web-id");
        assert_eq!(config.client_secret, None);
        assert_eq!(config.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn missing_client_section_is_a_configuration_error() {
        let err = OAuthClientConfig::from_keys_json(r#"{"other":{}}"#).unwrap_err();
        assert!(matches!(err, MailbridgeError::Configuration(_)));
    }
}
