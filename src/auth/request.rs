use reqwest::Url;
use uuid::Uuid;

use super::error::AuthError;
use super::pkce::{generate_state, PkcePair};
use crate::config::OAuthClientConfig;

/// Where the authorization server sends the browser back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RedirectTarget {
    /// Split a loopback callback URL such as `http://localhost:3000/oauth2callback`.
    pub fn from_callback_url(raw: &str) -> Result<Self, AuthError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AuthError::Configuration(format!("invalid callback URL {raw:?}: {e}")))?;
        if url.scheme() != "http" {
            return Err(AuthError::Configuration(format!(
                "callback URL must use http, got {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AuthError::Configuration(format!("callback URL {raw:?} has no host")))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        Ok(Self {
            host,
            port,
            path: url.path().to_string(),
        })
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// The canonical redirect URI string. Both the authorization URL and the
    /// token exchange use this exact value.
    pub fn uri(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }
}

/// The single live authorization attempt of a flow.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub flow_id: Uuid,
    pub scopes: Vec<String>,
    pub redirect: RedirectTarget,
    pub state: Option<String>,
    pub pkce: Option<PkcePair>,
}

impl AuthorizationRequest {
    pub fn new(scopes: Vec<String>, redirect: RedirectTarget, with_state: bool, with_pkce: bool) -> Self {
        Self {
            flow_id: Uuid::new_v4(),
            scopes,
            redirect,
            state: with_state.then(generate_state),
            pkce: with_pkce.then(PkcePair::generate),
        }
    }

    pub fn redirect_uri(&self) -> String {
        self.redirect.uri()
    }

    pub fn code_verifier(&self) -> Option<&str> {
        self.pkce.as_ref().map(|p| p.code_verifier.as_str())
    }

    /// Build the URL the user opens to grant access.
    pub fn authorization_url(&self, client: &OAuthClientConfig) -> Result<Url, AuthError> {
        let mut url = Url::parse(client.auth_uri.trim()).map_err(|e| {
            AuthError::Configuration(format!("invalid auth URI {:?}: {e}", client.auth_uri))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &client.client_id)
                .append_pair("redirect_uri", &self.redirect_uri())
                .append_pair("response_type", "code")
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("access_type", "offline");
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
            if let Some(pkce) = &self.pkce {
                query
                    .append_pair("code_challenge", &pkce.code_challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn callback_url_is_split_into_parts() {
        let target = RedirectTarget::from_callback_url("http://localhost:3000/oauth2callback").unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.port, 3000);
        assert_eq!(target.path, "/oauth2callback");
        assert_eq!(target.uri(), "http://localhost:3000/oauth2callback");
    }

    #[test]
    fn callback_url_without_port_uses_http_default() {
        let target = RedirectTarget::from_callback_url("http://127.0.0.1/cb").unwrap();
        assert_eq!(target.port, 80);
    }

    #[test]
    fn https_callback_url_is_rejected() {
        let err = RedirectTarget::from_callback_url("https://localhost:3000/cb").unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[test]
    fn authorization_url_carries_actual_redirect_and_offline_access() {
        let redirect = RedirectTarget::from_callback_url("http://localhost:3000/oauth2callback")
            .unwrap()
            .with_port(49152);
        let request = AuthorizationRequest::new(
            vec!["scope-a".to_string(), "scope-b".to_string()],
            redirect,
            true,
            true,
        );
        let client = OAuthClientConfig::new("client-1", None)
            .with_auth_uri("https://auth.example.com/o/oauth2/auth");
        let url = request.authorization_url(&client).unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("auth.example.com"));
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "http://localhost:49152/oauth2callback");
        assert_eq!(params["redirect_uri"], request.redirect_uri());
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "scope-a scope-b");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params.get("state"), request.state.as_ref());
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[test]
    fn state_and_pkce_can_be_disabled() {
        let redirect = RedirectTarget::from_callback_url("http://localhost:3000/cb").unwrap();
        let request = AuthorizationRequest::new(vec![], redirect, false, false);
        let url = request
            .authorization_url(&OAuthClientConfig::new("id", None))
            .unwrap();
        assert!(url.query_pairs().all(|(k, _)| k != "state" && k != "code_challenge"));
        assert!(request.code_verifier().is_none());
    }
}
