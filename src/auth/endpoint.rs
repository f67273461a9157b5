//! OAuth token endpoint client (authorization_code + refresh_token grants).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::error::AuthError;
use crate::config::OAuthClientConfig;

/// Token material returned by a successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// Remote token endpoint the authorization flow and refresher talk to.
///
/// Transport failures are [`AuthError::Network`], rejected grants are
/// [`AuthError::ExchangeError`] and unusable 2xx bodies are
/// [`AuthError::MalformedTokenResponse`].
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Redeem an authorization code. `redirect_uri` must be the exact value
    /// carried by the authorization URL the code was issued against.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;
}

/// Form-encoded HTTP token endpoint.
///
/// # Example
/// ```no_run
/// use mailbridge::auth::HttpTokenEndpoint;
/// use mailbridge::config::OAuthClientConfig;
///
/// let endpoint = HttpTokenEndpoint::new(OAuthClientConfig::new("client-id", Some("secret".into())));
/// ```
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_uri: String,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpTokenEndpoint {
    pub fn new(config: OAuthClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_uri: config.token_uri,
            client_id: config.client_id,
            client_secret: config.client_secret,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_token_uri(mut self, url: impl Into<String>) -> Self {
        self.token_uri = url.into();
        self
    }

    fn client_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("client_id", self.client_id.trim().to_string())];
        if let Some(secret) = self.client_secret.as_deref().map(str::trim) {
            if !secret.is_empty() {
                form.push(("client_secret", secret.to_string()));
            }
        }
        form
    }

    async fn post_grant(&self, form: Vec<(&'static str, String)>) -> Result<TokenSet, AuthError> {
        let response = self
            .client
            .post(self.token_uri.trim())
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("token request failed: {e}")))?;
        parse_token_response(response).await
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet, AuthError> {
        let mut form = self.client_form();
        form.push(("grant_type", "authorization_code".to_string()));
        form.push(("code", code.to_string()));
        form.push(("redirect_uri", redirect_uri.to_string()));
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier.to_string()));
        }
        let tokens = self.post_grant(form).await?;
        tracing::info!(
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_in = ?tokens.expires_in,
            "authorization code exchanged"
        );
        Ok(tokens)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let mut form = self.client_form();
        form.push(("grant_type", "refresh_token".to_string()));
        form.push(("refresh_token", refresh_token.trim().to_string()));
        let tokens = self.post_grant(form).await?;
        tracing::debug!(expires_in = ?tokens.expires_in, "access token refreshed");
        Ok(tokens)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<Value>,
    scope: Option<String>,
    token_type: Option<String>,
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenSet, AuthError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::Network(format!("token response read failed: {e}")))?;

    if !status.is_success() {
        let (code, description) = parse_oauth_error(&body);
        let message = match (&code, &description) {
            (Some(code), Some(description)) => format!("{code}: {description}"),
            (Some(code), None) => code.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => format!("token endpoint returned status {}", status.as_u16()),
        };
        return Err(AuthError::ExchangeError {
            status: Some(status.as_u16()),
            code,
            message,
        });
    }

    let payload: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| AuthError::MalformedTokenResponse(format!("invalid json: {e}")))?;
    let access_token = payload
        .access_token
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::MalformedTokenResponse("missing access_token".to_string()))?;

    Ok(TokenSet {
        access_token,
        refresh_token: non_empty(payload.refresh_token),
        expires_in: payload
            .expires_in
            .as_ref()
            .and_then(parse_i64_lossy)
            .filter(|secs| *secs > 0),
        scope: non_empty(payload.scope),
        token_type: non_empty(payload.token_type),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_oauth_error(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    match value.get("error") {
        Some(Value::Object(nested)) => (
            text(nested.get("status")).or_else(|| text(nested.get("code"))),
            text(nested.get("message")),
        ),
        other => (text(other), text(value.get("error_description"))),
    }
}
