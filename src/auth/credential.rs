use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::TokenSet;

/// OAuth user credential persisted by a [`CredentialStore`](super::CredentialStore).
///
/// # Example
/// ```
/// use mailbridge::auth::Credential;
/// use chrono::{Duration, Utc};
///
/// let credential = Credential {
///     access_token: "ya29.access".to_string(),
///     refresh_token: Some("1//refresh".to_string()),
///     expires_at: Some(Utc::now() + Duration::hours(1)),
///     scopes: ["https://www.googleapis.com/auth/gmail.modify".to_string()].into(),
///     token_type: Some("Bearer".to_string()),
///     last_refresh: None,
/// };
/// assert!(!credential.is_expired(Duration::seconds(60)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    pub token_type: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential from a fresh authorization-code grant.
    ///
    /// When the endpoint does not echo a `scope`, the requested scopes are assumed granted.
    pub fn from_token_set(tokens: TokenSet, requested_scopes: &[String]) -> Self {
        let now = Utc::now();
        let scopes = match tokens.scope.as_deref() {
            Some(scope) => parse_scopes(scope),
            None => requested_scopes.iter().cloned().collect(),
        };
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_in.and_then(|secs| expiry_after(now, secs)),
            scopes,
            token_type: tokens.token_type,
            last_refresh: Some(now),
        }
    }

    /// Apply a refresh-grant response on top of this credential.
    ///
    /// The existing refresh token and scopes survive when the endpoint omits them.
    pub fn refreshed(&self, tokens: TokenSet) -> Self {
        let now = Utc::now();
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at: tokens.expires_in.and_then(|secs| expiry_after(now, secs)),
            scopes: tokens
                .scope
                .as_deref()
                .map(parse_scopes)
                .unwrap_or_else(|| self.scopes.clone()),
            token_type: tokens.token_type.or_else(|| self.token_type.clone()),
            last_refresh: Some(now),
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    /// True when the access token expires at or before `now + skew`.
    ///
    /// A credential without a known expiry is treated as live.
    pub fn is_expired(&self, skew: Duration) -> bool {
        self.is_expired_at(Utc::now(), skew)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + skew,
            None => false,
        }
    }
}

/// `None` when `secs` does not fit a timestamp; such a token is treated as
/// having no known expiry.
fn expiry_after(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    let expires_at = Duration::try_seconds(secs).and_then(|ttl| now.checked_add_signed(ttl));
    if expires_at.is_none() {
        tracing::warn!(expires_in = secs, "ignoring out-of-range token lifetime");
    }
    expires_at
}

fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
