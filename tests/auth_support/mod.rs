#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use chrono::{Duration, Utc};
use mailbridge::auth::{
    AuthError, AuthorizationPresenter, Credential, CredentialStore, HttpTokenEndpoint,
};
use mailbridge::config::{AuthContext, OAuthClientConfig};
use reqwest::Url;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct InMemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
    saves: Mutex<usize>,
    save_threads: Mutex<Vec<ThreadId>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(credential: Credential) -> Self {
        let store = Self::default();
        store.seed(credential);
        store
    }

    pub fn seed(&self, credential: Credential) {
        *self.credential.lock().expect("store lock poisoned") = Some(credential);
    }

    pub fn get(&self) -> Option<Credential> {
        self.credential.lock().expect("store lock poisoned").clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().expect("store lock poisoned")
    }

    /// Threads each `save` ran on, in call order.
    pub fn save_threads(&self) -> Vec<ThreadId> {
        self.save_threads.lock().expect("store lock poisoned").clone()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load(&self) -> Result<Credential, AuthError> {
        self.get().ok_or(AuthError::CredentialNotFound)
    }

    fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        *self.credential.lock().expect("store lock poisoned") = Some(credential.clone());
        *self.saves.lock().expect("store lock poisoned") += 1;
        self.save_threads
            .lock()
            .expect("store lock poisoned")
            .push(std::thread::current().id());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.credential.lock().expect("store lock poisoned") = None;
        Ok(())
    }
}

/// Forwards each presented authorization URL to the test body.
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<Url>,
}

impl ChannelPresenter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Url>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl AuthorizationPresenter for ChannelPresenter {
    fn present(&self, url: &Url) -> Result<(), AuthError> {
        let _ = self.tx.send(url.clone());
        Ok(())
    }
}

pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Play the browser: follow the redirect back to the listener with `extra`
/// query parameters plus the flow's own `state`.
pub async fn redirect_back(authorization_url: &Url, extra: &[(&str, &str)]) -> reqwest::Response {
    let redirect_uri = query_param(authorization_url, "redirect_uri").expect("redirect_uri");
    let mut target = Url::parse(&redirect_uri).expect("redirect uri parses");
    {
        let mut pairs = target.query_pairs_mut();
        for (key, value) in extra {
            pairs.append_pair(key, value);
        }
        if let Some(state) = query_param(authorization_url, "state") {
            pairs.append_pair("state", &state);
        }
    }
    loopback_client()
        .get(target)
        .send()
        .await
        .expect("callback request")
}

/// HTTP client that never routes loopback traffic through an env proxy.
pub fn loopback_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("reqwest client")
}

pub fn endpoint(token_uri: &str) -> Arc<HttpTokenEndpoint> {
    Arc::new(HttpTokenEndpoint::new(client(token_uri)).with_client(loopback_client()))
}

pub fn client(token_uri: &str) -> OAuthClientConfig {
    OAuthClientConfig::new("test-client", Some("test-secret".to_string()))
        .with_token_uri(token_uri)
}

pub fn context(token_uri: &str, callback_url: &str) -> AuthContext {
    AuthContext::builder()
        .client(client(token_uri))
        .callback_url(callback_url)
        .scopes(vec!["scope.a".to_string(), "scope.b".to_string()])
        .callback_timeout(std::time::Duration::from_secs(10))
        .build()
}

pub fn credential(access_token: &str) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: None,
        expires_at: Some(Utc::now() + Duration::hours(1)),
        scopes: Default::default(),
        token_type: Some("Bearer".to_string()),
        last_refresh: Some(Utc::now()),
    }
}

pub fn expired_credential(access_token: &str, refresh_token: Option<&str>) -> Credential {
    Credential {
        expires_at: Some(Utc::now() - Duration::minutes(5)),
        refresh_token: refresh_token.map(str::to_string),
        ..credential(access_token)
    }
}

/// A loopback port that is free right now.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port")
}
