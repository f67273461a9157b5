use std::sync::Arc;

use super::credential::Credential;
use super::endpoint::{HttpTokenEndpoint, TokenEndpoint};
use super::error::AuthError;
use super::flow::{AuthorizationFlow, AuthorizationPresenter};
use super::store::{load_blocking, save_blocking, CredentialStore, FileCredentialStore};
use crate::config::AuthContext;
use crate::util::retry::RetryPolicy;

/// Credential lifecycle facade: hands out a usable credential, refreshing or
/// re-authorizing as needed.
///
/// The store is the source of truth; nothing is cached here. A credential
/// holding a refresh token is refreshed in place, never discarded.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use mailbridge::auth::CredentialService;
/// use mailbridge::config::AuthContext;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = CredentialService::from_context(Arc::new(AuthContext::from_env()?));
/// let credential = service.ensure().await?;
/// println!("token expires at {:?}", credential.expires_at);
/// # Ok(())
/// # }
/// ```
pub struct CredentialService {
    context: Arc<AuthContext>,
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    flow: AuthorizationFlow,
    retry: RetryPolicy,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CredentialService {
    pub fn new(
        context: Arc<AuthContext>,
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        let flow = AuthorizationFlow::new(context.clone(), store.clone(), endpoint.clone());
        Self {
            context,
            store,
            endpoint,
            flow,
            retry: RetryPolicy::default(),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// File store at `context.credentials_path` and the HTTP token endpoint.
    pub fn from_context(context: Arc<AuthContext>) -> Self {
        let store = Arc::new(FileCredentialStore::new(context.credentials_path.clone()));
        let endpoint = Arc::new(HttpTokenEndpoint::new(context.client.clone()));
        Self::new(context, store, endpoint)
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn AuthorizationPresenter>) -> Self {
        self.flow = self.flow.with_presenter(presenter);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn flow(&self) -> &AuthorizationFlow {
        &self.flow
    }

    /// The stored credential, refreshed first when it is inside the expiry skew.
    ///
    /// Fails with [`AuthError::CredentialExpired`] when it is expired and has
    /// no refresh token.
    pub async fn current(&self) -> Result<Credential, AuthError> {
        let credential = load_blocking(self.store.clone()).await?;
        if !self.store.is_expired(&credential, self.context.expiry_skew) {
            return Ok(credential);
        }
        if !credential.can_refresh() {
            return Err(AuthError::CredentialExpired);
        }
        self.refresh_if_stale().await
    }

    /// [`current`](Self::current), running the interactive flow when only a
    /// fresh authorization can help.
    pub async fn ensure(&self) -> Result<Credential, AuthError> {
        match self.current().await {
            Ok(credential) => Ok(credential),
            Err(err) if err.requires_reauthorization() => {
                tracing::info!(reason = %err, "stored credential unusable; starting authorization");
                self.authenticate().await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn authenticate(&self) -> Result<Credential, AuthError> {
        self.flow.authenticate().await
    }

    /// Refresh `credential` unconditionally and persist the result.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::CredentialExpired)?;

        let endpoint = &self.endpoint;
        let tokens = self
            .retry
            .execute(move || endpoint.refresh(refresh_token))
            .await?;
        let refreshed = credential.refreshed(tokens);
        save_blocking(self.store.clone(), refreshed.clone()).await?;
        tracing::info!(expires_at = ?refreshed.expires_at, "credential refreshed");
        Ok(refreshed)
    }

    /// Stored credential without refreshing; `None` when not authorized.
    pub fn status(&self) -> Result<Option<Credential>, AuthError> {
        match self.store.load() {
            Ok(credential) => Ok(Some(credential)),
            Err(AuthError::CredentialNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Remove the stored credential. Succeeds when nothing is stored.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store.clear()
    }

    /// Serialize refreshes; whoever waited re-reads the store first so a
    /// credential another caller just refreshed is not refreshed twice.
    async fn refresh_if_stale(&self) -> Result<Credential, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        let latest = load_blocking(self.store.clone()).await?;
        if !self.store.is_expired(&latest, self.context.expiry_skew) {
            return Ok(latest);
        }
        self.refresh(&latest).await
    }
}
