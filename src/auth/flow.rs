//! Authorization-code flow coordinator.

use std::sync::{Arc, Mutex};

use reqwest::Url;
use strum::Display;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::credential::Credential;
use super::endpoint::TokenEndpoint;
use super::error::AuthError;
use super::listener::{CallbackCapture, CallbackListener};
use super::request::{AuthorizationRequest, RedirectTarget};
use super::store::{save_blocking, CredentialStore};
use crate::config::AuthContext;
use crate::util::timeout::with_timeout;

/// Lifecycle of one [`AuthorizationFlow::authenticate`] call.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FlowState {
    Idle,
    ListenerBound { port: u16 },
    AwaitingRedirect { flow_id: Uuid, port: u16 },
    Exchanging { flow_id: Uuid },
    Resolved(Credential),
    Failed(AuthError),
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Failed(_))
    }
}

/// Shows the authorization URL to the user.
pub trait AuthorizationPresenter: Send + Sync {
    fn present(&self, url: &Url) -> Result<(), AuthError>;
}

/// Prints the authorization URL to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePresenter;

impl AuthorizationPresenter for ConsolePresenter {
    fn present(&self, url: &Url) -> Result<(), AuthError> {
        eprintln!("Open this URL in your browser to authorize access:\n\n{url}\n");
        Ok(())
    }
}

/// Drives the authorization-code exchange end to end.
///
/// One flow is live at a time; a concurrent [`authenticate`](Self::authenticate)
/// on the same instance fails with [`AuthError::FlowInProgress`]. A failed
/// flow is never retried automatically.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use mailbridge::auth::{AuthorizationFlow, FileCredentialStore, HttpTokenEndpoint};
/// use mailbridge::config::AuthContext;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let context = Arc::new(AuthContext::from_env()?);
/// let store = Arc::new(FileCredentialStore::new(context.credentials_path.clone()));
/// let endpoint = Arc::new(HttpTokenEndpoint::new(context.client.clone()));
/// let flow = AuthorizationFlow::new(context, store, endpoint);
/// let credential = flow.authenticate().await?;
/// println!("authorized scopes: {:?}", credential.scopes);
/// # Ok(())
/// # }
/// ```
pub struct AuthorizationFlow {
    context: Arc<AuthContext>,
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    presenter: Arc<dyn AuthorizationPresenter>,
    state: Mutex<FlowState>,
    live: tokio::sync::Mutex<()>,
}

impl AuthorizationFlow {
    pub fn new(
        context: Arc<AuthContext>,
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            context,
            store,
            endpoint,
            presenter: Arc::new(ConsolePresenter),
            state: Mutex::new(FlowState::Idle),
            live: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn AuthorizationPresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Snapshot of the current (or last) flow state.
    pub fn state(&self) -> FlowState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn authenticate(&self) -> Result<Credential, AuthError> {
        self.authenticate_with_cancellation(CancellationToken::new())
            .await
    }

    /// Like [`authenticate`](Self::authenticate), abandoning the wait for the
    /// redirect when `cancel` fires. The listener is released either way.
    pub async fn authenticate_with_cancellation(
        &self,
        cancel: CancellationToken,
    ) -> Result<Credential, AuthError> {
        let _live = self
            .live
            .try_lock()
            .map_err(|_| AuthError::FlowInProgress)?;
        self.transition(FlowState::Idle);

        let result = self.run(&cancel).await;
        match &result {
            Ok(credential) => self.transition(FlowState::Resolved(credential.clone())),
            Err(err) => self.transition(FlowState::Failed(err.clone())),
        }
        result
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<Credential, AuthError> {
        let preferred = RedirectTarget::from_callback_url(&self.context.callback_url)?;
        let listener = CallbackListener::start_with_policy(
            &preferred.host,
            preferred.port,
            &preferred.path,
            self.context.bind_policy,
        )
        .await?;
        let port = listener.port();
        self.transition(FlowState::ListenerBound { port });

        if listener.fell_back() {
            tracing::warn!(
                preferred_port = preferred.port,
                port,
                "redirect URI advertises the fallback port; the authorization server must accept it"
            );
        }

        // The actual port goes into both the authorization URL and the exchange.
        let request = AuthorizationRequest::new(
            self.context.scopes.clone(),
            preferred.with_port(port),
            self.context.use_state,
            self.context.use_pkce,
        );
        let listener = listener.with_expected_state(request.state.clone());
        let url = request.authorization_url(&self.context.client)?;

        self.transition(FlowState::AwaitingRedirect {
            flow_id: request.flow_id,
            port,
        });
        self.presenter.present(&url)?;

        let capture = self.await_redirect(listener, cancel).await?;

        self.transition(FlowState::Exchanging {
            flow_id: request.flow_id,
        });
        let tokens = self
            .endpoint
            .exchange_code(
                &capture.code,
                &request.redirect_uri(),
                request.code_verifier(),
            )
            .await
            .map_err(|err| match err {
                AuthError::Network(message) => AuthError::exchange(message),
                other => other,
            })?;

        let credential = Credential::from_token_set(tokens, &request.scopes);
        save_blocking(self.store.clone(), credential.clone()).await?;
        Ok(credential)
    }

    /// The listener is moved into the wait; on timeout or cancel it is dropped
    /// before this returns, which frees the port.
    async fn await_redirect(
        &self,
        listener: CallbackListener,
        cancel: &CancellationToken,
    ) -> Result<CallbackCapture, AuthError> {
        let wait = with_timeout(self.context.callback_timeout, listener.await_callback());
        tokio::select! {
            outcome = wait => outcome,
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
        }
    }

    fn transition(&self, next: FlowState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::debug!(from = %*state, to = %next, "authorization flow transition");
        *state = next;
    }
}
