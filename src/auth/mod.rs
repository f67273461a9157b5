//! OAuth2 credential lifecycle: storage, loopback authorization-code flow,
//! token exchange and refresh.

pub mod credential;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod listener;
pub mod pkce;
pub mod request;
pub mod service;
pub mod store;

pub use credential::Credential;
pub use endpoint::{HttpTokenEndpoint, TokenEndpoint, TokenSet};
pub use error::AuthError;
pub use flow::{AuthorizationFlow, AuthorizationPresenter, ConsolePresenter, FlowState};
pub use listener::{BindPolicy, CallbackCapture, CallbackListener};
pub use request::{AuthorizationRequest, RedirectTarget};
pub use service::CredentialService;
pub use store::{CredentialStore, FileCredentialStore};
