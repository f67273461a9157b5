//! Convenience re-exports for common use.

pub use crate::auth::{
    AuthError, AuthorizationFlow, BindPolicy, Credential, CredentialService, CredentialStore,
    FileCredentialStore, FlowState,
};
pub use crate::batch::{BatchExecutor, BatchJob, BatchResult, FailureReason, ItemFailure};
pub use crate::config::{AuthContext, OAuthClientConfig};
pub use crate::error::{MailbridgeError, Result};
