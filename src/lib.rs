//! Mailbridge: OAuth2 credential lifecycle and batch execution
//!
//! Obtains, persists and refreshes OAuth2 user credentials through the
//! loopback authorization-code flow, and applies state-changing operations
//! to large target lists with chunk-level failure isolation.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailbridge::prelude::*;
//!
//! # async fn example() -> mailbridge::error::Result<()> {
//! let context = Arc::new(AuthContext::from_env()?);
//! let service = CredentialService::from_context(context);
//! let credential = service.ensure().await?;
//! println!("authorized for {} scopes", credential.scopes.len());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod prelude;
pub mod util;

pub use error::{MailbridgeError, Result};
