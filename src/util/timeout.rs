//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::auth::AuthError;
use crate::error::MailbridgeError;

/// Errors that can represent an elapsed deadline.
pub trait TimeoutError {
    fn timed_out(elapsed_ms: u64) -> Self;
}

impl TimeoutError for MailbridgeError {
    fn timed_out(elapsed_ms: u64) -> Self {
        Self::Timeout(elapsed_ms)
    }
}

impl TimeoutError for AuthError {
    fn timed_out(elapsed_ms: u64) -> Self {
        Self::CallbackTimeout(elapsed_ms)
    }
}

/// Wrap a future with a timeout. The inner future is dropped when it fires.
pub async fn with_timeout<T, E: TimeoutError>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = duration.as_millis() as u64, "operation timed out");
            Err(E::timed_out(duration.as_millis() as u64))
        }
    }
}
