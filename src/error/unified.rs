//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Stored credentials are missing, unreadable or no longer accepted.
    Authorization,
    /// The interactive authorization flow failed (denied, no code, state mismatch).
    Flow,
    Network,
    Timeout,
    /// The remote token endpoint answered with a 5xx.
    Server,
    Configuration,
    Serialization,
    InvalidArgument,
    Io,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    Reauthorize,
    CheckConfiguration,
    IncreaseTimeout,
    FixInput,
    ContactSupport,
}
