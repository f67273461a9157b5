//! Configuration: OAuth client identity and the explicit auth context.
//!
//! Resolution order for [`AuthContext::from_env`]: builder defaults, then
//! `.env`/process environment overrides. Nothing here is process-global;
//! callers build one context and hand it to the store, listener and flow.

pub mod keys;

pub use keys::OAuthClientConfig;

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;

use crate::auth::listener::BindPolicy;
use crate::error::MailbridgeError;

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_CALLBACK_URL: &str = "http://localhost:3000/oauth2callback";
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.settings.basic",
];
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
pub const KEYS_FILE_NAME: &str = "gcp-oauth.keys.json";

pub const ENV_OAUTH_PATH: &str = "MAILBRIDGE_OAUTH_PATH";
pub const ENV_CREDENTIALS_PATH: &str = "MAILBRIDGE_CREDENTIALS_PATH";
pub const ENV_CALLBACK_URL: &str = "MAILBRIDGE_CALLBACK_URL";
pub const ENV_CALLBACK_TIMEOUT_SECS: &str = "MAILBRIDGE_CALLBACK_TIMEOUT_SECS";
pub const ENV_SCOPES: &str = "MAILBRIDGE_SCOPES";
pub const ENV_STRICT_PORT: &str = "MAILBRIDGE_STRICT_PORT";

/// Everything the credential lifecycle needs, threaded explicitly into
/// [`AuthorizationFlow`](crate::auth::AuthorizationFlow) and friends.
///
/// # Example
/// ```
/// use mailbridge::config::{AuthContext, OAuthClientConfig};
///
/// let context = AuthContext::builder()
///     .client(OAuthClientConfig::new("client-id", None))
///     .callback_url("http://127.0.0.1:8765/callback")
///     .build();
/// assert_eq!(context.callback_url, "http://127.0.0.1:8765/callback");
/// assert!(context.use_pkce);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct AuthContext {
    pub client: OAuthClientConfig,
    #[builder(default = default_scopes())]
    pub scopes: Vec<String>,
    /// Redirect URI template; its port is the *preferred* listener port.
    #[builder(into, default = DEFAULT_CALLBACK_URL.to_string())]
    pub callback_url: String,
    #[builder(into, default = default_credentials_path())]
    pub credentials_path: PathBuf,
    #[builder(default = DEFAULT_CALLBACK_TIMEOUT)]
    pub callback_timeout: Duration,
    /// Treat tokens expiring within this window as already expired.
    #[builder(default = chrono::Duration::seconds(60))]
    pub expiry_skew: chrono::Duration,
    #[builder(default)]
    pub bind_policy: BindPolicy,
    #[builder(default = true)]
    pub use_pkce: bool,
    #[builder(default = true)]
    pub use_state: bool,
}

impl AuthContext {
    /// Load the OAuth keys file and apply `MAILBRIDGE_*` overrides.
    pub fn from_env() -> Result<Self, MailbridgeError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        let explicit_keys = std::env::var_os(ENV_OAUTH_PATH).map(PathBuf::from);
        let keys_path = resolve_keys_path(explicit_keys, &std::env::current_dir()?)?;
        let client = OAuthClientConfig::from_keys_file(&keys_path)?;
        let mut context = Self::builder().client(client).build();

        if let Some(path) = env_non_empty(ENV_CREDENTIALS_PATH) {
            context.credentials_path = PathBuf::from(path);
        }
        if let Some(url) = env_non_empty(ENV_CALLBACK_URL) {
            context.callback_url = url;
        }
        if let Some(raw) = env_non_empty(ENV_CALLBACK_TIMEOUT_SECS) {
            let secs: u64 = raw.parse().map_err(|_| {
                MailbridgeError::Configuration(format!(
                    "{ENV_CALLBACK_TIMEOUT_SECS} must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            context.callback_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = env_non_empty(ENV_SCOPES) {
            context.scopes = parse_scope_list(&raw);
        }
        if let Some(raw) = env_non_empty(ENV_STRICT_PORT) {
            if matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                context.bind_policy = BindPolicy::Strict;
            }
        }

        tracing::debug!(
            keys = %keys_path.display(),
            credentials = %context.credentials_path.display(),
            callback_url = %context.callback_url,
            "auth context loaded"
        );
        Ok(context)
    }
}

/// `~/.mailbridge`, or `./.mailbridge` when no home directory is known.
pub fn default_config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".mailbridge"))
        .unwrap_or_else(|| PathBuf::from(".mailbridge"))
}

pub fn default_credentials_path() -> PathBuf {
    default_config_dir().join("credentials.toml")
}

pub fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

/// Pick the keys file: explicit path, then the working directory, then the config dir.
pub fn resolve_keys_path(
    explicit: Option<PathBuf>,
    working_dir: &Path,
) -> Result<PathBuf, MailbridgeError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path);
        }
        return Err(MailbridgeError::Configuration(format!(
            "OAuth keys file {} does not exist",
            path.display()
        )));
    }
    let candidates = [
        working_dir.join(KEYS_FILE_NAME),
        default_config_dir().join(KEYS_FILE_NAME),
    ];
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| {
            MailbridgeError::Configuration(format!(
                "OAuth keys file not found; place {KEYS_FILE_NAME} in {} or {}, or set {ENV_OAUTH_PATH}",
                working_dir.display(),
                default_config_dir().display()
            ))
        })
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
