use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::credential::Credential;
use super::error::AuthError;
use crate::config::default_credentials_path;

const CREDENTIAL_FILE_VERSION: u32 = 1;

/// Single-slot storage for the user's OAuth credential.
///
/// Implementations may block; async callers in this crate go through the
/// blocking pool.
pub trait CredentialStore: Send + Sync {
    /// Fails with [`AuthError::CredentialNotFound`] when nothing is stored and
    /// [`AuthError::CredentialCorrupt`] when the record cannot be parsed.
    fn load(&self) -> Result<Credential, AuthError>;
    /// Replace the stored credential. Readers never observe a partial record.
    fn save(&self, credential: &Credential) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;

    fn is_expired(&self, credential: &Credential, skew: Duration) -> bool {
        credential.is_expired(skew)
    }
}

/// [`CredentialStore::load`] on the blocking pool.
pub(crate) async fn load_blocking(store: Arc<dyn CredentialStore>) -> Result<Credential, AuthError> {
    tokio::task::spawn_blocking(move || store.load())
        .await
        .map_err(|e| AuthError::Io(format!("credential load task failed: {e}")))?
}

/// [`CredentialStore::save`] on the blocking pool; file stores fsync.
pub(crate) async fn save_blocking(
    store: Arc<dyn CredentialStore>,
    credential: Credential,
) -> Result<(), AuthError> {
    tokio::task::spawn_blocking(move || store.save(&credential))
        .await
        .map_err(|e| AuthError::Io(format!("credential save task failed: {e}")))?
}

/// File-backed credential store using a versioned TOML record.
///
/// # Example
/// ```no_run
/// use mailbridge::auth::{Credential, CredentialStore, FileCredentialStore};
///
/// let store = FileCredentialStore::new_default();
/// let credential = Credential {
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     expires_at: None,
///     scopes: Default::default(),
///     token_type: None,
///     last_refresh: None,
/// };
/// store.save(&credential)?;
/// # Ok::<(), mailbridge::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.mailbridge/credentials.toml`.
    pub fn new_default() -> Self {
        Self::new(default_credentials_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credential, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::CredentialNotFound)
            }
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: CredentialFile = toml::from_str(&raw).map_err(|err| {
            AuthError::CredentialCorrupt(format!("{}: {err}", self.path.display()))
        })?;
        if file.version != CREDENTIAL_FILE_VERSION {
            return Err(AuthError::CredentialCorrupt(format!(
                "unsupported credential file version {} at {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(file.credential)
    }

    fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        let file = CredentialFile {
            version: CREDENTIAL_FILE_VERSION,
            saved_at: Utc::now(),
            credential: credential.clone(),
        };
        let serialized = toml::to_string(&file)?;
        atomic_write(&self.path, serialized.as_bytes())?;
        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    saved_at: DateTime<Utc>,
    credential: Credential,
}

/// Write through a sibling temp file and rename over the target.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        AuthError::Configuration(format!(
            "Credential path {} has no file name",
            path.display()
        ))
    })?;
    let temp_name = format!(
        ".{}.tmp-{}-{}",
        file_name.to_string_lossy(),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
