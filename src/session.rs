//! Session store: the bearer credential and its durable slot.
//!
//! DESIGN
//! ======
//! `Session` owns the in-memory credential; a `CredentialStore` mirrors it to
//! durable storage so a restart resumes the authenticated view. Store I/O
//! failures are logged and never block the in-memory transition, so logout
//! after a 401 always takes effect.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

const CREDENTIALS_FILE: &str = "credentials.json";

// =============================================================================
// CREDENTIAL
// =============================================================================

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// =============================================================================
// STORES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("credential file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A durable key/value slot holding at most one credential.
pub trait CredentialStore: Send + Sync {
    /// Read the stored credential, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the slot exists but cannot be read or parsed.
    fn load(&self) -> Result<Option<Credential>, SessionError>;

    /// Replace the stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error when the slot cannot be written.
    fn save(&self, credential: &Credential) -> Result<(), SessionError>;

    /// Empty the slot. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error when the slot cannot be removed.
    fn clear(&self) -> Result<bool, SessionError>;
}

#[derive(Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
}

/// JSON file store, `<home>/credentials.json`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    #[must_use]
    pub fn in_home(home: &Path) -> Self {
        Self { path: home.join(CREDENTIALS_FILE) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io { path: self.path.clone(), source }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, SessionError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let stored: StoredCredential = serde_json::from_str(&content)?;
        if stored.access_token.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Credential::new(stored.access_token)))
    }

    fn save(&self, credential: &Credential) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(&StoredCredential { access_token: credential.expose().to_owned() })?;
        std::fs::write(&self.path, json).map_err(|e| self.io_error(e))?;
        restrict_permissions(&self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn clear(&self) -> Result<bool, SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Process-local store, used by tests and `--ephemeral` sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self { slot: Mutex::new(Some(credential)) }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, SessionError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), SessionError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<bool, SessionError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).take().is_some())
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Authentication state shared by the app store and the chat view-model.
pub struct Session {
    store: Arc<dyn CredentialStore>,
    current: RwLock<Option<Credential>>,
}

impl Session {
    /// Start a session from whatever the store holds. An unreadable store
    /// starts unauthenticated.
    #[must_use]
    pub fn restore(store: Arc<dyn CredentialStore>) -> Self {
        let current = match store.load() {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(error = %e, "stored credential unreadable; starting logged out");
                None
            }
        };
        tracing::debug!(authenticated = current.is_some(), "session restored");
        Self { store, current: RwLock::new(current) }
    }

    pub fn login(&self, credential: Credential) {
        if let Err(e) = self.store.save(&credential) {
            tracing::warn!(error = %e, "failed to persist credential");
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
        tracing::info!("session authenticated");
    }

    /// Drop the credential. Returns whether one was held.
    pub fn logout(&self) -> bool {
        let had = self.current.write().unwrap_or_else(PoisonError::into_inner).take().is_some();
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear stored credential");
        }
        if had {
            tracing::info!("session logged out");
        }
        had
    }

    #[must_use]
    pub fn current(&self) -> Option<Credential> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("authenticated", &self.is_authenticated()).finish_non_exhaustive()
    }
}
