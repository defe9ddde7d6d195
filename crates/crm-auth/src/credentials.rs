//! In-memory credential store
//!
//! Holds the one credential the process uses for every CRM call. The whole
//! tuple sits behind a single `Arc` that `set` swaps under a write lock, so a
//! reader either sees the old credential or the new one, never a mix.
//!
//! Nothing is persisted: a restart begins again from the configured
//! bootstrap tokens.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use tracing::debug;

/// Access/refresh token pair with its estimated expiry.
///
/// `expires_at` is a unix timestamp in milliseconds, computed from the
/// token endpoint's `expires_in` at the moment the credential was stored.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_at: u64,
}

impl Credential {
    /// Credential built from configured tokens.
    ///
    /// The real expiry of a configured access token is unknown, so it is
    /// treated as already due.
    pub fn bootstrap(access_token: Secret<String>, refresh_token: Secret<String>) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: now_millis(),
        }
    }

    /// Whether the access token expires within `threshold` of `now_millis`.
    pub fn expires_within(&self, threshold: Duration, now_millis: u64) -> bool {
        self.expires_at <= now_millis.saturating_add(threshold.as_millis() as u64)
    }
}

/// Thread-safe holder of the current credential.
pub struct CredentialStore {
    current: RwLock<Arc<Credential>>,
}

impl CredentialStore {
    pub fn new(initial: Credential) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Snapshot of the current credential.
    pub fn get(&self) -> Arc<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current credential as a whole.
    pub fn set(&self, credential: Credential) {
        let expires_at = credential.expires_at;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(credential);
        debug!(expires_at, "credential replaced");
    }

    /// Whether the current access token expires within `threshold`.
    pub fn needs_refresh(&self, threshold: Duration) -> bool {
        self.get().expires_within(threshold, now_millis())
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
