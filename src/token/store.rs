//! Credential Store
//!
//! Authoritative in-memory credential state with write-through persistence.
//!
//! Writers hold the write lock across mutation and persistence, so a reader sees
//! either the state before a write or the state after it.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::persistence::{InMemoryTokenPersistence, TokenPersistence};
use crate::error::{GarminError, GarminResult};
use crate::types::{Clock, PrimaryCredential, SessionCredential, SystemClock, TokenRecord};

/// Default lead time before expiry at which a session is due for renewal.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Shared credential state for one client.
pub struct CredentialStore {
    state: RwLock<TokenRecord>,
    persistence: Arc<dyn TokenPersistence>,
    clock: Arc<dyn Clock>,
    refresh_threshold: Duration,
    auto_refresh: bool,
}

impl CredentialStore {
    /// Create a store, loading any previously persisted record.
    ///
    /// A missing or unreadable record leaves the store empty.
    pub fn new(persistence: Arc<dyn TokenPersistence>) -> Self {
        let record = match persistence.load() {
            Ok(Some(record)) => {
                debug!(
                    primary = record.oauth1_token.is_some(),
                    session = record.oauth2_token.is_some(),
                    "Loaded persisted credentials"
                );
                record
            }
            Ok(None) => TokenRecord::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted credentials, starting empty");
                TokenRecord::default()
            }
        };

        Self {
            state: RwLock::new(record),
            persistence,
            clock: Arc::new(SystemClock),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            auto_refresh: true,
        }
    }

    /// Create a store without durable storage.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTokenPersistence::new()))
    }

    /// Use `clock` for expiry evaluation.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the refresh threshold.
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set the auto-refresh flag.
    pub fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, TokenRecord> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TokenRecord> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, record: &TokenRecord) {
        if let Err(e) = self.persistence.save(record) {
            warn!(error = %e, "Failed to persist credentials");
        }
    }

    /// Current primary credential, if present and not expired.
    pub fn get_primary(&self) -> Option<PrimaryCredential> {
        let now = self.clock.now();
        self.read()
            .oauth1_token
            .as_ref()
            .filter(|cred| !cred.is_expired_at(now))
            .cloned()
    }

    /// Current session credential, if present and not expired.
    pub fn get_session(&self) -> Option<SessionCredential> {
        let now = self.clock.now();
        self.read()
            .oauth2_token
            .as_ref()
            .filter(|cred| !cred.is_expired_at(now))
            .cloned()
    }

    /// Replace the primary credential and persist.
    pub fn store_primary(&self, credential: PrimaryCredential) {
        let mut state = self.write();
        state.oauth1_token = Some(credential);
        self.persist(&state);
        debug!("Stored primary credential");
    }

    /// Replace the session credential and persist.
    pub fn store_session(&self, credential: SessionCredential) {
        let mut state = self.write();
        debug!(expires_at = ?credential.expires_at, "Stored session credential");
        state.oauth2_token = Some(credential);
        self.persist(&state);
    }

    /// Check if the session credential is within the refresh threshold of expiry.
    pub fn needs_refresh(&self) -> bool {
        let now = self.clock.now();
        self.read()
            .oauth2_token
            .as_ref()
            .map(|cred| cred.is_expiring_soon_at(now, self.refresh_threshold))
            .unwrap_or(false)
    }

    /// Session credential for an outgoing request.
    ///
    /// Expiry and, when auto refresh is on, the refresh threshold are evaluated
    /// against one reading of the clock and one view of the record.
    pub fn usable_session(&self) -> GarminResult<SessionCredential> {
        let now = self.clock.now();
        let state = self.read();
        let session = state
            .oauth2_token
            .as_ref()
            .filter(|cred| !cred.is_expired_at(now))
            .ok_or_else(|| GarminError::authentication("no valid token"))?;

        if self.auto_refresh && session.is_expiring_soon_at(now, self.refresh_threshold) {
            // Refresh grant is not implemented: callers re-authenticate.
            info!("Session token is due for refresh");
            return Err(GarminError::authentication(
                "token expired, please re-authenticate",
            ));
        }

        Ok(session.clone())
    }

    /// Remove both credentials and the durable record.
    pub fn clear(&self) {
        let mut state = self.write();
        *state = TokenRecord::default();
        if let Err(e) = self.persistence.delete() {
            warn!(error = %e, "Failed to delete persisted credentials");
        }
        info!("Cleared stored credentials");
    }

    /// Raw copy of both slots, expired credentials included.
    pub fn snapshot(&self) -> TokenRecord {
        self.read().clone()
    }

    /// Check if a usable session credential is present.
    pub fn has_valid_session(&self) -> bool {
        self.get_session().is_some()
    }

    /// Refresh threshold.
    pub fn refresh_threshold(&self) -> Duration {
        self.refresh_threshold
    }

    /// Auto-refresh flag.
    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    /// Clock used for expiry evaluation.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("state", &*self.read())
            .field("refresh_threshold", &self.refresh_threshold)
            .field("auto_refresh", &self.auto_refresh)
            .finish()
    }
}
