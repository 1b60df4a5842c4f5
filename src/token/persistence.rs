//! Token Persistence
//!
//! Durable storage for the token record. The credential store writes through to a
//! persistence backend on every mutation and reads from it once at startup.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StorageError;
use crate::types::TokenRecord;

/// Durable token record backend.
pub trait TokenPersistence: Send + Sync {
    /// Load the record; `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<TokenRecord>, StorageError>;

    /// Replace the stored record.
    fn save(&self, record: &TokenRecord) -> Result<(), StorageError>;

    /// Remove the stored record. Removing a missing record succeeds.
    fn delete(&self) -> Result<(), StorageError>;
}

/// JSON file backend.
#[derive(Debug, Clone)]
pub struct FileTokenPersistence {
    path: PathBuf,
}

impl FileTokenPersistence {
    /// Create a backend writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_failed(&self, error: impl std::fmt::Display) -> StorageError {
        StorageError::WriteFailed {
            message: format!("{}: {}", self.path.display(), error),
        }
    }

    fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }
}

impl TokenPersistence for FileTokenPersistence {
    fn load(&self) -> Result<Option<TokenRecord>, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    message: format!("{}: {}", self.path.display(), e),
                })
            }
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StorageError::CorruptedData {
                message: format!("{}: {}", self.path.display(), e),
            })
    }

    fn save(&self, record: &TokenRecord) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.write_failed(e))?;
            }
        }

        let json = serde_json::to_vec_pretty(record).map_err(|e| self.write_failed(e))?;

        // Write-then-rename: the record on disk is never truncated.
        let temp = self.temp_path();
        Self::write_private(&temp, &json).map_err(|e| self.write_failed(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.write_failed(e))
    }

    fn delete(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed {
                message: format!("{}: {}", self.path.display(), e),
            }),
        }
    }
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryTokenPersistence {
    record: Mutex<Option<TokenRecord>>,
    fail_writes: Mutex<bool>,
    save_count: Mutex<u32>,
}

impl InMemoryTokenPersistence {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with `record`.
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Default::default()
        }
    }

    /// Make every subsequent save and delete fail.
    pub fn set_fail_writes(&self, fail: bool) -> &Self {
        *lock(&self.fail_writes) = fail;
        self
    }

    /// Currently stored record.
    pub fn stored(&self) -> Option<TokenRecord> {
        lock(&self.record).clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u32 {
        *lock(&self.save_count)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TokenPersistence for InMemoryTokenPersistence {
    fn load(&self) -> Result<Option<TokenRecord>, StorageError> {
        Ok(lock(&self.record).clone())
    }

    fn save(&self, record: &TokenRecord) -> Result<(), StorageError> {
        if *lock(&self.fail_writes) {
            return Err(StorageError::WriteFailed {
                message: "write failure injected".to_string(),
            });
        }
        *lock(&self.record) = Some(record.clone());
        *lock(&self.save_count) += 1;
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        if *lock(&self.fail_writes) {
            return Err(StorageError::DeleteFailed {
                message: "delete failure injected".to_string(),
            });
        }
        *lock(&self.record) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrimaryCredential, SessionCredential};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn full_record() -> TokenRecord {
        let expiry = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
        TokenRecord {
            oauth1_token: Some(PrimaryCredential::new("tok", "secret")),
            oauth2_token: Some(
                SessionCredential::new("access")
                    .with_refresh_token("refresh")
                    .with_token_type("Bearer")
                    .with_scope("CONNECT_READ CONNECT_WRITE")
                    .with_expires_at(expiry),
            ),
        }
    }

    #[test]
    fn test_file_round_trip_keeps_every_field() {
        let dir = TempDir::new().unwrap();
        let persistence = FileTokenPersistence::new(dir.path().join("nested/garmin-tokens.json"));

        persistence.save(&full_record()).unwrap();
        let loaded = persistence.load().unwrap().unwrap();

        assert_eq!(loaded, full_record());
        assert!(loaded.oauth1_token.unwrap().expires_at.is_none());
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let persistence = FileTokenPersistence::new(dir.path().join("garmin-tokens.json"));

        assert!(persistence.load().unwrap().is_none());
        assert!(persistence.delete().is_ok());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garmin-tokens.json");
        fs::write(&path, "{ not json").unwrap();

        let result = FileTokenPersistence::new(&path).load();
        assert!(matches!(result, Err(StorageError::CorruptedData { .. })));
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let persistence = FileTokenPersistence::new(dir.path().join("garmin-tokens.json"));
        persistence.save(&full_record()).unwrap();

        persistence.delete().unwrap();

        assert!(!persistence.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let persistence = FileTokenPersistence::new(dir.path().join("garmin-tokens.json"));
        persistence.save(&TokenRecord::default()).unwrap();

        let mode = fs::metadata(persistence.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_in_memory_failure_injection() {
        let persistence = InMemoryTokenPersistence::new();
        persistence.set_fail_writes(true);

        assert!(persistence.save(&full_record()).is_err());
        assert!(persistence.stored().is_none());
        assert_eq!(persistence.save_count(), 0);
    }
}
