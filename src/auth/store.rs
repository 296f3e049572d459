//! Durable storage for the current token pair.
//!
//! The store is the single mutable shared resource of the session core. It
//! holds at most one `TokenPair` at a time and is injected into the
//! `SessionManager` so tests can substitute an in-memory implementation.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Keyring service name for the keychain-backed store
const SERVICE_NAME: &str = "mantix-auth";

/// Keyring entry user for the token pair
const TOKEN_ENTRY: &str = "session-tokens";

/// The access/refresh token pair representing one session.
///
/// Always replaced as a unit; never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Storage for the current token pair. No validity checks live at this
/// layer - a stored pair may well be expired.
pub trait TokenStore: Send + Sync {
    /// Overwrite any existing pair. Both tokens replace together.
    fn save(&self, pair: &TokenPair) -> Result<()>;

    /// Read the persisted pair; `None` when nothing usable is stored.
    fn load(&self) -> Result<Option<TokenPair>>;

    /// Remove the persisted pair. Idempotent.
    fn clear(&self) -> Result<()>;
}

impl<T: TokenStore + ?Sized> TokenStore for Box<T> {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        (**self).save(pair)
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        (**self).load()
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

/// Token pair persisted as a JSON file under the OS config directory.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(pair)?;
        // Write-then-rename so a crash never leaves half a pair behind
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write token file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace token file")?;
        Ok(())
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read token file")?;
        match serde_json::from_str(&contents) {
            Ok(pair) => Ok(Some(pair)),
            Err(e) => {
                // Corrupt or partial state reads as absent, not as an error
                warn!(error = %e, "Stored token pair is unreadable, treating as absent");
                Ok(None)
            }
        }
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

/// Token pair held in the OS keychain.
pub struct KeyringTokenStore;

impl KeyringTokenStore {
    fn entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, TOKEN_ENTRY).context("Failed to create keyring entry")
    }
}

impl TokenStore for KeyringTokenStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        let contents = serde_json::to_string(pair)?;
        Self::entry()?
            .set_password(&contents)
            .context("Failed to store tokens in keychain")
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        match Self::entry()?.get_password() {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(pair) => Ok(Some(pair)),
                Err(e) => {
                    warn!(error = %e, "Keychain token entry is unreadable, treating as absent");
                    Ok(None)
                }
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read tokens from keychain")),
        }
    }

    fn clear(&self) -> Result<()> {
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to clear keychain tokens")),
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        *self.inner.lock().unwrap() = Some(pair.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.inner.lock().unwrap().clone())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_pair() -> TokenPair {
        TokenPair {
            access_token: "access-abc".to_string(),
            refresh_token: "refresh-def".to_string(),
            expires_at: Utc::now() + Duration::seconds(300),
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().join("tokens.json"));

        assert!(store.load().expect("load").is_none());

        let pair = sample_pair();
        store.save(&pair).expect("save");
        let loaded = store.load().expect("load").expect("pair present");
        assert_eq!(loaded, pair);

        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
        // Clearing twice is fine
        store.clear().expect("clear again");
    }

    #[test]
    fn test_file_store_overwrites_whole_pair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().join("tokens.json"));

        store.save(&sample_pair()).expect("save");
        let replacement = TokenPair {
            access_token: "access-2".to_string(),
            refresh_token: "refresh-2".to_string(),
            expires_at: Utc::now() + Duration::seconds(600),
        };
        store.save(&replacement).expect("save");

        let loaded = store.load().expect("load").expect("pair present");
        assert_eq!(loaded, replacement);
    }

    #[test]
    fn test_file_store_partial_state_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tokens.json");
        // A record missing the refresh token is not a usable pair
        std::fs::write(&path, r#"{"access_token": "only-half"}"#).expect("write");

        let store = FileTokenStore::new(path);
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert!(store.load().expect("load").is_none());

        let pair = sample_pair();
        store.save(&pair).expect("save");
        assert_eq!(store.load().expect("load"), Some(pair));

        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
    }
}
