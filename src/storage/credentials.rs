//! Durable storage of the signed-in user's credentials.
//!
//! The persisted layout is exactly three string entries: the access token,
//! the optional refresh token and the optional profile label. Writes always
//! replace the whole record so a reader never observes a token pair that was
//! not issued together.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::KeychainAccess;
use crate::error::{Error, Result};

/// Label shown when the account profile could not be looked up.
pub const PLACEHOLDER_PROFILE_LABEL: &str = "Connected account";

/// Bearer credentials for the single signed-in account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Current access token.
    pub access_token: String,
    /// Refresh token, absent for the popup flow.
    pub refresh_token: Option<String>,
    /// Account label for display (usually the email address).
    pub profile_label: String,
    /// When this record was written (or loaded, for restored sessions).
    pub saved_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        profile_label: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            profile_label: profile_label.into(),
            saved_at: Utc::now(),
        }
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("profile_label", &self.profile_label)
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

/// Durable key-value persistence for the [`CredentialRecord`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the stored record. A missing access token means no record.
    async fn load(&self) -> Result<Option<CredentialRecord>>;

    /// Replaces the stored record.
    async fn save(&self, record: &CredentialRecord) -> Result<()>;

    /// Removes every stored credential.
    async fn clear(&self) -> Result<()>;
}

/// [`CredentialStore`] backed by the OS keychain.
#[derive(Debug, Clone, Default)]
pub struct KeychainCredentialStore {
    keychain: KeychainAccess,
}

impl KeychainCredentialStore {
    /// Creates a store on top of the given keychain namespace.
    pub fn new(keychain: KeychainAccess) -> Self {
        Self { keychain }
    }
}

#[async_trait]
impl CredentialStore for KeychainCredentialStore {
    async fn load(&self) -> Result<Option<CredentialRecord>> {
        let Some(access_token) = self
            .keychain
            .retrieve(KeychainAccess::ACCESS_TOKEN_KEY)
            .await?
        else {
            return Ok(None);
        };

        let refresh_token = self
            .keychain
            .retrieve(KeychainAccess::REFRESH_TOKEN_KEY)
            .await?;
        let profile_label = self
            .keychain
            .retrieve(KeychainAccess::PROFILE_LABEL_KEY)
            .await?
            .unwrap_or_else(|| PLACEHOLDER_PROFILE_LABEL.to_string());

        Ok(Some(CredentialRecord::new(
            access_token,
            refresh_token,
            profile_label,
        )))
    }

    async fn save(&self, record: &CredentialRecord) -> Result<()> {
        // Refresh token first: a crash in between leaves an old access token
        // with a matching or newer refresh token, never the reverse.
        match &record.refresh_token {
            Some(token) => {
                self.keychain
                    .store(KeychainAccess::REFRESH_TOKEN_KEY, token)
                    .await?
            }
            None => {
                self.keychain
                    .delete_if_present(KeychainAccess::REFRESH_TOKEN_KEY)
                    .await?
            }
        }
        self.keychain
            .store(KeychainAccess::PROFILE_LABEL_KEY, &record.profile_label)
            .await?;
        self.keychain
            .store(KeychainAccess::ACCESS_TOKEN_KEY, &record.access_token)
            .await?;

        tracing::debug!(service = self.keychain.service_name(), "credentials saved");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        for key in [
            KeychainAccess::ACCESS_TOKEN_KEY,
            KeychainAccess::REFRESH_TOKEN_KEY,
            KeychainAccess::PROFILE_LABEL_KEY,
        ] {
            self.keychain.delete_if_present(key).await?;
        }

        tracing::debug!(service = self.keychain.service_name(), "credentials cleared");
        Ok(())
    }
}

/// Process-local [`CredentialStore`], used where no keychain is available.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds a record.
    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    /// Returns the current record without going through the async trait.
    pub fn snapshot(&self) -> Option<CredentialRecord> {
        self.lock().ok().and_then(|guard| guard.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<CredentialRecord>>> {
        self.record
            .lock()
            .map_err(|_| Error::Storage("credential cell poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<CredentialRecord>> {
        Ok(self.lock()?.clone())
    }

    async fn save(&self, record: &CredentialRecord) -> Result<()> {
        *self.lock()? = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}
