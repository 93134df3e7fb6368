//! Session state shared by the authorization engine and its consumers.
//!
//! There is exactly one session per process. Its lifecycle state is published
//! on a `watch` channel so background loops can park until the session is
//! usable again, and the current credential lives in a single cell that is
//! always replaced as a whole.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::storage::CredentialRecord;

/// Lifecycle of the signed-in session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No usable credential.
    Unauthenticated,
    /// An interactive authorization is in progress.
    Authorizing,
    /// A credential is available for provider calls.
    Authorized,
    /// The access token is being renewed with the refresh token.
    Refreshing,
}

impl AuthState {
    /// Returns true when provider calls may be attempted.
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthState::Authorized)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authorizing => "authorizing",
            AuthState::Authorized => "authorized",
            AuthState::Refreshing => "refreshing",
        };
        f.write_str(name)
    }
}

/// The single owned session object.
#[derive(Debug)]
pub struct Session {
    state: watch::Sender<AuthState>,
    credential: RwLock<Option<CredentialRecord>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates an unauthenticated session.
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            state,
            credential: RwLock::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Moves to `next`, returning the previous state.
    pub(crate) fn transition(&self, next: AuthState) -> AuthState {
        self.state.send_replace(next)
    }

    /// Current credential, if any.
    pub async fn credential(&self) -> Option<CredentialRecord> {
        self.credential.read().await.clone()
    }

    /// Current access token, if any.
    pub async fn access_token(&self) -> Option<String> {
        self.credential
            .read()
            .await
            .as_ref()
            .map(|record| record.access_token.clone())
    }

    /// Replaces the in-memory credential.
    pub(crate) async fn set_credential(&self, record: Option<CredentialRecord>) {
        *self.credential.write().await = record;
    }
}
