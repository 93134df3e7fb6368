//! Authorization flow engine.
//!
//! Owns the [`Session`] and is the only writer of credentials, both in memory
//! and in the [`CredentialStore`]. State machine:
//!
//! ```text
//! Unauthenticated -> Authorizing -> Authorized
//! Authorized -> Refreshing -> Authorized
//! Refreshing -> Unauthenticated        (refresh token rejected)
//! ```

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use super::authorizer::Authorizer;
use super::oauth::{OAuthClient, TokenGrant};
use super::session::{AuthState, Session};
use crate::app::{AppEvent, EventBus};
use crate::error::{Error, Result};
use crate::storage::{CredentialRecord, CredentialStore, PLACEHOLDER_PROFILE_LABEL};

/// Drives authorization, refresh and recovery for the single session.
pub struct AuthEngine {
    session: Session,
    store: Arc<dyn CredentialStore>,
    oauth: OAuthClient,
    authorizer: Arc<dyn Authorizer>,
    events: EventBus,
    /// Serializes recovery so concurrent 401s refresh only once.
    recovery: Mutex<()>,
}

impl AuthEngine {
    /// Creates an engine in the `Unauthenticated` state.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        oauth: OAuthClient,
        authorizer: Arc<dyn Authorizer>,
        events: EventBus,
    ) -> Self {
        Self {
            session: Session::new(),
            store,
            oauth,
            authorizer,
            events,
            recovery: Mutex::new(()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AuthState {
        self.session.state()
    }

    /// Subscribes to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.session.subscribe()
    }

    /// Current access token.
    pub async fn access_token(&self) -> Option<String> {
        self.session.access_token().await
    }

    /// Display label of the signed-in account.
    pub async fn profile_label(&self) -> Option<String> {
        self.session
            .credential()
            .await
            .map(|record| record.profile_label)
    }

    /// Loads stored credentials at startup.
    ///
    /// A stored record optimistically enters `Authorized`; the first sync
    /// verifies it. Returns whether a record was found.
    pub async fn restore(&self) -> Result<bool> {
        let Some(record) = self.store.load().await? else {
            tracing::info!("no stored credentials");
            return Ok(false);
        };

        tracing::info!(account = %record.profile_label, "restored stored credentials");
        self.session.set_credential(Some(record)).await;
        self.transition(AuthState::Authorized);
        Ok(true)
    }

    /// Runs the interactive authorization flow and persists the result.
    pub async fn authorize(&self) -> Result<CredentialRecord> {
        let previous = self.state();
        if matches!(previous, AuthState::Authorizing) {
            return Err(Error::AuthDenied(
                "an authorization is already in progress".to_string(),
            ));
        }
        self.transition(AuthState::Authorizing);

        match self.complete_authorization().await {
            Ok(record) => {
                self.transition(AuthState::Authorized);
                tracing::info!(
                    account = %record.profile_label,
                    authorizer = self.authorizer.name(),
                    "authorized"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, "authorization failed");
                let fallback = if self.session.credential().await.is_some() {
                    previous
                } else {
                    AuthState::Unauthenticated
                };
                self.transition(fallback);
                Err(e)
            }
        }
    }

    async fn complete_authorization(&self) -> Result<CredentialRecord> {
        let TokenGrant {
            access_token,
            refresh_token,
        } = self.authorizer.authorize().await?;

        let profile_label = match self.oauth.fetch_profile_label(&access_token).await {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!(error = %e, "profile lookup failed, using placeholder label");
                PLACEHOLDER_PROFILE_LABEL.to_string()
            }
        };

        let record = CredentialRecord::new(access_token, refresh_token, profile_label);
        self.store.save(&record).await?;
        self.session.set_credential(Some(record.clone())).await;
        Ok(record)
    }

    /// Trades `refresh_token` for a new access token.
    ///
    /// A rejected refresh token clears all stored credentials and ends in
    /// `Unauthenticated`. Transient failures keep the credentials and return
    /// to `Authorized`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<CredentialRecord> {
        self.transition(AuthState::Refreshing);

        match self.oauth.refresh(refresh_token).await {
            Ok(grant) => {
                let profile_label = self
                    .profile_label()
                    .await
                    .unwrap_or_else(|| PLACEHOLDER_PROFILE_LABEL.to_string());
                let record =
                    CredentialRecord::new(grant.access_token, grant.refresh_token, profile_label);

                if let Err(e) = self.store.save(&record).await {
                    // The new token is still usable for this process.
                    tracing::warn!(error = %e, "failed to persist refreshed credentials");
                }
                self.session.set_credential(Some(record.clone())).await;
                self.transition(AuthState::Authorized);
                Ok(record)
            }
            Err(Error::RefreshDenied) => {
                if let Err(e) = self.store.clear().await {
                    tracing::error!(error = %e, "failed to clear rejected credentials");
                }
                self.session.set_credential(None).await;
                self.transition(AuthState::Unauthenticated);
                Err(Error::RefreshDenied)
            }
            Err(e) => {
                tracing::warn!(error = %e, "refresh failed, keeping current credentials");
                self.transition(AuthState::Authorized);
                Err(e)
            }
        }
    }

    /// Shared recovery after a provider rejected `stale_token`.
    ///
    /// Concurrent callers are serialized; a caller whose token was already
    /// replaced returns immediately. Without a refresh token the session
    /// drops to `Unauthenticated` and [`Error::AuthExpired`] is returned.
    pub async fn recover(&self, stale_token: &str) -> Result<()> {
        let _guard = self.recovery.lock().await;

        let Some(record) = self.session.credential().await else {
            return Err(Error::AuthExpired);
        };
        if record.access_token != stale_token {
            tracing::debug!("credentials already recovered");
            return Ok(());
        }

        match record.refresh_token {
            Some(refresh_token) => self.refresh(&refresh_token).await.map(|_| ()),
            None => {
                tracing::info!("access token expired and no refresh token is available");
                self.session.set_credential(None).await;
                self.transition(AuthState::Unauthenticated);
                Err(Error::AuthExpired)
            }
        }
    }

    /// Drops the in-memory session so the user must authorize again.
    /// Stored credentials are left in place.
    pub async fn invalidate(&self) {
        self.session.set_credential(None).await;
        self.transition(AuthState::Unauthenticated);
    }

    /// Clears all credentials and ends the session.
    pub async fn sign_out(&self) -> Result<()> {
        self.store.clear().await?;
        self.session.set_credential(None).await;
        self.transition(AuthState::Unauthenticated);
        tracing::info!("signed out");
        Ok(())
    }

    fn transition(&self, next: AuthState) {
        let previous = self.session.transition(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "auth state changed");
            self.events.publish(AppEvent::AuthStateChanged {
                from: previous,
                to: next,
            });
        }
    }
}

impl std::fmt::Debug for AuthEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthEngine")
            .field("state", &self.state())
            .field("authorizer", &self.authorizer.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{engine_with_authorizer, StaticAuthorizer};
    use crate::gateway::testing::ScriptedTransport;
    use crate::gateway::{ApiResponse, Method};
    use crate::storage::MemoryCredentialStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOKEN_URL: &str = "oauth2.googleapis.com/token";
    const USERINFO_URL: &str = "/userinfo";

    fn setup(
        authorizer: StaticAuthorizer,
        record: Option<CredentialRecord>,
    ) -> (AuthEngine, Arc<ScriptedTransport>, Arc<MemoryCredentialStore>) {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(match record {
            Some(record) => MemoryCredentialStore::with_record(record),
            None => MemoryCredentialStore::new(),
        });
        let engine = engine_with_authorizer(transport.clone(), store.clone(), Arc::new(authorizer));
        (engine, transport, store)
    }

    #[tokio::test]
    async fn restore_without_record_stays_unauthenticated() {
        let (engine, _, _) = setup(StaticAuthorizer::denied(), None);
        assert!(!engine.restore().await.unwrap());
        assert_eq!(engine.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn restore_is_optimistically_authorized() {
        let (engine, _, _) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", Some("r1".into()), "jane@example.com")),
        );
        assert!(engine.restore().await.unwrap());
        assert_eq!(engine.state(), AuthState::Authorized);
        assert_eq!(engine.access_token().await.as_deref(), Some("a1"));
        assert_eq!(
            engine.profile_label().await.as_deref(),
            Some("jane@example.com")
        );
    }

    #[tokio::test]
    async fn authorize_persists_record_with_profile_label() {
        let (engine, transport, store) =
            setup(StaticAuthorizer::granting("a1", Some("r1")), None);
        transport.once(
            Method::Get,
            USERINFO_URL,
            ApiResponse::new(200, r#"{"email":"jane@example.com"}"#),
        );

        let record = engine.authorize().await.unwrap();
        assert_eq!(record.profile_label, "jane@example.com");
        assert_eq!(engine.state(), AuthState::Authorized);

        let stored = store.snapshot().unwrap();
        assert_eq!(stored.access_token, "a1");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn profile_failure_degrades_to_placeholder() {
        let (engine, transport, _) = setup(StaticAuthorizer::granting("a1", None), None);
        transport.once(Method::Get, USERINFO_URL, ApiResponse::new(500, "boom"));

        let record = engine.authorize().await.unwrap();
        assert_eq!(record.profile_label, PLACEHOLDER_PROFILE_LABEL);
        assert_eq!(engine.state(), AuthState::Authorized);
    }

    #[tokio::test]
    async fn denied_authorization_returns_to_unauthenticated() {
        let (engine, _, store) = setup(StaticAuthorizer::denied(), None);

        assert!(matches!(
            engine.authorize().await,
            Err(Error::AuthDenied(_))
        ));
        assert_eq!(engine.state(), AuthState::Unauthenticated);
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let (engine, transport, _) = setup(StaticAuthorizer::granting("a1", None), None);
        transport.always(Method::Get, USERINFO_URL, ApiResponse::new(500, ""));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.events.subscribe(move |event| {
            if let AppEvent::AuthStateChanged { to, .. } = event {
                sink.lock().unwrap().push(*to);
            }
        });

        engine.authorize().await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![AuthState::Authorizing, AuthState::Authorized]
        );
    }

    #[tokio::test]
    async fn refresh_replaces_whole_record() {
        let (engine, transport, store) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", Some("r1".into()), "jane@example.com")),
        );
        engine.restore().await.unwrap();
        transport.once(
            Method::Post,
            TOKEN_URL,
            ApiResponse::new(200, r#"{"access_token":"a2","refresh_token":"r2"}"#),
        );

        engine.refresh("r1").await.unwrap();
        let stored = store.snapshot().unwrap();
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
        assert_eq!(stored.profile_label, "jane@example.com");
        assert_eq!(engine.state(), AuthState::Authorized);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_everything() {
        let (engine, transport, store) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", Some("r1".into()), "me")),
        );
        engine.restore().await.unwrap();
        transport.once(
            Method::Post,
            TOKEN_URL,
            ApiResponse::new(400, r#"{"error":"invalid_grant"}"#),
        );

        assert_eq!(engine.refresh("r1").await.unwrap_err(), Error::RefreshDenied);
        assert_eq!(engine.state(), AuthState::Unauthenticated);
        assert!(store.snapshot().is_none());
        assert!(engine.access_token().await.is_none());
    }

    #[tokio::test]
    async fn rejected_client_keeps_stored_record() {
        let (engine, transport, store) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", Some("r1".into()), "me")),
        );
        engine.restore().await.unwrap();
        transport.once(
            Method::Post,
            TOKEN_URL,
            ApiResponse::new(401, r#"{"error":"invalid_client"}"#),
        );

        assert!(matches!(engine.refresh("r1").await, Err(Error::Config(_))));
        assert_eq!(engine.state(), AuthState::Authorized);
        assert_eq!(store.snapshot(), Some(CredentialRecord::new("a1", Some("r1".into()), "me")));
        assert_eq!(engine.access_token().await.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn network_failure_during_refresh_keeps_credentials() {
        let (engine, transport, store) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", Some("r1".into()), "me")),
        );
        engine.restore().await.unwrap();
        transport.once_error(Method::Post, TOKEN_URL, Error::Network("offline".into()));

        assert!(matches!(
            engine.refresh("r1").await,
            Err(Error::Network(_))
        ));
        assert_eq!(engine.state(), AuthState::Authorized);
        assert_eq!(store.snapshot().unwrap().access_token, "a1");
    }

    #[tokio::test]
    async fn recover_without_refresh_token_goes_unauthenticated() {
        let (engine, _, store) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", None, "me")),
        );
        engine.restore().await.unwrap();

        assert_eq!(engine.recover("a1").await.unwrap_err(), Error::AuthExpired);
        assert_eq!(engine.state(), AuthState::Unauthenticated);
        assert!(store.snapshot().is_some());
    }

    #[tokio::test]
    async fn concurrent_recoveries_refresh_once() {
        let (engine, transport, _) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", Some("r1".into()), "me")),
        );
        engine.restore().await.unwrap();
        transport.once(
            Method::Post,
            TOKEN_URL,
            ApiResponse::new(200, r#"{"access_token":"a2"}"#),
        );

        let (first, second) = tokio::join!(engine.recover("a1"), engine.recover("a1"));
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(transport.requests_to(Method::Post, TOKEN_URL).len(), 1);
        assert_eq!(engine.access_token().await.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn sign_out_clears_store() {
        let (engine, _, store) = setup(
            StaticAuthorizer::denied(),
            Some(CredentialRecord::new("a1", Some("r1".into()), "me")),
        );
        engine.restore().await.unwrap();

        engine.sign_out().await.unwrap();
        assert_eq!(engine.state(), AuthState::Unauthenticated);
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn authorizer_runs_once_per_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let authorizer = StaticAuthorizer::granting("a1", None).counting(calls.clone());
        let (engine, transport, _) = setup(authorizer, None);
        transport.always(Method::Get, USERINFO_URL, ApiResponse::new(500, ""));

        engine.authorize().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
