//! Application composition root and lifecycle.
//!
//! [`App`] wires the credential store, auth engine, gateway, mail client and
//! services together from [`Settings`], and [`App::run`] drives the headless
//! session until Ctrl-C.

mod events;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use events::{AppEvent, EventBus, EventHandler, SubscriberId};

use crate::auth::{select_authorizer, AuthEngine, Authorizer, HostCapabilities, OAuthClient, SystemBrowser};
use crate::config::Settings;
use crate::gateway::{Gateway, HttpTransport, ReqwestTransport};
use crate::providers::ai::{LlmProvider, OpenAiCompatibleProvider};
use crate::providers::email::{GmailClient, MailProvider};
use crate::services::{
    DigestService, DraftService, EmailService, EnrichmentQueue, InsightGenerator, InsightStore,
    LlmInsightGenerator, SyncScheduler,
};
use crate::storage::{CredentialStore, KeychainAccess, KeychainCredentialStore};

/// Environment variable consulted when the keychain has no API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// The wired application.
pub struct App {
    settings: Settings,
    events: EventBus,
    auth: Arc<AuthEngine>,
    scheduler: Arc<SyncScheduler>,
    insights: Arc<InsightStore>,
    enrichment: Arc<EnrichmentQueue>,
    drafts: Arc<DraftService>,
    mailbox: Arc<EmailService>,
    digest: Arc<DigestService>,
    ai_configured: bool,
}

impl App {
    /// Builds the desktop stack: OS keychain, reqwest transport, system
    /// browser and an OpenAI-compatible model when an API key is available.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let keychain = KeychainAccess::new();
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new());
        let store: Arc<dyn CredentialStore> =
            Arc::new(KeychainCredentialStore::new(keychain.clone()));

        let authorizer = select_authorizer(
            HostCapabilities::desktop(),
            settings.auth.mode,
            OAuthClient::new(Arc::clone(&transport), settings.auth.clone()),
            Arc::new(SystemBrowser),
            None,
        )
        .context("selecting authorization method")?;

        let llm = if settings.ai.enabled {
            Self::resolve_api_key(&keychain, &settings.ai.api_key_keychain_id)
                .await
                .map(|key| {
                    Arc::new(OpenAiCompatibleProvider::from_settings(&settings.ai, Some(key)))
                        as Arc<dyn LlmProvider>
                })
        } else {
            None
        };

        Ok(Self::with_parts(settings, transport, store, authorizer, llm))
    }

    /// Wires the application from explicit collaborators.
    pub fn with_parts(
        settings: Settings,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        authorizer: Arc<dyn Authorizer>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        let events = EventBus::new();

        let oauth = OAuthClient::new(Arc::clone(&transport), settings.auth.clone());
        let auth = Arc::new(AuthEngine::new(store, oauth, authorizer, events.clone()));

        let gateway = Gateway::new(transport, Arc::clone(&auth));
        let mail: Arc<dyn MailProvider> = Arc::new(GmailClient::with_base_url(
            gateway,
            settings.sync.api_base_url.clone(),
        ));

        let generator = LlmInsightGenerator::new(llm, settings.ai.clone());
        let ai_configured = generator.is_configured();
        let generator: Arc<dyn InsightGenerator> = Arc::new(generator);

        let scheduler = Arc::new(SyncScheduler::new(
            Arc::clone(&mail),
            Arc::clone(&auth),
            settings.sync.clone(),
            events.clone(),
        ));
        let insights = Arc::new(InsightStore::new());
        let enrichment = Arc::new(EnrichmentQueue::new(
            Arc::clone(&scheduler),
            Arc::clone(&auth),
            Arc::clone(&generator),
            Arc::clone(&insights),
            events.clone(),
        ));
        let drafts = Arc::new(DraftService::new(
            Arc::clone(&mail),
            Arc::clone(&generator),
            Arc::clone(&insights),
            Arc::clone(&scheduler),
            events.clone(),
            settings.drafts.clone(),
        ));
        let mailbox = Arc::new(EmailService::new(
            mail,
            Arc::clone(&scheduler),
            events.clone(),
        ));
        let digest = Arc::new(DigestService::new(
            Arc::clone(&scheduler),
            Arc::clone(&insights),
            generator,
        ));

        Self {
            settings,
            events,
            auth,
            scheduler,
            insights,
            enrichment,
            drafts,
            mailbox,
            digest,
            ai_configured,
        }
    }

    /// Reads the model API key from the keychain, then the environment.
    async fn resolve_api_key(keychain: &KeychainAccess, entry: &str) -> Option<String> {
        match keychain.retrieve(entry).await {
            Ok(Some(key)) if !key.trim().is_empty() => return Some(key),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not read API key from keychain"),
        }

        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Some(key),
            _ => {
                tracing::info!("no API key configured, AI insights disabled");
                None
            }
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn auth(&self) -> &Arc<AuthEngine> {
        &self.auth
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn insights(&self) -> &Arc<InsightStore> {
        &self.insights
    }

    pub fn enrichment(&self) -> &Arc<EnrichmentQueue> {
        &self.enrichment
    }

    pub fn drafts(&self) -> &Arc<DraftService> {
        &self.drafts
    }

    pub fn mailbox(&self) -> &Arc<EmailService> {
        &self.mailbox
    }

    pub fn digest(&self) -> &Arc<DigestService> {
        &self.digest
    }

    /// Returns true when a language model is available for insights.
    pub fn ai_configured(&self) -> bool {
        self.ai_configured
    }

    /// Restores or establishes a session, starts the background loops and
    /// runs until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        self.events.subscribe(log_event);

        let restored = self
            .auth
            .restore()
            .await
            .context("loading stored credentials")?;
        if !restored {
            tracing::info!("no saved session, starting authorization");
            self.auth.authorize().await.context("authorization failed")?;
        }

        let sync_loop = Arc::clone(&self.scheduler).start();
        let enrichment_loop = if self.ai_configured {
            Some(Arc::clone(&self.enrichment).start())
        } else {
            None
        };

        tracing::info!("running, press Ctrl-C to exit");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;

        tracing::info!("shutting down");
        sync_loop.abort();
        if let Some(handle) = enrichment_loop {
            handle.abort();
        }
        Ok(())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("state", &self.auth.state())
            .field("ai_configured", &self.ai_configured)
            .finish_non_exhaustive()
    }
}

fn log_event(event: &AppEvent) {
    match event {
        AppEvent::AuthStateChanged { from, to } => tracing::info!(%from, %to, "session state"),
        AppEvent::SyncStarted { trigger } => tracing::debug!(%trigger, "sync started"),
        AppEvent::SnapshotReplaced { count } => tracing::info!(count, "inbox refreshed"),
        AppEvent::SyncFailed { error } => tracing::warn!(%error, "inbox refresh failed"),
        AppEvent::InsightReady { email_id } => tracing::info!(%email_id, "insight ready"),
        AppEvent::InsightFailed { email_id, error } => {
            tracing::warn!(%email_id, %error, "insight failed")
        }
        AppEvent::MessageArchived(email_id) => tracing::info!(%email_id, "archived"),
        AppEvent::MessageTrashed(email_id) => tracing::info!(%email_id, "trashed"),
        AppEvent::DraftStateChanged { email_id, state } => {
            tracing::debug!(%email_id, ?state, "draft state")
        }
        AppEvent::ReplySent { email_id } => tracing::info!(%email_id, "reply sent"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::StaticAuthorizer;
    use crate::auth::AuthState;
    use crate::gateway::testing::ScriptedTransport;
    use crate::storage::MemoryCredentialStore;

    fn app(llm: Option<Arc<dyn LlmProvider>>) -> App {
        App::with_parts(
            Settings::default(),
            Arc::new(ScriptedTransport::new()),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(StaticAuthorizer::denied()),
            llm,
        )
    }

    #[test]
    fn wires_signed_out_app() {
        let app = app(None);
        assert_eq!(app.auth().state(), AuthState::Unauthenticated);
        assert!(!app.ai_configured());
    }

    #[test]
    fn model_enables_ai() {
        let llm = Arc::new(OpenAiCompatibleProvider::new(
            "http://localhost:11434/v1",
            None,
            "llama3",
        )) as Arc<dyn LlmProvider>;
        assert!(app(Some(llm)).ai_configured());
    }

    #[tokio::test]
    async fn auth_transitions_reach_the_shared_bus() {
        let app = app(None);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        app.events().subscribe({
            let seen = Arc::clone(&seen);
            move |event| seen.lock().unwrap().push(event.clone())
        });

        let _ = app.auth().authorize().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AppEvent::AuthStateChanged {
                    from: AuthState::Unauthenticated,
                    to: AuthState::Authorizing,
                },
                AppEvent::AuthStateChanged {
                    from: AuthState::Authorizing,
                    to: AuthState::Unauthenticated,
                },
            ]
        );
    }
}
