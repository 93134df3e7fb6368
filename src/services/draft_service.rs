//! Reply draft lifecycle.
//!
//! One [`Draft`] per message moves through
//! `Empty -> Generating -> Ready -> Editing -> Saving -> Ready -> Sending -> Sent`.
//! Provider steps that fail fall back to the draft's last stable state and
//! record the error on the draft. Authorization failures are surfaced as-is;
//! the user re-invokes the action after reconnecting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::enrichment_service::InsightStore;
use super::insight_generator::InsightGenerator;
use super::sync_service::{SyncScheduler, SyncTrigger};
use crate::app::{AppEvent, EventBus};
use crate::config::DraftSettings;
use crate::domain::{Draft, DraftId, DraftState, EmailId, Message};
use crate::error::{Error, Result};
use crate::providers::email::{MailProvider, OutgoingReply};

/// Owns every reply draft for the session.
///
/// Drafts live in memory only and are dropped with the process.
pub struct DraftService {
    mail: Arc<dyn MailProvider>,
    generator: Arc<dyn InsightGenerator>,
    insights: Arc<InsightStore>,
    scheduler: Arc<SyncScheduler>,
    events: EventBus,
    settings: DraftSettings,
    drafts: RwLock<HashMap<EmailId, Draft>>,
    /// One lock per message so provider writes for a draft never overlap.
    persist_locks: Mutex<HashMap<EmailId, Arc<Mutex<()>>>>,
}

impl DraftService {
    /// Creates a service with no drafts.
    pub fn new(
        mail: Arc<dyn MailProvider>,
        generator: Arc<dyn InsightGenerator>,
        insights: Arc<InsightStore>,
        scheduler: Arc<SyncScheduler>,
        events: EventBus,
        settings: DraftSettings,
    ) -> Self {
        Self {
            mail,
            generator,
            insights,
            scheduler,
            events,
            settings,
            drafts: RwLock::new(HashMap::new()),
            persist_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The draft for a message, if one was started.
    pub async fn draft(&self, id: &EmailId) -> Option<Draft> {
        self.drafts.read().await.get(id).cloned()
    }

    /// Applies `f` to the draft for `id` (creating it empty) and announces
    /// state changes.
    async fn update<F>(&self, id: &EmailId, f: F) -> Draft
    where
        F: FnOnce(&mut Draft),
    {
        let (draft, changed) = {
            let mut drafts = self.drafts.write().await;
            let draft = drafts
                .entry(id.clone())
                .or_insert_with(|| Draft::new(id.clone()));
            let before = draft.state;
            f(draft);
            (draft.clone(), before != draft.state)
        };

        if changed {
            tracing::debug!(email_id = %id, state = ?draft.state, "draft state changed");
            self.events.publish(AppEvent::DraftStateChanged {
                email_id: id.clone(),
                state: draft.state,
            });
        }
        draft
    }

    /// Records a failed step and falls back to the stable state.
    async fn fail(&self, id: &EmailId, error: &Error) {
        tracing::warn!(email_id = %id, error = %error, "draft step failed");
        let message = error.to_string();
        self.update(id, move |draft| {
            draft.state = draft.stable_state();
            draft.last_error = Some(message);
        })
        .await;
    }

    /// Generates a reply for `message` and, unless disabled in settings,
    /// persists it right away as a provider draft threaded to the message.
    pub async fn generate(&self, message: &Message) -> Result<Draft> {
        let id = &message.id;
        self.update(id, |draft| draft.state = DraftState::Generating)
            .await;

        let insight = self.insights.insight(id).await;
        let content = match self.generator.compose_reply(message, insight.as_ref()).await {
            Ok(content) => content,
            Err(e) => {
                self.fail(id, &e).await;
                return Err(e);
            }
        };

        let draft = self
            .update(id, |draft| {
                draft.content = content;
                draft.dirty = false;
                draft.state = DraftState::Ready;
                draft.last_error = None;
            })
            .await;
        tracing::info!(email_id = %id, "reply generated");

        if !self.settings.persist_on_generate {
            return Ok(draft);
        }

        // Nothing has been saved yet, so a failed persist leaves unsaved
        // content behind.
        match self.persist(message).await {
            Ok(draft) => Ok(draft),
            Err(e) => {
                self.update(id, |draft| draft.dirty = true).await;
                self.fail(id, &e).await;
                Err(e)
            }
        }
    }

    /// Replaces the draft content with a local edit. Never contacts the
    /// provider.
    pub async fn edit(&self, id: &EmailId, content: impl Into<String>) -> Draft {
        let content = content.into();
        self.update(id, move |draft| {
            draft.content = content;
            draft.dirty = true;
            if !draft.state.is_busy() {
                draft.state = DraftState::Editing;
            }
        })
        .await
    }

    /// Saves the current content as a provider draft.
    ///
    /// The first save creates the draft; later saves overwrite the same
    /// draft id. Blank content fails with [`Error::EmptyDraft`] without a
    /// network call.
    pub async fn save(&self, message: &Message) -> Result<Draft> {
        let id = &message.id;
        if self.draft(id).await.map_or(true, |draft| draft.is_blank()) {
            return Err(Error::EmptyDraft);
        }

        match self.persist(message).await {
            Ok(draft) => Ok(draft),
            Err(e) => {
                self.fail(id, &e).await;
                Err(e)
            }
        }
    }

    /// Writes the current content to the provider.
    ///
    /// Writes for one message are serialized, and the draft is re-read
    /// under the lock, so a second writer sees the id assigned by the first
    /// and updates that draft instead of creating another.
    async fn persist(&self, message: &Message) -> Result<Draft> {
        let id = &message.id;
        let lock = self.persist_lock(id).await;
        let _guard = lock.lock().await;

        let draft = self.draft(id).await.unwrap_or_else(|| Draft::new(id.clone()));
        if draft.is_blank() {
            return Err(Error::EmptyDraft);
        }
        let reply = OutgoingReply::to_message(message, draft.content.clone())?;
        self.update(id, |d| d.state = DraftState::Saving).await;

        let draft_id = match &draft.draft_id {
            Some(existing) => {
                self.mail.update_draft(existing, &reply).await?;
                existing.clone()
            }
            None => self.mail.create_draft(&reply).await?,
        };
        tracing::info!(email_id = %id, draft_id = %draft_id, "draft saved");

        let saved_content = reply.body;
        Ok(self
            .update(id, move |d| {
                d.draft_id = Some(draft_id);
                d.saved_at = Some(Utc::now());
                // Edits made while the save was in flight stay dirty.
                d.dirty = d.content != saved_content;
                d.state = if d.dirty {
                    DraftState::Editing
                } else {
                    DraftState::Ready
                };
                d.last_error = None;
            })
            .await)
    }

    async fn persist_lock(&self, id: &EmailId) -> Arc<Mutex<()>> {
        Arc::clone(self.persist_locks.lock().await.entry(id.clone()).or_default())
    }

    /// Sends the current content as a new message threaded to `message`.
    ///
    /// The saved draft object is left untouched. On success the inbox is
    /// re-synced. Blank content fails with [`Error::EmptyDraft`] without a
    /// network call.
    pub async fn send(&self, message: &Message) -> Result<EmailId> {
        let id = &message.id;
        let draft = self.draft(id).await.unwrap_or_else(|| Draft::new(id.clone()));
        if draft.is_blank() {
            return Err(Error::EmptyDraft);
        }
        let reply = OutgoingReply::to_message(message, draft.content)?;

        self.update(id, |d| d.state = DraftState::Sending).await;
        let sent_id = match self.mail.send_message(&reply).await {
            Ok(sent_id) => sent_id,
            Err(e) => {
                self.fail(id, &e).await;
                return Err(e);
            }
        };

        self.update(id, |d| {
            d.state = DraftState::Sent;
            d.last_error = None;
        })
        .await;
        tracing::info!(email_id = %id, sent_id = %sent_id, "reply sent");
        self.events.publish(AppEvent::ReplySent {
            email_id: id.clone(),
        });

        if let Err(e) = self.scheduler.sync_now(SyncTrigger::Action).await {
            tracing::warn!(email_id = %id, error = %e, "resync after send failed");
        }
        Ok(sent_id)
    }

    /// Provider draft id for a message, if it was saved.
    pub async fn saved_draft_id(&self, id: &EmailId) -> Option<DraftId> {
        self.draft(id).await.and_then(|draft| draft.draft_id)
    }
}

impl std::fmt::Debug for DraftService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
