//! Mailbox actions on inbox messages.

use std::sync::Arc;

use super::sync_service::{SyncScheduler, SyncTrigger};
use crate::app::{AppEvent, EventBus};
use crate::domain::EmailId;
use crate::error::Result;
use crate::providers::email::MailProvider;

/// Archive and trash, each followed by a resync so the snapshot reflects
/// the new server state.
pub struct EmailService {
    mail: Arc<dyn MailProvider>,
    scheduler: Arc<SyncScheduler>,
    events: EventBus,
}

impl EmailService {
    /// Creates the service.
    pub fn new(mail: Arc<dyn MailProvider>, scheduler: Arc<SyncScheduler>, events: EventBus) -> Self {
        Self {
            mail,
            scheduler,
            events,
        }
    }

    /// Archives a message by removing it from the inbox.
    ///
    /// Archived messages remain accessible in All Mail.
    pub async fn archive(&self, id: &EmailId) -> Result<()> {
        self.mail.archive(id).await?;
        tracing::info!(email_id = %id, "message archived");
        self.events.publish(AppEvent::MessageArchived(id.clone()));
        self.resync().await;
        Ok(())
    }

    /// Moves a message to the trash.
    pub async fn trash(&self, id: &EmailId) -> Result<()> {
        self.mail.trash(id).await?;
        tracing::info!(email_id = %id, "message trashed");
        self.events.publish(AppEvent::MessageTrashed(id.clone()));
        self.resync().await;
        Ok(())
    }

    // The action already succeeded; a failed resync is picked up by the
    // next interval tick.
    async fn resync(&self) {
        if let Err(e) = self.scheduler.sync_now(SyncTrigger::Action).await {
            tracing::warn!(error = %e, "resync after mailbox action failed");
        }
    }
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailService").finish_non_exhaustive()
    }
}
