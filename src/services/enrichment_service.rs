//! Enrichment queue.
//!
//! Walks the inbox snapshot in order and enriches the first message that has
//! neither an insight nor an outstanding request. Exactly one enrichment call
//! is outstanding at any time, system-wide. Failures are recorded per message
//! and never retried automatically. Nothing is claimed while the session is
//! not authorized; the loop resumes once authorization completes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use super::insight_generator::InsightGenerator;
use super::sync_service::SyncScheduler;
use crate::app::{AppEvent, EventBus, SubscriberId};
use crate::auth::{AuthEngine, AuthState};
use crate::domain::{EmailId, EnrichmentStatus, Insight, Message};

/// Enrichment status per message id.
///
/// A missing entry means the message has not been picked up yet.
#[derive(Debug, Default)]
pub struct InsightStore {
    entries: RwLock<HashMap<EmailId, EnrichmentStatus>>,
}

impl InsightStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of one message.
    pub async fn status(&self, id: &EmailId) -> Option<EnrichmentStatus> {
        self.entries.read().await.get(id).cloned()
    }

    /// The finished insight for one message.
    pub async fn insight(&self, id: &EmailId) -> Option<Insight> {
        self.entries
            .read()
            .await
            .get(id)
            .and_then(|status| status.insight().cloned())
    }

    /// Copy of every entry.
    pub async fn all(&self) -> HashMap<EmailId, EnrichmentStatus> {
        self.entries.read().await.clone()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true when nothing has been picked up yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Marks `id` in flight unless it already has an entry.
    async fn claim(&self, id: &EmailId) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(id) {
            return false;
        }
        entries.insert(id.clone(), EnrichmentStatus::InFlight);
        true
    }

    async fn set(&self, id: EmailId, status: EnrichmentStatus) {
        self.entries.write().await.insert(id, status);
    }

    async fn remove(&self, id: &EmailId) {
        self.entries.write().await.remove(id);
    }
}

/// Serial background enrichment over the current snapshot.
pub struct EnrichmentQueue {
    scheduler: Arc<SyncScheduler>,
    auth: Arc<AuthEngine>,
    generator: Arc<dyn InsightGenerator>,
    store: Arc<InsightStore>,
    events: EventBus,
    gate: Mutex<()>,
    wake: Arc<Notify>,
}

impl EnrichmentQueue {
    /// Creates a queue reading from `scheduler` and writing into `store`.
    pub fn new(
        scheduler: Arc<SyncScheduler>,
        auth: Arc<AuthEngine>,
        generator: Arc<dyn InsightGenerator>,
        store: Arc<InsightStore>,
        events: EventBus,
    ) -> Self {
        Self {
            scheduler,
            auth,
            generator,
            store,
            events,
            gate: Mutex::new(()),
            wake: Arc::new(Notify::new()),
        }
    }

    /// The store this queue writes into.
    pub fn store(&self) -> &Arc<InsightStore> {
        &self.store
    }

    async fn next_candidate(&self) -> Option<Message> {
        let snapshot = self.scheduler.snapshot().await;
        let entries = self.store.entries.read().await;
        snapshot
            .iter()
            .find(|message| !entries.contains_key(&message.id))
            .cloned()
    }

    /// Enriches the next pending message, if any.
    ///
    /// Returns the id that was processed, whether it succeeded or failed.
    /// Returns `None` without claiming anything while the session is not
    /// authorized.
    pub async fn enrich_next(&self) -> Option<EmailId> {
        let _gate = self.gate.lock().await;

        let state = self.auth.state();
        if !state.is_authorized() {
            tracing::debug!(%state, "session not authorized, enrichment suspended");
            return None;
        }

        let message = self.next_candidate().await?;
        if !self.store.claim(&message.id).await {
            return None;
        }
        let id = message.id.clone();
        tracing::debug!(email_id = %id, "enriching");

        let result = self.generator.generate_insight(&message).await;

        // The snapshot may have been replaced while the request was out.
        if self.scheduler.find(&id).await.is_none() {
            tracing::debug!(email_id = %id, "message left the snapshot, dropping result");
            self.store.remove(&id).await;
            return Some(id);
        }

        match result {
            Ok(insight) => {
                tracing::debug!(email_id = %id, category = %insight.category, priority = insight.priority, "insight ready");
                self.store
                    .set(id.clone(), EnrichmentStatus::Ready(insight))
                    .await;
                self.events.publish(AppEvent::InsightReady {
                    email_id: id.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(email_id = %id, error = %e, "enrichment failed");
                self.store
                    .set(id.clone(), EnrichmentStatus::Failed(e.to_string()))
                    .await;
                self.events.publish(AppEvent::InsightFailed {
                    email_id: id.clone(),
                    error: e.to_string(),
                });
            }
        }
        Some(id)
    }

    /// Enriches pending messages until none are left. Returns how many were
    /// processed.
    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.enrich_next().await.is_some() {
            processed += 1;
        }
        processed
    }

    /// Spawns the background loop.
    ///
    /// The loop drains the queue and then sleeps until the snapshot is
    /// replaced, an insight lands or the session becomes authorized. Its
    /// event subscription is removed when the task ends or is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let wake = Arc::clone(&self.wake);
        let id = self.events.subscribe(move |event| {
            if matches!(
                event,
                AppEvent::SnapshotReplaced { .. }
                    | AppEvent::InsightReady { .. }
                    | AppEvent::InsightFailed { .. }
                    | AppEvent::AuthStateChanged {
                        to: AuthState::Authorized,
                        ..
                    }
            ) {
                wake.notify_one();
            }
        });
        let subscription = Subscription {
            events: self.events.clone(),
            id,
        };

        tokio::spawn(async move {
            let _subscription = subscription;
            loop {
                let processed = self.run_until_idle().await;
                if processed > 0 {
                    tracing::info!(count = processed, "enrichment pass finished");
                }
                self.wake.notified().await;
            }
        })
    }
}

/// Unsubscribes from the bus when dropped.
struct Subscription {
    events: EventBus,
    id: SubscriberId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.events.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for EnrichmentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::error::Error;
    use crate::services::testing::{authorized_engine, authorized_engine_on, FakeGenerator, FakeMail};
    use crate::services::SyncTrigger;
    use std::time::Duration;

    struct Synced {
        mail: Arc<FakeMail>,
        scheduler: Arc<SyncScheduler>,
        auth: Arc<AuthEngine>,
    }

    async fn synced(ids: &[&str]) -> Synced {
        let mail = Arc::new(FakeMail::with_messages(ids));
        let auth = authorized_engine().await;
        let scheduler = Arc::new(SyncScheduler::new(
            mail.clone(),
            Arc::clone(&auth),
            SyncSettings::default(),
            EventBus::new(),
        ));
        scheduler.sync_now(SyncTrigger::Manual).await.unwrap();
        Synced {
            mail,
            scheduler,
            auth,
        }
    }

    fn queue(synced: &Synced, generator: Arc<FakeGenerator>) -> EnrichmentQueue {
        EnrichmentQueue::new(
            Arc::clone(&synced.scheduler),
            Arc::clone(&synced.auth),
            generator,
            Arc::new(InsightStore::new()),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn enriches_every_message_serially() {
        let synced = synced(&["m1", "m2", "m3"]).await;
        let generator = Arc::new(FakeGenerator::default());
        let queue = Arc::new(queue(&synced, Arc::clone(&generator)));

        // Two drivers racing must still produce one call at a time.
        let other = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.run_until_idle().await }
        });
        let here = queue.run_until_idle().await;
        let there = other.await.unwrap();

        assert_eq!(here + there, 3);
        assert_eq!(generator.calls(), 3);
        assert_eq!(generator.max_concurrent(), 1);
        assert_eq!(queue.store().len().await, 3);
        for id in ["m1", "m2", "m3"] {
            assert!(queue.store().insight(&EmailId::from(id)).await.is_some());
        }
    }

    #[tokio::test]
    async fn follows_snapshot_order() {
        let synced = synced(&["m1", "m2"]).await;
        let queue = queue(&synced, Arc::new(FakeGenerator::default()));

        assert_eq!(queue.enrich_next().await, Some(EmailId::from("m1")));
        assert_eq!(queue.enrich_next().await, Some(EmailId::from("m2")));
        assert_eq!(queue.enrich_next().await, None);
    }

    #[tokio::test]
    async fn failure_is_recorded_and_queue_moves_on() {
        let synced = synced(&["m1", "m2"]).await;
        let generator = Arc::new(FakeGenerator::default());
        generator.fail_for("m1");
        let queue = queue(&synced, Arc::clone(&generator));

        assert_eq!(queue.run_until_idle().await, 2);

        assert!(matches!(
            queue.store().status(&EmailId::from("m1")).await,
            Some(EnrichmentStatus::Failed(_))
        ));
        assert!(queue.store().insight(&EmailId::from("m2")).await.is_some());

        // No automatic retry.
        assert_eq!(queue.run_until_idle().await, 0);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn stale_result_is_dropped() {
        let synced = synced(&["m1"]).await;
        let generator = Arc::new(FakeGenerator::slow(Duration::from_millis(50)));
        let queue = Arc::new(queue(&synced, generator));

        let pending = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.enrich_next().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        synced.mail.set_messages(&["m2"]);
        synced.scheduler.sync_now(SyncTrigger::Manual).await.unwrap();

        assert_eq!(pending.await.unwrap(), Some(EmailId::from("m1")));
        assert!(queue.store().status(&EmailId::from("m1")).await.is_none());
    }

    #[tokio::test]
    async fn publishes_insight_events() {
        let synced = synced(&["m1"]).await;
        let events = EventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        events.subscribe({
            let seen = Arc::clone(&seen);
            move |event| seen.lock().unwrap().push(event.clone())
        });
        let generator = Arc::new(FakeGenerator::default());
        generator.fail_for("m1");
        let queue = EnrichmentQueue::new(
            Arc::clone(&synced.scheduler),
            Arc::clone(&synced.auth),
            generator,
            Arc::new(InsightStore::new()),
            events,
        );

        queue.run_until_idle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![AppEvent::InsightFailed {
                email_id: EmailId::from("m1"),
                error: Error::MalformedResponse("unknown category \"Spam\"".into()).to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn suspended_while_signed_out() {
        let synced = synced(&["m1", "m2"]).await;
        let generator = Arc::new(FakeGenerator::default());
        let queue = queue(&synced, Arc::clone(&generator));

        synced.auth.invalidate().await;

        assert_eq!(synced.auth.state(), AuthState::Unauthenticated);
        assert_eq!(queue.enrich_next().await, None);
        assert_eq!(queue.run_until_idle().await, 0);
        assert_eq!(generator.calls(), 0);
        assert!(queue.store().is_empty().await);

        // Stored credentials survive invalidation.
        assert!(synced.auth.restore().await.unwrap());
        assert_eq!(queue.run_until_idle().await, 2);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn background_loop_resumes_after_authorization() {
        let mail = Arc::new(FakeMail::with_messages(&["m1"]));
        let events = EventBus::new();
        let auth = authorized_engine_on(events.clone()).await;
        let scheduler = Arc::new(SyncScheduler::new(
            mail.clone(),
            Arc::clone(&auth),
            SyncSettings::default(),
            events.clone(),
        ));
        let generator = Arc::new(FakeGenerator::default());
        let store = Arc::new(InsightStore::new());
        let queue = Arc::new(EnrichmentQueue::new(
            Arc::clone(&scheduler),
            Arc::clone(&auth),
            generator.clone(),
            Arc::clone(&store),
            events,
        ));

        // Seed the snapshot, then drop the session before the loop starts.
        scheduler.sync_now(SyncTrigger::Manual).await.unwrap();
        auth.invalidate().await;

        let handle = Arc::clone(&queue).start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(generator.calls(), 0);
        assert!(store.is_empty().await);

        auth.restore().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.insight(&EmailId::from("m1")).await.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn stopping_the_loop_removes_its_subscription() {
        let synced = synced(&["m1"]).await;
        let events = EventBus::new();
        let queue = Arc::new(EnrichmentQueue::new(
            Arc::clone(&synced.scheduler),
            Arc::clone(&synced.auth),
            Arc::new(FakeGenerator::default()),
            Arc::new(InsightStore::new()),
            events.clone(),
        ));

        let first = Arc::clone(&queue).start();
        let second = Arc::clone(&queue).start();
        assert_eq!(events.subscriber_count(), 2);

        first.abort();
        second.abort();
        let _ = first.await;
        let _ = second.await;
        assert_eq!(events.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn background_loop_picks_up_new_snapshots() {
        let mail = Arc::new(FakeMail::with_messages(&["m1"]));
        let events = EventBus::new();
        let auth = authorized_engine().await;
        let scheduler = Arc::new(SyncScheduler::new(
            mail.clone(),
            Arc::clone(&auth),
            SyncSettings::default(),
            events.clone(),
        ));
        let generator = Arc::new(FakeGenerator::default());
        let store = Arc::new(InsightStore::new());
        let queue = Arc::new(EnrichmentQueue::new(
            Arc::clone(&scheduler),
            auth,
            generator.clone(),
            Arc::clone(&store),
            events,
        ));
        let handle = Arc::clone(&queue).start();

        scheduler.sync_now(SyncTrigger::Manual).await.unwrap();
        mail.set_messages(&["m1", "m2"]);
        scheduler.sync_now(SyncTrigger::Manual).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.insight(&EmailId::from("m2")).await.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        handle.abort();

        assert_eq!(generator.calls(), 2);
        assert_eq!(generator.max_concurrent(), 1);
    }
}
