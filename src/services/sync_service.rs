//! Sync scheduler for the inbox snapshot.
//!
//! The [`SyncScheduler`] keeps one authoritative, wholesale-replaced snapshot
//! of the newest messages in the configured mailbox. Cycles are triggered on
//! (re)authorization, on a fixed interval while authorized, and on demand
//! after mutating actions.
//!
//! At most one cycle is in flight; a trigger that arrives while a cycle runs
//! is dropped rather than queued.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::app::{AppEvent, EventBus};
use crate::auth::{AuthEngine, AuthState};
use crate::config::SyncSettings;
use crate::domain::{EmailId, Message};
use crate::error::{Error, Result};
use crate::providers::email::MailProvider;

/// Why a sync cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// The session (re)entered `Authorized`.
    Authorized,
    /// The periodic timer fired.
    Interval,
    /// A mutating action (archive, trash, send) completed.
    Action,
    /// Explicit user request.
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncTrigger::Authorized => "authorized",
            SyncTrigger::Interval => "interval",
            SyncTrigger::Action => "action",
            SyncTrigger::Manual => "manual",
        })
    }
}

/// Result of a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new snapshot with this many messages was published.
    Replaced { count: usize },
    /// Another cycle was already running; this trigger was dropped.
    Skipped,
}

/// Releases the in-flight flag when a cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the inbox snapshot fresh.
///
/// # Example
///
/// ```ignore
/// let scheduler = Arc::new(SyncScheduler::new(mail, auth, settings.sync, events));
/// let handle = Arc::clone(&scheduler).start();
///
/// // After archiving:
/// scheduler.sync_now(SyncTrigger::Action).await?;
/// ```
pub struct SyncScheduler {
    mail: Arc<dyn MailProvider>,
    auth: Arc<AuthEngine>,
    settings: SyncSettings,
    events: EventBus,
    snapshot: RwLock<Arc<Vec<Message>>>,
    last_synced_at: RwLock<Option<DateTime<Utc>>>,
    in_flight: AtomicBool,
}

impl SyncScheduler {
    /// Creates a scheduler with an empty snapshot.
    pub fn new(
        mail: Arc<dyn MailProvider>,
        auth: Arc<AuthEngine>,
        settings: SyncSettings,
        events: EventBus,
    ) -> Self {
        Self {
            mail,
            auth,
            settings,
            events,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            last_synced_at: RwLock::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// The current snapshot, newest first.
    pub async fn snapshot(&self) -> Arc<Vec<Message>> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Looks a message up in the current snapshot.
    pub async fn find(&self, id: &EmailId) -> Option<Message> {
        self.snapshot
            .read()
            .await
            .iter()
            .find(|message| &message.id == id)
            .cloned()
    }

    /// When the last successful cycle finished.
    pub async fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *self.last_synced_at.read().await
    }

    /// Returns true while a cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs one sync cycle unless another is already in flight.
    ///
    /// A cycle that fails with an authorization error is re-issued once if
    /// the gateway's recovery left the session `Authorized`. On any failure
    /// the previous snapshot stays published.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!(%trigger, "sync already in flight, dropping trigger");
            return Ok(SyncOutcome::Skipped);
        };

        tracing::debug!(%trigger, "sync started");
        self.events.publish(AppEvent::SyncStarted { trigger });

        let result = match self.fetch_snapshot().await {
            Err(e @ (Error::AuthExpired | Error::MissingScopes)) => {
                if self.auth.state() == AuthState::Authorized {
                    tracing::info!(%trigger, "session recovered, re-issuing sync");
                    self.fetch_snapshot().await
                } else {
                    Err(e)
                }
            }
            other => other,
        };

        match result {
            Ok(messages) => {
                let count = messages.len();
                *self.snapshot.write().await = Arc::new(messages);
                *self.last_synced_at.write().await = Some(Utc::now());
                tracing::info!(%trigger, count, "snapshot replaced");
                self.events.publish(AppEvent::SnapshotReplaced { count });
                Ok(SyncOutcome::Replaced { count })
            }
            Err(e) => {
                tracing::warn!(%trigger, error = %e, "sync failed");
                self.events.publish(AppEvent::SyncFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Lists the page of ids, then fetches every message in full.
    ///
    /// Any failed detail fetch fails the whole cycle.
    async fn fetch_snapshot(&self) -> Result<Vec<Message>> {
        let ids = self
            .mail
            .list_message_ids(&self.settings.mailbox, self.settings.page_size)
            .await?;

        let mail = &self.mail;
        let parallelism = (self.settings.page_size as usize).max(1);
        futures::stream::iter(ids)
            .map(|id| async move { mail.get_message(&id).await })
            .buffered(parallelism)
            .try_collect()
            .await
    }

    /// Spawns the trigger loop.
    ///
    /// Syncs whenever the session enters `Authorized` from a signed-out
    /// state, and on every interval tick while authorized. A refresh
    /// (`Authorized -> Refreshing -> Authorized`) is not a new authorization.
    /// The loop ends when the auth engine is dropped.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut state_rx = self.auth.subscribe();
            let period = self.settings.interval();
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut signed_in = false;
            loop {
                let state = *state_rx.borrow_and_update();
                let now_signed_in = matches!(state, AuthState::Authorized | AuthState::Refreshing);
                if state == AuthState::Authorized && !signed_in {
                    self.run_triggered(SyncTrigger::Authorized).await;
                }
                signed_in = now_signed_in;

                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            tracing::debug!("auth engine gone, stopping sync loop");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if self.auth.state() == AuthState::Authorized {
                            self.run_triggered(SyncTrigger::Interval).await;
                        }
                    }
                }
            }
        })
    }

    async fn run_triggered(&self, trigger: SyncTrigger) {
        if let Err(e) = self.sync_now(trigger).await {
            tracing::error!(%trigger, error = %e, "background sync failed");
        }
    }
}

impl fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("mailbox", &self.settings.mailbox)
            .field("page_size", &self.settings.page_size)
            .field("in_flight", &self.is_syncing())
            .finish_non_exhaustive()
    }
}
