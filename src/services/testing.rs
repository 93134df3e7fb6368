//! In-memory collaborators for service tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use super::{DigestEntry, InsightGenerator};
use crate::app::EventBus;
use crate::auth::testing::{engine_on, engine_with, StaticAuthorizer};
use crate::auth::AuthEngine;
use crate::domain::{Category, DraftId, EmailId, Insight, Message, MessageId, ThreadId};
use crate::error::{Error, Result};
use crate::gateway::testing::ScriptedTransport;
use crate::providers::email::{MailProvider, OutgoingReply};
use crate::storage::{CredentialRecord, MemoryCredentialStore};

pub fn message(id: &str) -> Message {
    Message {
        id: EmailId::from(id),
        thread_id: ThreadId::from(format!("thread-{}", id)),
        message_id: Some(MessageId::from(format!("<{}@mail.example.com>", id))),
        subject: format!("Subject {}", id),
        sender: "Jane Doe <jane@example.com>".to_string(),
        snippet: format!("Snippet {}", id),
        body: format!("Body of {}", id),
        received_at: Utc::now(),
    }
}

pub fn insight(priority: u8, category: Category) -> Insight {
    Insight {
        summary: "A summary.".to_string(),
        category,
        priority,
        action_items: vec![],
        deadlines: vec![],
        key_points: vec![],
    }
}

pub async fn authorized_engine() -> Arc<AuthEngine> {
    authorized_engine_on(EventBus::new()).await
}

/// Restored engine publishing its state changes on `events`.
pub async fn authorized_engine_on(events: EventBus) -> Arc<AuthEngine> {
    let store = Arc::new(MemoryCredentialStore::with_record(CredentialRecord::new(
        "access-1",
        Some("refresh-1".to_string()),
        "me@example.com",
    )));
    let engine = engine_on(
        Arc::new(ScriptedTransport::new()),
        store,
        Arc::new(StaticAuthorizer::denied()),
        events,
    );
    engine.restore().await.unwrap();
    Arc::new(engine)
}

pub fn signed_out_engine() -> Arc<AuthEngine> {
    Arc::new(engine_with(
        Arc::new(ScriptedTransport::new()),
        Arc::new(MemoryCredentialStore::new()),
    ))
}

#[derive(Default)]
struct MailState {
    ids: Vec<String>,
    list_calls: usize,
    fail_next_list: Option<Error>,
    fail_get: HashMap<String, Error>,
    fail_next_write: Option<Error>,
    created: Vec<OutgoingReply>,
    updated: Vec<(DraftId, OutgoingReply)>,
    sent: Vec<OutgoingReply>,
    archived: Vec<EmailId>,
    trashed: Vec<EmailId>,
}

/// Mail provider serving synthetic messages and recording writes.
#[derive(Default)]
pub struct FakeMail {
    state: Mutex<MailState>,
    hold: Mutex<Option<Arc<Notify>>>,
    write_delay: Mutex<Option<Duration>>,
}

impl FakeMail {
    pub fn with_messages(ids: &[&str]) -> Self {
        let fake = Self::default();
        fake.set_messages(ids);
        fake
    }

    pub fn set_messages(&self, ids: &[&str]) {
        self.state.lock().unwrap().ids = ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn fail_get(&self, id: &str, error: Error) {
        self.state.lock().unwrap().fail_get.insert(id.to_string(), error);
    }

    pub fn fail_next_list(&self, error: Error) {
        self.state.lock().unwrap().fail_next_list = Some(error);
    }

    pub fn fail_next_write(&self, error: Error) {
        self.state.lock().unwrap().fail_next_write = Some(error);
    }

    /// Makes the next listing wait until the returned notify fires.
    pub fn hold_listing(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    /// Delays every draft write by `delay`.
    pub fn slow_draft_writes(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn created(&self) -> Vec<OutgoingReply> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn updated(&self) -> Vec<(DraftId, OutgoingReply)> {
        self.state.lock().unwrap().updated.clone()
    }

    pub fn sent(&self) -> Vec<OutgoingReply> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn archived(&self) -> Vec<EmailId> {
        self.state.lock().unwrap().archived.clone()
    }

    pub fn trashed(&self) -> Vec<EmailId> {
        self.state.lock().unwrap().trashed.clone()
    }

    pub fn write_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.created.len()
            + state.updated.len()
            + state.sent.len()
            + state.archived.len()
            + state.trashed.len()
    }

    async fn write_pause(&self) {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_write_failure(&self) -> Result<()> {
        match self.state.lock().unwrap().fail_next_write.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MailProvider for FakeMail {
    async fn list_message_ids(&self, _mailbox: &str, max_results: u32) -> Result<Vec<EmailId>> {
        let hold = self.hold.lock().unwrap().take();
        if let Some(notify) = hold {
            notify.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if let Some(error) = state.fail_next_list.take() {
            return Err(error);
        }
        Ok(state
            .ids
            .iter()
            .take(max_results as usize)
            .map(|id| EmailId::from(id.as_str()))
            .collect())
    }

    async fn get_message(&self, id: &EmailId) -> Result<Message> {
        match self.state.lock().unwrap().fail_get.get(&id.0) {
            Some(error) => Err(error.clone()),
            None => Ok(message(&id.0)),
        }
    }

    async fn archive(&self, id: &EmailId) -> Result<()> {
        self.take_write_failure()?;
        self.state.lock().unwrap().archived.push(id.clone());
        Ok(())
    }

    async fn trash(&self, id: &EmailId) -> Result<()> {
        self.take_write_failure()?;
        self.state.lock().unwrap().trashed.push(id.clone());
        Ok(())
    }

    async fn create_draft(&self, reply: &OutgoingReply) -> Result<DraftId> {
        self.write_pause().await;
        self.take_write_failure()?;
        let mut state = self.state.lock().unwrap();
        state.created.push(reply.clone());
        Ok(DraftId::from(format!("draft-{}", state.created.len())))
    }

    async fn update_draft(&self, draft_id: &DraftId, reply: &OutgoingReply) -> Result<DraftId> {
        self.write_pause().await;
        self.take_write_failure()?;
        self.state
            .lock()
            .unwrap()
            .updated
            .push((draft_id.clone(), reply.clone()));
        Ok(draft_id.clone())
    }

    async fn send_message(&self, reply: &OutgoingReply) -> Result<EmailId> {
        self.take_write_failure()?;
        let mut state = self.state.lock().unwrap();
        state.sent.push(reply.clone());
        Ok(EmailId::from(format!("sent-{}", state.sent.len())))
    }
}

/// Generator that records concurrency and answers deterministically.
#[derive(Default)]
pub struct FakeGenerator {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl FakeGenerator {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InsightGenerator for FakeGenerator {
    async fn generate_insight(&self, message: &Message) -> Result<Insight> {
        self.enter().await;
        let failing = self.failing.lock().unwrap().contains(&message.id.0);
        self.leave();
        if failing {
            return Err(Error::MalformedResponse("unknown category \"Spam\"".into()));
        }
        Ok(insight(5, Category::FYI))
    }

    async fn compose_reply(&self, message: &Message, insight: Option<&Insight>) -> Result<String> {
        self.enter().await;
        let failing = self.failing.lock().unwrap().contains(&message.id.0);
        self.leave();
        if failing {
            return Err(Error::Provider("model overloaded".into()));
        }
        Ok(match insight {
            Some(insight) => format!("Re {}: {}", message.id, insight.summary),
            None => format!("Reply to {}", message.id),
        })
    }

    async fn compose_digest(&self, entries: &[DigestEntry]) -> Result<String> {
        self.enter().await;
        self.leave();
        Ok(format!("{} messages", entries.len()))
    }
}
