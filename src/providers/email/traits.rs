//! Mail provider trait definition.
//!
//! [`MailProvider`] is the boundary to the mail service's REST API. All
//! implementations report failures through the crate error taxonomy so the
//! services above can react to authorization failures uniformly.

use async_trait::async_trait;

use crate::domain::{Address, DraftId, EmailId, Message, MessageId, ThreadId};
use crate::error::Result;

/// An outbound reply, either saved as a draft or sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    /// Recipient (the original sender).
    pub to: Address,
    /// Normalized "Re:" subject.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Conversation to thread into.
    pub thread_id: ThreadId,
    /// Message-ID of the message being answered.
    pub in_reply_to: Option<MessageId>,
}

impl OutgoingReply {
    /// Builds the reply envelope for `message`.
    ///
    /// Fails with [`crate::Error::UnparseableSender`] when the sender header
    /// carries no address.
    pub fn to_message(message: &Message, body: impl Into<String>) -> Result<Self> {
        Ok(Self {
            to: message.reply_address()?,
            subject: message.reply_subject(),
            body: body.into(),
            thread_id: message.thread_id.clone(),
            in_reply_to: message.message_id.clone(),
        })
    }
}

/// The mail service boundary.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Ids of the newest `max_results` messages carrying `mailbox`.
    async fn list_message_ids(&self, mailbox: &str, max_results: u32) -> Result<Vec<EmailId>>;

    /// Fetches one message in full.
    async fn get_message(&self, id: &EmailId) -> Result<Message>;

    /// Removes the message from the inbox.
    async fn archive(&self, id: &EmailId) -> Result<()>;

    /// Moves the message to trash.
    async fn trash(&self, id: &EmailId) -> Result<()>;

    /// Creates a provider-side draft and returns its id.
    async fn create_draft(&self, reply: &OutgoingReply) -> Result<DraftId>;

    /// Overwrites an existing draft.
    async fn update_draft(&self, draft_id: &DraftId, reply: &OutgoingReply) -> Result<DraftId>;

    /// Sends a new message. Returns the sent message's id.
    async fn send_message(&self, reply: &OutgoingReply) -> Result<EmailId>;
}
