//! Domain layer types.
//!
//! This module contains the core domain types shared by the sync, enrichment
//! and draft services: messages, insights, reply drafts and their identifiers.

mod draft;
mod insight;
mod message;
mod types;

pub use draft::{Draft, DraftState};
pub use insight::{
    Category, EnrichmentStatus, Insight, RawInsight, MAX_PRIORITY, MIN_PRIORITY,
};
pub use message::{normalize_reply_subject, Address, Message};
pub use types::{DraftId, EmailId, MessageId, ThreadId};
