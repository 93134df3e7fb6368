//! Business services layer.
//!
//! Services sit between the composition root and the providers:
//!
//! ```text
//! App (composition root, event bus)
//!          |
//!          v
//!    Services Layer
//!          |
//!          v
//! Gateway -> Providers (mail, language model)
//! ```
//!
//! # Services Overview
//!
//! - [`SyncScheduler`]: keeps the wholesale-replaced inbox snapshot fresh
//! - [`EnrichmentQueue`]: serial background insight generation
//! - [`DraftService`]: reply draft lifecycle (generate, edit, save, send)
//! - [`EmailService`]: archive and trash with resync
//! - [`DigestService`]: tallies and the inbox digest

mod digest_service;
mod draft_service;
mod email_service;
mod enrichment_service;
mod insight_generator;
mod sync_service;

#[cfg(test)]
pub(crate) mod testing;

pub use digest_service::{DigestService, InsightTally, HIGH_PRIORITY};
pub use draft_service::DraftService;
pub use email_service::EmailService;
pub use enrichment_service::{EnrichmentQueue, InsightStore};
pub use insight_generator::{DigestEntry, InsightGenerator, LlmInsightGenerator};
pub use sync_service::{SyncOutcome, SyncScheduler, SyncTrigger};
