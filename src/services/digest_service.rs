//! Derived views over the snapshot and its insights.
//!
//! - [`InsightTally`]: counts per category, high-priority, pending and
//!   errored messages
//! - [`DigestService::generate_digest`]: one model-written summary of the
//!   whole inbox

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::enrichment_service::InsightStore;
use super::insight_generator::{DigestEntry, InsightGenerator};
use super::sync_service::SyncScheduler;
use crate::domain::{Category, EmailId, EnrichmentStatus, Message};
use crate::error::Result;

/// Priority at or above which an insight counts as high priority.
pub const HIGH_PRIORITY: u8 = 8;

/// Counts derived from the snapshot and its insights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsightTally {
    /// Messages in the snapshot.
    pub total: usize,
    /// Enriched messages per category.
    pub by_category: HashMap<Category, usize>,
    /// Enriched messages with priority >= [`HIGH_PRIORITY`].
    pub high_priority: usize,
    /// Messages not enriched yet (including in flight).
    pub pending: usize,
    /// Messages whose enrichment failed.
    pub errored: usize,
}

impl InsightTally {
    /// Tallies `messages` against their enrichment status.
    pub fn compute(messages: &[Message], statuses: &HashMap<EmailId, EnrichmentStatus>) -> Self {
        let mut tally = Self {
            total: messages.len(),
            ..Self::default()
        };

        for message in messages {
            match statuses.get(&message.id) {
                Some(EnrichmentStatus::Ready(insight)) => {
                    *tally.by_category.entry(insight.category).or_default() += 1;
                    if insight.priority >= HIGH_PRIORITY {
                        tally.high_priority += 1;
                    }
                }
                Some(EnrichmentStatus::Failed(_)) => tally.errored += 1,
                Some(EnrichmentStatus::InFlight) | None => tally.pending += 1,
            }
        }
        tally
    }

    /// Enriched messages in `category`.
    pub fn count(&self, category: Category) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}

/// Builds tallies and digests from live state.
pub struct DigestService {
    scheduler: Arc<SyncScheduler>,
    insights: Arc<InsightStore>,
    generator: Arc<dyn InsightGenerator>,
}

impl DigestService {
    /// Creates the service.
    pub fn new(
        scheduler: Arc<SyncScheduler>,
        insights: Arc<InsightStore>,
        generator: Arc<dyn InsightGenerator>,
    ) -> Self {
        Self {
            scheduler,
            insights,
            generator,
        }
    }

    /// Tally of the current snapshot.
    pub async fn tally(&self) -> InsightTally {
        let snapshot = self.scheduler.snapshot().await;
        InsightTally::compute(&snapshot, &self.insights.all().await)
    }

    /// Asks the model for a digest of the current snapshot.
    pub async fn generate_digest(&self) -> Result<String> {
        let snapshot = self.scheduler.snapshot().await;
        let statuses = self.insights.all().await;
        let entries: Vec<DigestEntry> = snapshot
            .iter()
            .map(|message| DigestEntry {
                message: message.clone(),
                insight: statuses
                    .get(&message.id)
                    .and_then(|status| status.insight().cloned()),
            })
            .collect();

        tracing::debug!(count = entries.len(), "generating digest");
        self.generator.compose_digest(&entries).await
    }
}

impl std::fmt::Debug for DigestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestService").finish_non_exhaustive()
    }
}
