//! Insight domain types.
//!
//! An [`Insight`] is the structured enrichment produced for one message.
//! Payloads coming back from a language model are untrusted; they are parsed
//! into [`RawInsight`] and only become an [`Insight`] after validation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Lowest accepted priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 10;

/// Triage category of a message. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(alias = "urgent", alias = "URGENT")]
    Urgent,
    #[serde(alias = "Action Needed", alias = "action_needed", alias = "ACTION_NEEDED")]
    ActionNeeded,
    #[serde(
        alias = "Waiting on Others",
        alias = "Waiting On Others",
        alias = "waiting_on_others",
        alias = "WAITING_ON_OTHERS"
    )]
    WaitingOnOthers,
    #[serde(alias = "fyi", alias = "Fyi")]
    FYI,
}

impl Category {
    /// All categories in display order.
    pub const ALL: [Category; 4] = [
        Category::Urgent,
        Category::ActionNeeded,
        Category::WaitingOnOthers,
        Category::FYI,
    ];

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Urgent => "Urgent",
            Category::ActionNeeded => "Action Needed",
            Category::WaitingOnOthers => "Waiting on Others",
            Category::FYI => "FYI",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Validated structured insight for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    /// One or two sentence summary.
    pub summary: String,
    /// Triage category.
    pub category: Category,
    /// Priority from 1 (lowest) to 10 (highest).
    pub priority: u8,
    /// Concrete things the reader has to do.
    pub action_items: Vec<String>,
    /// Dates or deadlines mentioned in the message.
    pub deadlines: Vec<String>,
    /// Key facts worth remembering.
    pub key_points: Vec<String>,
}

impl Insight {
    /// Parses and validates a model response.
    ///
    /// Tolerates a surrounding Markdown code fence; everything else must
    /// match the schema exactly.
    pub fn from_model_output(text: &str) -> Result<Self> {
        let json = strip_code_fence(text);
        let raw: RawInsight = serde_json::from_str(json)
            .map_err(|e| Error::MalformedResponse(format!("insight payload: {}", e)))?;
        raw.validate()
    }
}

/// Unvalidated insight payload as returned by the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInsight {
    summary: Option<String>,
    category: Option<serde_json::Value>,
    priority: Option<serde_json::Value>,
    #[serde(default, alias = "action_items")]
    action_items: Option<Vec<String>>,
    #[serde(default)]
    deadlines: Option<Vec<String>>,
    #[serde(default, alias = "key_points")]
    key_points: Option<Vec<String>>,
}

impl RawInsight {
    /// Checks required fields, the closed category enum and priority bounds.
    pub fn validate(self) -> Result<Insight> {
        let summary = self
            .summary
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::MalformedResponse("missing summary".to_string()))?;

        let category_value = self
            .category
            .ok_or_else(|| Error::MalformedResponse("missing category".to_string()))?;
        let category: Category = serde_json::from_value(category_value.clone()).map_err(|_| {
            Error::MalformedResponse(format!("unknown category {}", category_value))
        })?;

        let priority = self
            .priority
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| Error::MalformedResponse("priority must be an integer".to_string()))?;
        if !(u64::from(MIN_PRIORITY)..=u64::from(MAX_PRIORITY)).contains(&priority) {
            return Err(Error::MalformedResponse(format!(
                "priority {} outside {}..={}",
                priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }

        Ok(Insight {
            summary: summary.trim().to_string(),
            category,
            priority: priority as u8,
            action_items: self
                .action_items
                .ok_or_else(|| Error::MalformedResponse("missing actionItems".to_string()))?,
            deadlines: self.deadlines.unwrap_or_default(),
            key_points: self.key_points.unwrap_or_default(),
        })
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Enrichment progress for one message.
///
/// A message with no entry at all has not been picked up yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentStatus {
    /// A request for this message is outstanding.
    InFlight,
    /// Enrichment finished.
    Ready(Insight),
    /// Enrichment failed; not retried automatically.
    Failed(String),
}

impl EnrichmentStatus {
    /// Returns the insight if enrichment finished.
    pub fn insight(&self) -> Option<&Insight> {
        match self {
            EnrichmentStatus::Ready(insight) => Some(insight),
            _ => None,
        }
    }
}
