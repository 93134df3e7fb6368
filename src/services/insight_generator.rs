//! Insight generation on top of a language model.
//!
//! [`InsightGenerator`] is the enrichment collaborator used by the
//! enrichment queue, the reply draft lifecycle and the digest. The bundled
//! [`LlmInsightGenerator`] drives any [`LlmProvider`]; model output is
//! untrusted and validated before it becomes an [`Insight`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AiSettings;
use crate::domain::{Insight, Message};
use crate::error::{Error, Result};
use crate::providers::ai::{LlmProvider, Prompt};

/// Upper bound on body characters sent to the model.
const MAX_BODY_CHARS: usize = 6_000;

const INSIGHT_PROMPT: &str = "You triage email for a busy professional. \
Respond with exactly one JSON object and nothing else, using these keys: \
\"summary\" (one or two sentences), \
\"category\" (one of \"Urgent\", \"ActionNeeded\", \"WaitingOnOthers\", \"FYI\"), \
\"priority\" (integer from 1 to 10, 10 being most important), \
\"actionItems\" (array of strings), \
\"deadlines\" (array of strings), \
\"keyPoints\" (array of strings).";

const REPLY_PROMPT: &str = "You write email replies on behalf of the user. \
Write a concise, friendly plain-text reply to the email below. \
Return only the reply body: no subject line, no placeholders, no signature.";

const DIGEST_PROMPT: &str = "You write a short morning digest of the user's inbox. \
Lead with what needs attention today, then group the rest briefly. \
Use plain text with short bullet points.";

/// One message with its insight, as fed to the digest.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestEntry {
    /// The message.
    pub message: Message,
    /// Its insight, when enrichment finished.
    pub insight: Option<Insight>,
}

/// Produces insights, replies and digests.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    /// Produces a validated insight for `message`.
    async fn generate_insight(&self, message: &Message) -> Result<Insight>;

    /// Writes a reply body for `message`, using its insight when available.
    async fn compose_reply(&self, message: &Message, insight: Option<&Insight>) -> Result<String>;

    /// Summarizes the inbox.
    async fn compose_digest(&self, entries: &[DigestEntry]) -> Result<String>;
}

/// [`InsightGenerator`] backed by an [`LlmProvider`].
///
/// Without a provider (or with AI disabled) every call fails with
/// [`Error::EnrichmentUnavailable`].
pub struct LlmInsightGenerator {
    provider: Option<Arc<dyn LlmProvider>>,
    settings: AiSettings,
}

impl LlmInsightGenerator {
    /// Creates a generator.
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, settings: AiSettings) -> Self {
        Self { provider, settings }
    }

    /// Returns true when completions can be requested.
    pub fn is_configured(&self) -> bool {
        self.settings.enabled && self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<dyn LlmProvider>> {
        match &self.provider {
            Some(provider) if self.settings.enabled => Ok(provider),
            _ => Err(Error::EnrichmentUnavailable),
        }
    }

    fn prompt(&self, instructions: &str, content: String) -> Prompt {
        let prompt =
            Prompt::new(instructions, content).with_temperature(self.settings.temperature);
        match self.settings.max_tokens {
            Some(max_tokens) => prompt.with_max_tokens(max_tokens),
            None => prompt,
        }
    }

    async fn complete(&self, prompt: Prompt) -> Result<String> {
        let provider = self.provider()?;
        let text = provider.complete(&prompt).await?;
        tracing::debug!(model = provider.model(), chars = text.len(), "completion finished");
        Ok(text)
    }
}

/// Renders the parts of a message the model gets to see.
fn describe_message(message: &Message) -> String {
    format!(
        "From: {}\nSubject: {}\nReceived: {}\n\n{}",
        message.sender,
        message.subject,
        message.received_at.to_rfc3339(),
        truncate_chars(&message.body, MAX_BODY_CHARS)
    )
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl InsightGenerator for LlmInsightGenerator {
    async fn generate_insight(&self, message: &Message) -> Result<Insight> {
        let prompt = self
            .prompt(INSIGHT_PROMPT, describe_message(message))
            .expecting_json();
        let text = self.complete(prompt).await?;
        Insight::from_model_output(&text)
    }

    async fn compose_reply(&self, message: &Message, insight: Option<&Insight>) -> Result<String> {
        let mut user = describe_message(message);
        if let Some(insight) = insight {
            user.push_str(&format!("\n\nSummary: {}", insight.summary));
            if !insight.action_items.is_empty() {
                user.push_str(&format!("\nAction items: {}", insight.action_items.join("; ")));
            }
        }

        let text = self.complete(self.prompt(REPLY_PROMPT, user)).await?;
        let reply = text.trim();
        if reply.is_empty() {
            return Err(Error::MalformedResponse("empty reply".to_string()));
        }
        Ok(reply.to_string())
    }

    async fn compose_digest(&self, entries: &[DigestEntry]) -> Result<String> {
        let mut user = format!("{} messages in the inbox.\n", entries.len());
        for (n, entry) in entries.iter().enumerate() {
            user.push_str(&format!(
                "\n{}. {} (from {})\n",
                n + 1,
                entry.message.subject,
                entry.message.sender
            ));
            match &entry.insight {
                Some(insight) => {
                    user.push_str(&format!(
                        "   Category: {}, priority {}\n   Summary: {}\n",
                        insight.category, insight.priority, insight.summary
                    ));
                    if !insight.action_items.is_empty() {
                        user.push_str(&format!(
                            "   Action items: {}\n",
                            insight.action_items.join("; ")
                        ));
                    }
                    if !insight.deadlines.is_empty() {
                        user.push_str(&format!("   Deadlines: {}\n", insight.deadlines.join("; ")));
                    }
                }
                None => user.push_str(&format!("   Preview: {}\n", entry.message.snippet)),
            }
        }

        let text = self.complete(self.prompt(DIGEST_PROMPT, user)).await?;
        Ok(text.trim().to_string())
    }
}

impl std::fmt::Debug for LlmInsightGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmInsightGenerator")
            .field("configured", &self.is_configured())
            .field("model", &self.settings.model)
            .finish()
    }
}
