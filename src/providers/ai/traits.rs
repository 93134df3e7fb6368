//! Completion seam used by the insight, reply and digest paths.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Error as CoreError;

/// Failures of a completion backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    /// The backend cannot serve requests at all (missing or rejected key).
    #[error("Provider not available: {0}")]
    Unavailable(String),
}

impl From<LlmError> for CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Unavailable(_) => CoreError::EnrichmentUnavailable,
            LlmError::InvalidResponse(message) => CoreError::MalformedResponse(message),
            LlmError::Http(e) => CoreError::Network(e.to_string()),
            LlmError::Api { message, .. } => CoreError::Provider(message),
        }
    }
}

/// Result type for completion calls.
pub type LlmResult<T> = Result<T, LlmError>;

/// Shape the model is asked to answer in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    /// A single JSON object.
    Json,
}

/// One single-turn prompt: standing instructions plus the material they
/// apply to.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// System-level instructions.
    pub instructions: String,
    /// The email, draft context or inbox listing.
    pub content: String,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub format: OutputFormat,
}

impl Prompt {
    pub fn new(instructions: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            content: content.into(),
            temperature: 0.3,
            max_tokens: None,
            format: OutputFormat::Text,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn expecting_json(mut self) -> Self {
        self.format = OutputFormat::Json;
        self
    }
}

/// A text completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Runs `prompt` and returns the generated text.
    async fn complete(&self, prompt: &Prompt) -> LlmResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_builder() {
        let prompt = Prompt::new("Be brief", "Hello")
            .with_temperature(0.5)
            .with_max_tokens(100)
            .expecting_json();

        assert_eq!(prompt.instructions, "Be brief");
        assert_eq!(prompt.content, "Hello");
        assert_eq!(prompt.temperature, 0.5);
        assert_eq!(prompt.max_tokens, Some(100));
        assert_eq!(prompt.format, OutputFormat::Json);
        assert_eq!(Prompt::new("a", "b").format, OutputFormat::Text);
    }

    #[test]
    fn error_conversion() {
        assert_eq!(
            CoreError::from(LlmError::Unavailable("no key".into())),
            CoreError::EnrichmentUnavailable
        );
        assert!(matches!(
            CoreError::from(LlmError::InvalidResponse("bad".into())),
            CoreError::MalformedResponse(_)
        ));
        assert_eq!(
            CoreError::from(LlmError::Api {
                status: 500,
                message: "The server had an error".into()
            }),
            CoreError::Provider("The server had an error".into())
        );
    }
}
