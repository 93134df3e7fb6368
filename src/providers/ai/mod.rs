//! Language model backends.
//!
//! [`LlmProvider`] turns a single-turn [`Prompt`] into text. The bundled
//! [`OpenAiCompatibleProvider`] speaks the chat-completions protocol, so it
//! works against OpenAI as well as local servers such as Ollama or vLLM.
//!
//! # Example
//!
//! ```rust,no_run
//! use inbox_pilot::providers::ai::{LlmProvider, OpenAiCompatibleProvider, Prompt};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider =
//!     OpenAiCompatibleProvider::new("http://localhost:11434/v1", None, "llama3");
//!
//! let prompt = Prompt::new("Summarize in one sentence.", "Lunch moved to 1pm.");
//! println!("{}", provider.complete(&prompt).await?);
//! # Ok(())
//! # }
//! ```

mod openai;
mod traits;

pub use openai::OpenAiCompatibleProvider;
pub use traits::{LlmError, LlmProvider, LlmResult, OutputFormat, Prompt};
