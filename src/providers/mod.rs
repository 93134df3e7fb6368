//! External service providers.
//!
//! - [`email`] - Mail service client (Gmail REST API)
//! - [`ai`] - Completion providers (OpenAI-compatible endpoints)

pub mod ai;
pub mod email;
