//! Email provider implementations.
//!
//! [`MailProvider`] is the boundary to the mail service. [`GmailClient`]
//! implements it over the authenticated [`crate::gateway::Gateway`], so every
//! call carries the session's bearer token and shares its recovery path.
//!
//! # Example
//!
//! ```ignore
//! use inbox_pilot::providers::email::{GmailClient, MailProvider};
//!
//! async fn list_inbox(mail: &GmailClient) -> inbox_pilot::Result<()> {
//!     for id in mail.list_message_ids("INBOX", 15).await? {
//!         let message = mail.get_message(&id).await?;
//!         println!("{}: {}", message.sender, message.subject);
//!     }
//!     Ok(())
//! }
//! ```

mod gmail;
mod html;
mod traits;

pub use gmail::{GmailClient, GMAIL_API_BASE};
pub use html::strip_html;
pub use traits::{MailProvider, OutgoingReply};
