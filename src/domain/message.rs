//! Message domain types.
//!
//! A [`Message`] is one fully detailed inbox entry as mirrored by the sync
//! scheduler, plus the helpers needed to derive a reply envelope from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailId, MessageId, ThreadId};
use crate::error::{Error, Result};

/// A fully fetched inbox message.
///
/// Immutable for the lifetime of a snapshot; a later sync replaces the whole
/// collection rather than patching individual messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Provider-assigned message id.
    pub id: EmailId,
    /// Conversation the message belongs to.
    pub thread_id: ThreadId,
    /// RFC 5322 Message-ID header, used to thread replies.
    pub message_id: Option<MessageId>,
    /// Subject line (empty when absent).
    pub subject: String,
    /// Raw `From` header value.
    pub sender: String,
    /// Short provider-generated preview.
    pub snippet: String,
    /// Plain-text body with any HTML stripped.
    pub body: String,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Extracts the reply address from the sender header.
    pub fn reply_address(&self) -> Result<Address> {
        Address::parse(&self.sender)
    }

    /// Subject line for a reply to this message.
    pub fn reply_subject(&self) -> String {
        normalize_reply_subject(&self.subject)
    }
}

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Email address.
    pub email: String,
    /// Display name (e.g., "Jane Doe").
    pub name: Option<String>,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Parses a header value such as `Jane Doe <jane@example.com>` or a bare
    /// `jane@example.com`.
    ///
    /// Fails with [`Error::UnparseableSender`] when no address-shaped token
    /// is present.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();

        if let Some(start) = value.find('<') {
            if let Some(len) = value[start..].find('>') {
                let email = value[start + 1..start + len].trim();
                if is_address_shaped(email) {
                    let name = unquote(value[..start].trim());
                    return Ok(Self {
                        email: email.to_string(),
                        name: (!name.is_empty()).then_some(name),
                    });
                }
            }
        }

        value
            .split_whitespace()
            .map(|token| token.trim_matches(|c: char| "<>\"'(),;".contains(c)))
            .find(|token| is_address_shaped(token))
            .map(Address::new)
            .ok_or_else(|| Error::UnparseableSender(value.to_string()))
    }

    /// Returns the display representation of this address.
    ///
    /// If a name is present, returns "Name <email>", otherwise just the email.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Strips a quoted-string display name down to its text.
fn unquote(name: &str) -> String {
    match name.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => out.extend(chars.next()),
                    c => out.push(c),
                }
            }
            out.trim().to_string()
        }
        None => name.trim_matches('"').trim().to_string(),
    }
}

fn is_address_shaped(candidate: &str) -> bool {
    let mut parts = candidate.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && !domain.is_empty()
                && !candidate.chars().any(|c| c.is_whitespace() || c == '<' || c == '>')
        }
        _ => false,
    }
}

/// Normalizes a subject so it carries exactly one leading `Re:`.
///
/// The check is case-insensitive and idempotent: `"X"`, `"Re: X"` and
/// `"RE: re: X"` all become `"Re: X"`.
pub fn normalize_reply_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    while rest
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        rest = rest[3..].trim_start();
    }

    if rest.is_empty() {
        "Re:".to_string()
    } else {
        format!("Re: {}", rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message_from(sender: &str, subject: &str) -> Message {
        Message {
            id: EmailId::from("m-1"),
            thread_id: ThreadId::from("t-1"),
            message_id: Some(MessageId::from("<abc@mail.example.com>")),
            subject: subject.to_string(),
            sender: sender.to_string(),
            snippet: String::new(),
            body: String::new(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn parse_display_name_with_angle_brackets() {
        let addr = Address::parse("Jane Doe <jane@example.com>").unwrap();
        assert_eq!(addr.email, "jane@example.com");
        assert_eq!(addr.name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn parse_quoted_display_name() {
        let addr = Address::parse("\"Doe, Jane\" <jane@example.com>").unwrap();
        assert_eq!(addr.email, "jane@example.com");
        assert_eq!(addr.name.as_deref(), Some("Doe, Jane"));
    }

    #[test]
    fn parse_unescapes_quoted_pairs() {
        let addr = Address::parse(r#""Jane \"JD\" Doe" <jane@example.com>"#).unwrap();
        assert_eq!(addr.name.as_deref(), Some(r#"Jane "JD" Doe"#));
    }

    #[test]
    fn parse_bare_address() {
        let addr = Address::parse("  jane@example.com ").unwrap();
        assert_eq!(addr, Address::new("jane@example.com"));
    }

    #[test]
    fn parse_address_embedded_in_text() {
        let addr = Address::parse("Jane (jane@example.com)").unwrap();
        assert_eq!(addr.email, "jane@example.com");
    }

    #[test]
    fn parse_rejects_nameless_garbage() {
        let err = Address::parse("Mail Delivery Subsystem").unwrap_err();
        assert!(matches!(err, Error::UnparseableSender(_)));

        let err = Address::parse("Jane <not-an-address>").unwrap_err();
        assert!(matches!(err, Error::UnparseableSender(_)));

        assert!(Address::parse("").is_err());
    }

    #[test]
    fn reply_address_from_message() {
        let msg = message_from("Jane Doe <jane@example.com>", "Lunch");
        assert_eq!(msg.reply_address().unwrap().email, "jane@example.com");
    }

    #[test]
    fn subject_gets_single_prefix() {
        assert_eq!(normalize_reply_subject("X"), "Re: X");
        assert_eq!(normalize_reply_subject("Re: X"), "Re: X");
        assert_eq!(normalize_reply_subject("RE: X"), "Re: X");
        assert_eq!(normalize_reply_subject("re:X"), "Re: X");
        assert_eq!(normalize_reply_subject("Re: Re: X"), "Re: X");
        assert_eq!(normalize_reply_subject(""), "Re:");
    }

    #[test]
    fn subject_normalization_is_idempotent() {
        for subject in ["X", "Re: X", "rE:   Quarterly plan", "", "Regarding plans"] {
            let once = normalize_reply_subject(subject);
            let twice = normalize_reply_subject(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn subject_starting_with_re_word_is_not_stripped() {
        assert_eq!(normalize_reply_subject("Regarding plans"), "Re: Regarding plans");
    }

    #[test]
    fn address_display_with_name() {
        let addr = Address::parse("Test User <test@example.com>").unwrap();
        assert_eq!(addr.display(), "Test User <test@example.com>");
    }
}
