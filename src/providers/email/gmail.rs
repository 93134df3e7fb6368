//! Gmail REST API client.
//!
//! Implements [`MailProvider`] on top of the authenticated [`Gateway`], so
//! every call carries the session's bearer token and shares its failure
//! classification and recovery. Bodies are reduced to plain text: a
//! `text/plain` part wins, otherwise the first `text/html` part is stripped,
//! otherwise the snippet is used.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::html::strip_html;
use super::traits::{MailProvider, OutgoingReply};
use crate::domain::{Address, DraftId, EmailId, Message, MessageId, ThreadId};
use crate::error::{Error, Result};
use crate::gateway::{ApiRequest, Gateway};

/// Default Gmail API base for the signed-in user.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Label removed by [`MailProvider::archive`].
const INBOX_LABEL: &str = "INBOX";

/// Characters that force a display name into a quoted string.
const NAME_SPECIALS: &str = "()<>[]:;@\\,.\"";

/// Gmail API message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    messages: Option<Vec<GmailMessageRef>>,
    #[allow(dead_code)]
    result_size_estimate: Option<u32>,
}

/// Message reference returned by the list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageRef {
    id: String,
    #[allow(dead_code)]
    thread_id: Option<String>,
}

/// Gmail API message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: String,
    snippet: Option<String>,
    payload: Option<GmailMessagePayload>,
    internal_date: Option<String>,
}

/// Gmail message payload (headers and body parts).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessagePayload {
    headers: Option<Vec<GmailHeader>>,
    parts: Option<Vec<GmailPart>>,
    body: Option<GmailBody>,
    mime_type: Option<String>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail message part (for multipart messages).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail message body.
#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

/// Gmail modify request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

/// Raw RFC 822 message with its thread.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    raw: String,
    thread_id: String,
}

/// Draft create/update body.
#[derive(Debug, Serialize)]
struct DraftRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    message: RawMessage,
}

/// Anything that answers with an id.
#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// Gmail implementation of [`MailProvider`].
#[derive(Debug, Clone)]
pub struct GmailClient {
    gateway: Gateway,
    base_url: String,
}

impl GmailClient {
    /// Creates a client against the default API base.
    pub fn new(gateway: Gateway) -> Self {
        Self::with_base_url(gateway, GMAIL_API_BASE)
    }

    /// Creates a client against a custom API base.
    pub fn with_base_url(gateway: Gateway, base_url: impl Into<String>) -> Self {
        Self {
            gateway,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Builds an RFC 5322 reply.
    ///
    /// `From` is omitted; the API fills in the authenticated account.
    fn build_raw_message(reply: &OutgoingReply) -> String {
        let mut message = String::new();

        message.push_str(&format!("To: {}\r\n", encode_mailbox(&reply.to)));
        message.push_str(&format!("Subject: {}\r\n", encode_header(&reply.subject)));

        if let Some(in_reply_to) = &reply.in_reply_to {
            message.push_str(&format!("In-Reply-To: {}\r\n", in_reply_to));
            message.push_str(&format!("References: {}\r\n", in_reply_to));
        }

        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: 8bit\r\n");
        message.push_str("\r\n");

        message.push_str(&reply.body.replace("\r\n", "\n").replace('\n', "\r\n"));

        message
    }

    fn raw_message(reply: &OutgoingReply) -> RawMessage {
        RawMessage {
            raw: URL_SAFE_NO_PAD.encode(Self::build_raw_message(reply).as_bytes()),
            thread_id: reply.thread_id.0.clone(),
        }
    }

    /// Converts a Gmail message to the domain [`Message`].
    fn to_domain(msg: GmailMessage) -> Message {
        let payload = msg.payload.as_ref();
        let headers = payload.and_then(|p| p.headers.as_ref());

        let get_header = |name: &str| -> Option<String> {
            headers.and_then(|h| {
                h.iter()
                    .find(|hdr| hdr.name.eq_ignore_ascii_case(name))
                    .map(|hdr| hdr.value.clone())
            })
        };

        let snippet = msg.snippet.clone().unwrap_or_default();
        let body = payload
            .and_then(extract_body)
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| snippet.clone());

        let received_at = msg
            .internal_date
            .as_deref()
            .and_then(|d| d.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Message {
            id: EmailId::from(msg.id),
            thread_id: ThreadId::from(msg.thread_id),
            message_id: get_header("Message-ID").map(MessageId::from),
            subject: get_header("Subject").unwrap_or_default(),
            sender: get_header("From").unwrap_or_default(),
            snippet,
            body,
            received_at,
        }
    }
}

/// Picks the best plain-text rendering of a payload.
fn extract_body(payload: &GmailMessagePayload) -> Option<String> {
    let mut text = None;
    let mut html = None;

    if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
        if let Some(decoded) = decode_body(data) {
            match payload.mime_type.as_deref() {
                Some("text/html") => html = Some(decoded),
                _ => text = Some(decoded),
            }
        }
    }

    if let Some(parts) = &payload.parts {
        extract_body_from_parts(parts, &mut text, &mut html);
    }

    text.or_else(|| html.map(|h| strip_html(&h)))
}

/// Depth-first walk keeping the first text and html parts.
fn extract_body_from_parts(parts: &[GmailPart], text: &mut Option<String>, html: &mut Option<String>) {
    for part in parts {
        let data = part.body.as_ref().and_then(|b| b.data.as_deref());
        match (part.mime_type.as_deref(), data) {
            (Some("text/plain"), Some(data)) if text.is_none() => *text = decode_body(data),
            (Some("text/html"), Some(data)) if html.is_none() => *html = decode_body(data),
            _ => {}
        }

        if let Some(nested) = &part.parts {
            extract_body_from_parts(nested, text, html);
        }
    }
}

/// Decodes base64url body data, with or without padding.
fn decode_body(data: &str) -> Option<String> {
    let decoded = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// RFC 2047 encodes non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Formats `address` as a header mailbox. Non-ASCII names are RFC 2047
/// encoded; names with specials are quoted.
fn encode_mailbox(address: &Address) -> String {
    let name = address
        .name
        .as_deref()
        .map(|name| name.replace(['\r', '\n'], " "))
        .filter(|name| !name.trim().is_empty());

    match name {
        None => address.email.clone(),
        Some(name) if !name.is_ascii() => {
            format!("{} <{}>", encode_header(name.trim()), address.email)
        }
        Some(name) if name.contains(|c: char| NAME_SPECIALS.contains(c)) => {
            let escaped = name.trim().replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\" <{}>", escaped, address.email)
        }
        Some(name) => format!("{} <{}>", name.trim(), address.email),
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_message_ids(&self, mailbox: &str, max_results: u32) -> Result<Vec<EmailId>> {
        let mut url = Url::parse(&self.endpoint("/messages"))
            .map_err(|e| Error::Config(format!("api_base_url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("labelIds", mailbox)
            .append_pair("maxResults", &max_results.to_string());

        let response: MessageListResponse = self.gateway.call_json(ApiRequest::get(url)).await?;
        Ok(response
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| EmailId::from(m.id))
            .collect())
    }

    async fn get_message(&self, id: &EmailId) -> Result<Message> {
        let url = self.endpoint(&format!("/messages/{}?format=full", id));
        let message: GmailMessage = self.gateway.call_json(ApiRequest::get(url)).await?;
        Ok(Self::to_domain(message))
    }

    async fn archive(&self, id: &EmailId) -> Result<()> {
        let body = ModifyRequest {
            add_label_ids: vec![],
            remove_label_ids: vec![INBOX_LABEL.to_string()],
        };
        let request = ApiRequest::post(self.endpoint(&format!("/messages/{}/modify", id)))
            .json(to_json(&body)?);
        self.gateway.call(request).await?;
        tracing::debug!(email_id = %id, "archived");
        Ok(())
    }

    async fn trash(&self, id: &EmailId) -> Result<()> {
        let request = ApiRequest::post(self.endpoint(&format!("/messages/{}/trash", id)));
        self.gateway.call(request).await?;
        tracing::debug!(email_id = %id, "trashed");
        Ok(())
    }

    async fn create_draft(&self, reply: &OutgoingReply) -> Result<DraftId> {
        let body = DraftRequest {
            id: None,
            message: Self::raw_message(reply),
        };
        let request = ApiRequest::post(self.endpoint("/drafts")).json(to_json(&body)?);
        let response: IdResponse = self.gateway.call_json(request).await?;
        Ok(DraftId::from(response.id))
    }

    async fn update_draft(&self, draft_id: &DraftId, reply: &OutgoingReply) -> Result<DraftId> {
        let body = DraftRequest {
            id: Some(draft_id.0.clone()),
            message: Self::raw_message(reply),
        };
        let request =
            ApiRequest::put(self.endpoint(&format!("/drafts/{}", draft_id))).json(to_json(&body)?);
        let response: IdResponse = self.gateway.call_json(request).await?;
        Ok(DraftId::from(response.id))
    }

    async fn send_message(&self, reply: &OutgoingReply) -> Result<EmailId> {
        let request =
            ApiRequest::post(self.endpoint("/messages/send")).json(to_json(&Self::raw_message(reply))?);
        let response: IdResponse = self.gateway.call_json(request).await?;
        tracing::info!(message_id = %response.id, "reply sent");
        Ok(EmailId::from(response.id))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Provider(format!("encode request: {}", e)))
}
