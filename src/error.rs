//! Crate-wide error taxonomy.
//!
//! Every failure surfaced to a caller resolves to one of these variants.
//! Authorization-class variants render as short actionable messages, while
//! [`Error::Provider`] passes the provider's own text through unchanged.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the credential, sync, enrichment and draft layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The user declined consent or the identity provider rejected the request.
    #[error("authorization was denied: {0}")]
    AuthDenied(String),

    /// The stored refresh token was rejected by the token endpoint.
    #[error("your saved sign-in is no longer valid; connect your account again")]
    RefreshDenied,

    /// The access token is missing, expired or revoked.
    #[error("your session expired; reconnect and try again")]
    AuthExpired,

    /// The granted scopes do not cover the requested operation.
    #[error("missing permissions; reconnect your account and grant all requested access")]
    MissingScopes,

    /// The loopback redirect listener could not bind its port.
    #[error("could not listen for the sign-in redirect on port {port}: {reason}")]
    ListenerBindFailed {
        /// Port the listener tried to bind.
        port: u16,
        /// Underlying bind failure.
        reason: String,
    },

    /// Transport-level failure (DNS, connect, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Any other provider failure, with the provider's message verbatim.
    #[error("{0}")]
    Provider(String),

    /// No insight-generation collaborator is configured.
    #[error("AI insights are not configured")]
    EnrichmentUnavailable,

    /// A collaborator returned a payload that failed validation.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A draft action was attempted with blank content.
    #[error("the draft is empty")]
    EmptyDraft,

    /// No address could be extracted from a sender header.
    #[error("could not find a reply address in sender {0:?}")]
    UnparseableSender(String),

    /// Durable credential storage failed.
    #[error("credential storage error: {0}")]
    Storage(String),

    /// Settings could not be read or written.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for errors that are resolved by (re)authorization.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Error::AuthExpired | Error::RefreshDenied | Error::MissingScopes
        )
    }
}
