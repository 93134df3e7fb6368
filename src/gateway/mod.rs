//! Authenticated request gateway.
//!
//! Every provider call goes through [`Gateway::call`], which injects the
//! current bearer token and classifies failures uniformly:
//!
//! - an "insufficient scope" signature becomes [`Error::MissingScopes`] and
//!   drops the session back to `Unauthenticated` (scopes cannot be upgraded
//!   silently);
//! - HTTP 401 or an "invalid credentials" signature becomes
//!   [`Error::AuthExpired`] after the shared recovery routine has run;
//! - anything else becomes [`Error::Provider`] with the provider's message.
//!
//! The gateway never replays a request. Callers that need the result re-issue
//! it once the session is `Authorized` again.

pub mod testing;
mod transport;

use std::sync::Arc;

use serde::de::DeserializeOwned;

pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, RequestBody, ReqwestTransport};

use crate::auth::AuthEngine;
use crate::error::{Error, Result};

/// Wraps provider calls with bearer injection and failure recovery.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<AuthEngine>,
}

impl Gateway {
    /// Creates a gateway over `transport`, recovering through `auth`.
    pub fn new(transport: Arc<dyn HttpTransport>, auth: Arc<AuthEngine>) -> Self {
        Self { transport, auth }
    }

    /// The engine this gateway recovers through.
    pub fn auth(&self) -> &Arc<AuthEngine> {
        &self.auth
    }

    /// Executes `request` with the current bearer token.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
        if !self.auth.state().is_authorized() {
            return Err(Error::AuthExpired);
        }
        let Some(token) = self.auth.access_token().await else {
            return Err(Error::AuthExpired);
        };

        let url = request.url.clone();
        let response = self.transport.execute(request.bearer(token.clone())).await?;
        if response.is_success() {
            return Ok(response);
        }

        let error = classify_failure(&response);
        tracing::debug!(status = response.status, %url, error = %error, "provider call failed");

        match error {
            Error::AuthExpired => {
                // Surface RefreshDenied as-is; every other recovery outcome
                // still requires the caller to re-issue.
                match self.auth.recover(&token).await {
                    Err(Error::RefreshDenied) => Err(Error::RefreshDenied),
                    _ => Err(Error::AuthExpired),
                }
            }
            Error::MissingScopes => {
                self.auth.invalidate().await;
                Err(Error::MissingScopes)
            }
            other => Err(other),
        }
    }

    /// Executes `request` and decodes a JSON response body.
    pub async fn call_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.call(request).await?.json()
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("state", &self.auth.state())
            .finish_non_exhaustive()
    }
}

/// Maps a non-success response onto the error taxonomy.
pub fn classify_failure(response: &ApiResponse) -> Error {
    let message = response.error_message();
    let haystack = format!("{} {}", message, response.body).to_ascii_lowercase();

    if (haystack.contains("insufficient") && haystack.contains("scope"))
        || haystack.contains("access_token_scope_insufficient")
    {
        return Error::MissingScopes;
    }

    if response.status == 401
        || haystack.contains("invalid credentials")
        || haystack.contains("invalid authentication credentials")
        || haystack.contains("invalid_token")
        || haystack.contains("unauthenticated")
    {
        return Error::AuthExpired;
    }

    Error::Provider(message)
}
