//! HTTP transport seam.
//!
//! Provider calls are described as plain [`ApiRequest`] values and executed
//! by an [`HttpTransport`]. Only transport-level failures become errors here;
//! every HTTP status, including 4xx/5xx, comes back as an [`ApiResponse`] so
//! the gateway can classify it.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// Body of an [`ApiRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// JSON document.
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

/// A provider request, independent of the HTTP client in use.
#[derive(Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    /// Bearer token, injected by the gateway for provider calls.
    pub bearer: Option<String>,
}

impl ApiRequest {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: RequestBody::Empty,
            bearer: None,
        }
    }

    /// Creates a POST request without a body.
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: RequestBody::Empty,
            bearer: None,
        }
    }

    /// Creates a PUT request without a body.
    pub fn put(url: impl Into<String>) -> Self {
        Self {
            method: Method::Put,
            url: url.into(),
            body: RequestBody::Empty,
            bearer: None,
        }
    }

    /// Sets a JSON body.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Sets a form body.
    pub fn form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Sets the bearer token.
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

// Requests carry tokens; keep them out of debug output.
impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("has_bearer", &self.bearer.is_some())
            .finish_non_exhaustive()
    }
}

/// A provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| Error::Provider(format!("unexpected response body: {}", e)))
    }

    /// Extracts the human-readable error message from an error body.
    ///
    /// Understands both the REST API shape (`{"error":{"message":..}}`) and
    /// the OAuth shape (`{"error":"invalid_grant","error_description":..}`);
    /// anything else is returned as-is.
    pub fn error_message(&self) -> String {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&self.body) else {
            return if self.body.trim().is_empty() {
                format!("HTTP {}", self.status)
            } else {
                self.body.trim().to_string()
            };
        };

        let error = &value["error"];
        if let Some(message) = error["message"].as_str() {
            return message.to_string();
        }
        match (error.as_str(), value["error_description"].as_str()) {
            (Some(code), Some(description)) if !description.is_empty() => {
                format!("{}: {}", code, description)
            }
            (Some(code), _) => code.to_string(),
            _ => self.body.trim().to_string(),
        }
    }

    /// OAuth error code (`invalid_grant`, `access_denied`, ...) if present.
    pub fn oauth_error_code(&self) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|value| value["error"].as_str().map(str::to_string))
    }
}

/// Executes [`ApiRequest`]s.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request. Fails only with [`Error::Network`].
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// [`HttpTransport`] backed by reqwest. Timeouts are reqwest's defaults.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the HTTP client (useful for custom timeouts or proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
        };

        if let Some(token) = &request.bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| Error::AuthExpired)?;
            builder = builder.header(AUTHORIZATION, value);
        }

        builder = match &request.body {
            RequestBody::Empty => builder.header(reqwest::header::CONTENT_LENGTH, 0),
            RequestBody::Json(json) => builder.json(json),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let request = ApiRequest::post("https://example.com/token")
            .form([("grant_type", "refresh_token")])
            .bearer("tok");

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.bearer.as_deref(), Some("tok"));
        assert_eq!(
            request.body,
            RequestBody::Form(vec![("grant_type".into(), "refresh_token".into())])
        );
    }

    #[test]
    fn debug_hides_bearer() {
        let request = ApiRequest::get("https://example.com").bearer("super-secret");
        assert!(!format!("{:?}", request).contains("super-secret"));
    }

    #[test]
    fn error_message_rest_shape() {
        let response = ApiResponse::new(
            403,
            r#"{"error":{"code":403,"message":"Request had insufficient authentication scopes.","status":"PERMISSION_DENIED"}}"#,
        );
        assert_eq!(
            response.error_message(),
            "Request had insufficient authentication scopes."
        );
    }

    #[test]
    fn error_message_oauth_shape() {
        let response = ApiResponse::new(
            400,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        assert_eq!(
            response.error_message(),
            "invalid_grant: Token has been expired or revoked."
        );
        assert_eq!(response.oauth_error_code().as_deref(), Some("invalid_grant"));
    }

    #[test]
    fn error_message_plain_body() {
        assert_eq!(ApiResponse::new(502, "Bad Gateway").error_message(), "Bad Gateway");
        assert_eq!(ApiResponse::new(500, "").error_message(), "HTTP 500");
    }

    #[test]
    fn json_decode_failure_is_provider_error() {
        let response = ApiResponse::new(200, "not json");
        let result: Result<serde_json::Value> = response.json();
        assert!(matches!(result, Err(Error::Provider(_))));
    }
}
