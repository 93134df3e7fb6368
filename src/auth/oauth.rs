//! OAuth 2.0 endpoint client: authorization URL, code exchange, refresh and
//! profile lookup.

use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use super::pkce::{PkceChallenge, CHALLENGE_METHOD};
use crate::config::AuthSettings;
use crate::error::{Error, Result};
use crate::gateway::{ApiRequest, HttpTransport};

/// Tokens issued by the token endpoint (or by a popup flow).
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl TokenGrant {
    /// Creates a grant.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[allow(dead_code)]
    expires_in: Option<u64>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// Userinfo response; only the email is used.
#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    name: Option<String>,
}

/// Talks to the authorization server.
#[derive(Clone)]
pub struct OAuthClient {
    transport: Arc<dyn HttpTransport>,
    settings: AuthSettings,
}

impl OAuthClient {
    /// Creates a client for the configured endpoints.
    pub fn new(transport: Arc<dyn HttpTransport>, settings: AuthSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Endpoint and client configuration.
    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Builds the browser-facing authorization URL.
    pub fn authorization_url(
        &self,
        pkce: &PkceChallenge,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String> {
        let mut url = Url::parse(&self.settings.authorization_endpoint)
            .map_err(|e| Error::Config(format!("authorization_endpoint: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state)
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);
        Ok(url.into())
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant> {
        let request = ApiRequest::post(&self.settings.token_endpoint).form([
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ]);

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(Error::AuthDenied(format!(
                "code exchange failed ({}): {}",
                response.status,
                response.error_message()
            )));
        }

        let token: TokenResponse = response.json()?;
        tracing::debug!(
            has_refresh_token = token.refresh_token.is_some(),
            "authorization code exchanged"
        );
        Ok(TokenGrant::new(token.access_token, token.refresh_token))
    }

    /// Trades a refresh token for a new access token.
    ///
    /// When the response carries no refresh token the one presented stays
    /// valid and is returned in the grant.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let request = ApiRequest::post(&self.settings.token_endpoint).form([
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ]);

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            let code = response.oauth_error_code();
            return Err(match code.as_deref() {
                // Only a revoked or expired grant invalidates the stored record.
                Some("invalid_grant") => {
                    tracing::warn!(status = response.status, "refresh token rejected");
                    Error::RefreshDenied
                }
                Some(code @ ("invalid_client" | "unauthorized_client")) => {
                    tracing::error!(status = response.status, code, "oauth client rejected");
                    Error::Config(format!(
                        "oauth client rejected during token refresh ({code}): {}",
                        response.error_message()
                    ))
                }
                _ => Error::Provider(format!(
                    "token refresh failed ({}): {}",
                    response.status,
                    response.error_message()
                )),
            });
        }

        let token: TokenResponse = response.json()?;
        let rotated = token.refresh_token.is_some();
        tracing::debug!(rotated, "access token refreshed");
        Ok(TokenGrant::new(
            token.access_token,
            token.refresh_token.or_else(|| Some(refresh_token.to_string())),
        ))
    }

    /// Looks up the account label (email address) for display.
    pub async fn fetch_profile_label(&self, access_token: &str) -> Result<String> {
        let request = ApiRequest::get(&self.settings.userinfo_endpoint).bearer(access_token);
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(Error::Provider(response.error_message()));
        }

        let info: UserInfo = response.json()?;
        info.email
            .or(info.name)
            .filter(|label| !label.trim().is_empty())
            .ok_or_else(|| Error::Provider("profile has no email address".to_string()))
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("token_endpoint", &self.settings.token_endpoint)
            .finish_non_exhaustive()
    }
}
