//! The two interactive authorization variants.
//!
//! Which one runs is decided once at startup from [`HostCapabilities`] and
//! the configured [`AuthMode`]; the engine only sees `dyn Authorizer`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::browser::{BrowserLauncher, HostCapabilities};
use super::listener::RedirectListener;
use super::oauth::{OAuthClient, TokenGrant};
use super::pkce::{random_token, PkceChallenge};
use crate::config::AuthMode;
use crate::error::{Error, Result};

/// Obtains a fresh token grant from the user.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Runs the interactive flow.
    async fn authorize(&self) -> Result<TokenGrant>;
}

/// Host identity popup that yields an access token directly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenPrompt: Send + Sync {
    /// Asks the host for an access token covering `scopes`.
    async fn request_access_token(&self, scopes: &[String]) -> Result<String>;
}

/// System browser + loopback listener + code exchange.
pub struct PkceAuthorizer {
    oauth: OAuthClient,
    browser: Arc<dyn BrowserLauncher>,
    port: u16,
    redirect_timeout: Duration,
}

impl PkceAuthorizer {
    /// Creates the authorizer from the client's settings.
    pub fn new(oauth: OAuthClient, browser: Arc<dyn BrowserLauncher>) -> Self {
        let port = oauth.settings().redirect_port;
        let redirect_timeout = oauth.settings().redirect_timeout();
        Self {
            oauth,
            browser,
            port,
            redirect_timeout,
        }
    }

    /// Overrides the listener port (0 picks a free one).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides how long to wait for the redirect.
    pub fn with_redirect_timeout(mut self, timeout: Duration) -> Self {
        self.redirect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Authorizer for PkceAuthorizer {
    fn name(&self) -> &'static str {
        "pkce"
    }

    async fn authorize(&self) -> Result<TokenGrant> {
        // Bind first so a busy port fails before the browser opens.
        let listener = RedirectListener::bind(self.port).await?;
        let redirect_uri = listener.redirect_uri();

        let pkce = PkceChallenge::generate()?;
        let state = random_token(16)?;
        let url = self.oauth.authorization_url(&pkce, &redirect_uri, &state)?;

        tracing::info!(%redirect_uri, "opening browser for consent");
        tracing::debug!(%url, "authorization url");
        self.browser.open(&url)?;

        let code = listener
            .wait_for_code(&state, self.redirect_timeout)
            .await?;
        self.oauth
            .exchange_code(&code, pkce.verifier(), &redirect_uri)
            .await
    }
}

/// Host popup flow. Yields no refresh token.
pub struct PopupAuthorizer {
    prompt: Arc<dyn TokenPrompt>,
    scopes: Vec<String>,
}

impl PopupAuthorizer {
    /// Creates the authorizer.
    pub fn new(prompt: Arc<dyn TokenPrompt>, scopes: Vec<String>) -> Self {
        Self { prompt, scopes }
    }
}

#[async_trait]
impl Authorizer for PopupAuthorizer {
    fn name(&self) -> &'static str {
        "popup"
    }

    async fn authorize(&self) -> Result<TokenGrant> {
        let token = self.prompt.request_access_token(&self.scopes).await?;
        if token.trim().is_empty() {
            return Err(Error::AuthDenied("no access token returned".to_string()));
        }
        Ok(TokenGrant::new(token, None))
    }
}

/// Picks the authorization variant for this host.
///
/// A native browser is required for PKCE; the popup needs a [`TokenPrompt`].
/// The configured mode wins when both are possible.
pub fn select_authorizer(
    capabilities: HostCapabilities,
    mode: AuthMode,
    oauth: OAuthClient,
    browser: Arc<dyn BrowserLauncher>,
    prompt: Option<Arc<dyn TokenPrompt>>,
) -> Result<Arc<dyn Authorizer>> {
    let scopes = oauth.settings().scopes.clone();
    let authorizer: Arc<dyn Authorizer> = match (mode, capabilities.native_browser, prompt) {
        (AuthMode::Popup, _, Some(prompt)) | (AuthMode::Pkce, false, Some(prompt)) => {
            Arc::new(PopupAuthorizer::new(prompt, scopes))
        }
        (_, true, _) => Arc::new(PkceAuthorizer::new(oauth, browser)),
        (_, false, None) => {
            return Err(Error::Config(
                "no authorization method available on this host".to_string(),
            ))
        }
    };

    tracing::debug!(authorizer = authorizer.name(), "authorization variant selected");
    Ok(authorizer)
}
