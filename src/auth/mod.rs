//! Delegated authorization.
//!
//! - [`Session`] / [`AuthState`]: the single session and its lifecycle
//! - [`PkceChallenge`] and [`RedirectListener`]: building blocks of the
//!   browser-based PKCE flow
//! - [`OAuthClient`]: authorization URL, code exchange, refresh, profile
//! - [`Authorizer`]: the PKCE and popup variants, chosen once per host
//! - [`AuthEngine`]: drives the state machine and owns credential writes

mod authorizer;
mod browser;
mod engine;
mod listener;
mod oauth;
mod pkce;
mod session;

pub use authorizer::{select_authorizer, Authorizer, PkceAuthorizer, PopupAuthorizer, TokenPrompt};
pub use browser::{BrowserLauncher, HostCapabilities, SystemBrowser};
pub use engine::AuthEngine;
pub use listener::RedirectListener;
pub use oauth::{OAuthClient, TokenGrant};
pub use pkce::{random_token, PkceChallenge, CHALLENGE_METHOD};
pub use session::{AuthState, Session};
