//! Application settings and configuration types.
//!
//! Settings are persisted to `settings.json` in the platform config directory
//! (`~/.config/inbox-pilot/` on Linux) and loaded at startup. A missing file
//! yields defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::KeychainAccess;

/// Top-level application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// OAuth client and endpoint configuration.
    pub auth: AuthSettings,
    /// Inbox mirror settings.
    pub sync: SyncSettings,
    /// Insight-generation settings.
    pub ai: AiSettings,
    /// Reply draft behavior.
    pub drafts: DraftSettings,
}

impl Settings {
    /// File name inside the config directory.
    pub const FILE_NAME: &'static str = "settings.json";

    /// Resolves the default settings path for this platform.
    pub fn default_path() -> Result<PathBuf> {
        directories::ProjectDirs::from("io", "inboxpilot", "inbox-pilot")
            .map(|dirs| dirs.config_dir().join(Self::FILE_NAME))
            .ok_or_else(|| Error::Config("no home directory to store settings in".to_string()))
    }

    /// Loads settings from `path`, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Writes settings to `path`, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("{}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize settings: {}", e)))?;
        std::fs::write(path, json).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Which authorization variant the host runtime supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// System browser plus loopback redirect listener.
    Pkce,
    /// Token obtained through the host's identity popup.
    Popup,
}

/// OAuth client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret (desktop clients are confidential for this provider).
    pub client_secret: String,
    /// Browser-facing authorization endpoint.
    pub authorization_endpoint: String,
    /// Token endpoint for code exchange and refresh.
    pub token_endpoint: String,
    /// Endpoint returning the account profile.
    pub userinfo_endpoint: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Fixed loopback port for the redirect listener.
    pub redirect_port: u16,
    /// How long to wait for the browser redirect.
    pub redirect_timeout_secs: u64,
    /// Authorization variant.
    pub mode: AuthMode,
}

impl AuthSettings {
    /// Redirect wait as a [`Duration`].
    pub fn redirect_timeout(&self) -> Duration {
        Duration::from_secs(self.redirect_timeout_secs)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_endpoint: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            scopes: vec![
                "https://www.googleapis.com/auth/gmail.modify".to_string(),
                "https://www.googleapis.com/auth/gmail.compose".to_string(),
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
            ],
            redirect_port: 3737,
            redirect_timeout_secs: 60,
            mode: AuthMode::Pkce,
        }
    }
}

/// Inbox mirror configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between periodic refreshes.
    pub interval_secs: u64,
    /// Number of most recent messages mirrored.
    pub page_size: u32,
    /// Mailbox label to mirror.
    pub mailbox: String,
    /// Base URL of the mail REST API for the signed-in user.
    pub api_base_url: String,
}

impl SyncSettings {
    /// Refresh interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            page_size: 15,
            mailbox: "INBOX".to_string(),
            api_base_url: "https://gmail.googleapis.com/gmail/v1/users/me".to_string(),
        }
    }
}

/// Insight-generation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// Master switch for AI features.
    pub enabled: bool,
    /// OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens in a response.
    pub max_tokens: Option<usize>,
    /// Keychain entry holding the API key.
    pub api_key_keychain_id: String,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: Some(1024),
            api_key_keychain_id: KeychainAccess::ai_api_key("openai"),
        }
    }
}

/// Reply draft behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftSettings {
    /// Persist a generated reply as a provider draft immediately.
    pub persist_on_generate: bool,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self {
            persist_on_generate: true,
        }
    }
}
