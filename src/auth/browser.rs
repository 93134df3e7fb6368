//! Host capabilities used by the interactive authorization flows.

use crate::error::{Error, Result};

/// Opens a URL in the user's browser.
#[cfg_attr(test, mockall::automock)]
pub trait BrowserLauncher: Send + Sync {
    /// Opens `url`. Returning means the launch was requested, not completed.
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the OS default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        open::that(url).map_err(|e| Error::AuthDenied(format!("failed to open browser: {}", e)))
    }
}

/// What the host runtime can do, detected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// A native browser can be launched and a loopback port bound.
    pub native_browser: bool,
}

impl HostCapabilities {
    /// Capabilities of a desktop host.
    pub fn desktop() -> Self {
        Self {
            native_browser: true,
        }
    }

    /// Capabilities of an embedded host that only offers an identity popup.
    pub fn embedded() -> Self {
        Self {
            native_browser: false,
        }
    }
}
