//! External browser launching.
//!
//! The harvester depends on the browser honoring `--proxy-server` and on a
//! plain-HTTP starting URL, so the first navigation is interceptable before
//! any TLS handshake. Chrome and Chromium do both.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::{HarvesterError, Result};

/// Binary names probed on PATH, in order, when no explicit path is given.
const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// What the coordinator needs to launch a browser for one session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// First page the browser navigates to, scheme already forced to http
    pub starting_url: String,

    /// Port of the interception listener on 127.0.0.1
    pub proxy_port: u16,

    pub user_agent: Option<String>,

    /// Explicit binary, overriding discovery
    pub browser_path: Option<PathBuf>,
}

/// Seam between the coordinator and the real browser, so tests can drive a
/// full solve without spawning Chrome.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<BrowserHandle>;
}

/// A launched browser. Detached handles (from test launchers) have no
/// process behind them and kill is a no-op.
pub struct BrowserHandle {
    child: Option<Child>,
}

impl BrowserHandle {
    pub fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn detached() -> Self {
        Self { child: None }
    }

    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill().await {
                debug!("Browser process already gone: {}", e);
            }
        }
    }
}

/// Launches the system Chrome/Chromium with a disposable profile.
pub struct SystemBrowser;

#[async_trait]
impl BrowserLauncher for SystemBrowser {
    async fn launch(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        let binary = find_binary(options.browser_path.clone())?;

        let profile_dir = std::env::temp_dir().join(format!(
            "captcha-harvester-profile-{}",
            std::process::id()
        ));

        let mut cmd = Command::new(&binary);
        cmd.arg(format!(
            "--proxy-server=http://127.0.0.1:{}",
            options.proxy_port
        ))
        .arg(format!("--user-data-dir={}", profile_dir.display()))
        .arg("--no-first-run")
        .arg("--no-default-browser-check");

        if let Some(user_agent) = &options.user_agent {
            cmd.arg(format!("--user-agent={user_agent}"));
        }

        cmd.arg(&options.starting_url);
        cmd.kill_on_drop(true);

        info!(binary = %binary.display(), url = %options.starting_url, "Launching browser");

        let child = cmd
            .spawn()
            .map_err(|e| HarvesterError::BrowserLaunch(e.to_string()))?;

        Ok(BrowserHandle::from_child(child))
    }
}

/// Resolve the browser binary: explicit path, then the CHROME_PATH
/// environment variable, then PATH discovery over known names.
fn find_binary(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    if let Ok(path) = std::env::var("CHROME_PATH") {
        return Ok(PathBuf::from(path));
    }

    BROWSER_CANDIDATES
        .iter()
        .find_map(|candidate| which::which(candidate).ok())
        .ok_or(HarvesterError::BrowserNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = find_binary(Some(PathBuf::from("/opt/custom/chrome"))).unwrap();
        assert_eq!(path, PathBuf::from("/opt/custom/chrome"));
    }

    #[tokio::test]
    async fn test_detached_handle_kill_is_noop() {
        let mut handle = BrowserHandle::detached();
        handle.kill().await;
    }
}
