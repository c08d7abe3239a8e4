//! Harvest coordinator.
//!
//! Owns the listener lifecycle: start it, send a real browser through it,
//! wait for the injected page to post a token back, tear everything down and
//! hand the token to the caller.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::browser::{BrowserLauncher, LaunchOptions, SystemBrowser};
use crate::config::{self, HarvesterConfig};
use crate::error::{HarvesterError, Result};
use crate::proxy::{ProxyListener, SessionState};

/// Grace period between observing the token and closing the listener, so the
/// 200 for the result POST is not cut off mid-write.
const TEARDOWN_DRAIN: Duration = Duration::from_millis(200);

/// One harvest session. Active from construction until `solve_captcha`
/// completes; a finished session is terminal and refuses further solves.
pub struct CaptchaHarvester {
    config: HarvesterConfig,
    session: Arc<SessionState>,
    listener: Option<ProxyListener>,
    launcher: Box<dyn BrowserLauncher>,
}

impl CaptchaHarvester {
    /// Bind the interception listener and start accepting browser traffic.
    pub async fn new(config: HarvesterConfig) -> Result<Self> {
        Self::with_launcher(config, Box::new(SystemBrowser)).await
    }

    /// Like `new`, with a custom browser launcher.
    pub async fn with_launcher(
        config: HarvesterConfig,
        launcher: Box<dyn BrowserLauncher>,
    ) -> Result<Self> {
        config::validate(&config)?;

        let target_host = config
            .target_url
            .host_str()
            .ok_or_else(|| HarvesterError::InvalidTarget(config.target_url.to_string()))?
            .to_string();

        let session = Arc::new(SessionState::new(
            target_host,
            config.site_key.clone(),
            config.template_path.clone(),
        ));

        let listener = ProxyListener::bind(config.port, session.clone()).await?;

        Ok(Self {
            config,
            session,
            listener: Some(listener),
            launcher,
        })
    }

    /// Actual port the listener is bound on.
    pub fn port(&self) -> Option<u16> {
        self.listener.as_ref().map(ProxyListener::port)
    }

    /// Solve the captcha by sending a browser through the proxy and waiting
    /// for the human. Resolves once the injected page posts a token back;
    /// there is no timeout, the wait is indefinite. Consuming the session a
    /// second time fails with a reuse error before any side effect.
    pub async fn solve_captcha(&mut self) -> Result<String> {
        let port = self
            .listener
            .as_ref()
            .map(ProxyListener::port)
            .ok_or(HarvesterError::InstanceReused)?;

        // A failed launch leaves the listener in place, so the caller may try
        // again; only a completed solve closes the session.
        let mut browser = self
            .launcher
            .launch(&LaunchOptions {
                starting_url: http_starting_url(&self.config),
                proxy_port: port,
                user_agent: self.config.user_agent.clone(),
                browser_path: self.config.browser_path.clone(),
            })
            .await?;

        info!("Please solve the captcha in the browser window.");

        let token = self.session.wait_for_result().await;

        browser.kill().await;
        tokio::time::sleep(TEARDOWN_DRAIN).await;
        if let Some(listener) = self.listener.take() {
            listener.shutdown().await;
        }

        Ok(token)
    }
}

/// Target URL with the scheme forced to plain http, so the browser's first
/// navigation hits the proxy unencrypted and can be intercepted.
fn http_starting_url(config: &HarvesterConfig) -> String {
    let mut url = config.target_url.clone();
    // Cannot fail for http: the target always has a host.
    let _ = url.set_scheme("http");
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLauncher {
        launches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserLauncher for CountingLauncher {
        async fn launch(&self, _options: &LaunchOptions) -> Result<BrowserHandle> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(BrowserHandle::detached())
        }
    }

    fn config() -> HarvesterConfig {
        HarvesterConfig {
            port: 0,
            ..HarvesterConfig::new("https://example.test/".parse().unwrap(), "ABC123")
        }
    }

    #[test]
    fn test_starting_url_forces_http() {
        assert_eq!(http_starting_url(&config()), "http://example.test/");
    }

    #[tokio::test]
    async fn test_second_solve_fails_without_browser_launch() {
        let launches = Arc::new(AtomicUsize::new(0));
        let mut harvester = CaptchaHarvester::with_launcher(
            config(),
            Box::new(CountingLauncher {
                launches: launches.clone(),
            }),
        )
        .await
        .unwrap();

        let session = harvester.session.clone();
        tokio::spawn(async move {
            session.commit_result("tok-one".to_string());
        });

        let token = harvester.solve_captcha().await.unwrap();
        assert_eq!(token, "tok-one");
        assert_eq!(launches.load(Ordering::SeqCst), 1);

        let err = harvester.solve_captcha().await.unwrap_err();
        assert!(matches!(err, HarvesterError::InstanceReused));
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }
}
