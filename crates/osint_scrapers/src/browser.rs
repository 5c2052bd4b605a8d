//! Scripted page rendering through the Chrome DevTools protocol.
//!
//! Every render gets its own browser session which is torn down before the
//! call returns, whatever happened in between.

use std::time::Duration;

use osint_core::config::BrowserSettings;
use osint_core::profile::ScriptInjection;
use osint_core::{Error, Result};

/// Interval between checks of the readiness flag set by injection scripts.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Expression that turns true once an injection script has finished.
pub const READY_FLAG: &str = "document.osinterReady === true";

/// Upper bound on readiness checks for a given timeout.
pub fn max_ready_polls(timeout: Duration) -> u32 {
    let polls = timeout.as_millis() / READY_POLL_INTERVAL.as_millis().max(1);
    (polls as u32).max(1)
}

#[cfg(feature = "browser")]
pub use chrome::render;

#[cfg(not(feature = "browser"))]
pub async fn render(_settings: &BrowserSettings, url: &str, _injections: &[ScriptInjection]) -> Result<String> {
    Err(Error::Browser(format!(
        "cannot render {}: built without browser support",
        url
    )))
}

#[cfg(feature = "browser")]
mod chrome {
    use super::*;

    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    struct Session {
        browser: Browser,
        handler: JoinHandle<()>,
        remote: bool,
    }

    impl Session {
        async fn open(settings: &BrowserSettings) -> Result<Self> {
            let remote = settings.remote_url.is_some();
            let (browser, mut handler) = match &settings.remote_url {
                Some(remote_url) => {
                    let ws_url = websocket_url(remote_url).await?;
                    info!(url = %ws_url, "connecting to remote browser");
                    Browser::connect(ws_url)
                        .await
                        .map_err(|e| Error::Browser(format!("cannot connect to browser: {}", e)))?
                }
                None => {
                    let mut builder = BrowserConfig::builder();
                    if let Some(path) = &settings.executable {
                        builder = builder.chrome_executable(path);
                    }
                    // with_head means NOT headless
                    if !settings.headless {
                        builder = builder.with_head();
                    }
                    let config = builder
                        .arg("--no-sandbox")
                        .arg("--disable-gpu")
                        .arg("--disable-dev-shm-usage")
                        .arg("--no-first-run")
                        .build()
                        .map_err(|e| Error::Browser(format!("invalid browser config: {}", e)))?;
                    debug!(headless = settings.headless, "launching browser");
                    Browser::launch(config)
                        .await
                        .map_err(|e| Error::Browser(format!("cannot launch browser: {}", e)))?
                }
            };

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            Ok(Self {
                browser,
                handler,
                remote,
            })
        }

        async fn close(mut self) {
            if !self.remote {
                if let Err(e) = self.browser.close().await {
                    warn!(error = %e, "closing browser failed");
                }
                let _ = self.browser.wait().await;
            }
            self.handler.abort();
        }
    }

    async fn websocket_url(remote_url: &str) -> Result<String> {
        if remote_url.starts_with("ws://") || remote_url.starts_with("wss://") {
            return Ok(remote_url.to_string());
        }
        let version_url = format!("{}/json/version", remote_url.trim_end_matches('/'));
        let version: serde_json::Value = reqwest::get(&version_url).await?.json().await?;
        version
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Browser(format!("no webSocketDebuggerUrl at {}", version_url)))
    }

    async fn wait_until_ready(page: &Page, injection: &ScriptInjection, timeout: Duration) -> Result<()> {
        for _ in 0..max_ready_polls(timeout) {
            let ready = page
                .evaluate(READY_FLAG)
                .await
                .map_err(|e| Error::Browser(format!("readiness check failed: {}", e)))?
                .into_value::<bool>()
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        Err(Error::Browser(format!(
            "injection \"{}\" did not signal readiness within {:?}",
            injection.name, timeout
        )))
    }

    async fn render_page(page: &Page, settings: &BrowserSettings, injections: &[ScriptInjection]) -> Result<String> {
        tokio::time::sleep(settings.settle_time).await;

        for injection in injections {
            debug!(injection = %injection.name, "running injection");
            page.evaluate(injection.source.as_str())
                .await
                .map_err(|e| Error::Browser(format!("injection \"{}\" failed: {}", injection.name, e)))?;
            wait_until_ready(page, injection, settings.injection_timeout).await?;
        }

        page.content()
            .await
            .map_err(|e| Error::Browser(format!("cannot read page content: {}", e)))
    }

    pub async fn render(settings: &BrowserSettings, url: &str, injections: &[ScriptInjection]) -> Result<String> {
        let session = Session::open(settings).await?;

        let result = match session.browser.new_page(url).await {
            Ok(page) => {
                let result = render_page(&page, settings, injections).await;
                if let Err(e) = page.close().await {
                    warn!(url, error = %e, "closing page failed");
                }
                result
            }
            Err(e) => Err(Error::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        };

        session.close().await;
        result
    }
}
