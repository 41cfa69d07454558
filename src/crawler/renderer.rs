//! Headless browser rendering for JavaScript-heavy shops
//!
//! Uses Chrome DevTools Protocol via chromiumoxide, available with the
//! `js-rendering` feature. Without it every rendered fetch fails with a
//! `RenderFailure`, which the pipeline treats like any other fetch failure.

use crate::config::{Settings, StrategyKind};
use crate::crawler::fetcher::{FetchError, FetchStrategy, FetchedPage};
use async_trait::async_trait;
use std::time::Duration;

/// Configuration for the headless browser
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Time to wait for navigation to finish
    pub page_load_timeout: Duration,
    /// Extra wait after load for client-side rendering
    pub render_wait: Duration,
    /// Passed to Chrome as `--proxy-server`
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Disable for Docker/CI environments
    pub sandbox: bool,
}

impl RendererConfig {
    pub fn from_settings(settings: &Settings, proxies: &[String]) -> Self {
        Self {
            page_load_timeout: settings.crawler.request_timeout(),
            render_wait: Duration::from_millis(500),
            proxy: proxies.first().cloned(),
            user_agent: settings.user_agent.header_value(),
            sandbox: true,
        }
    }
}

#[cfg(feature = "js-rendering")]
mod browser_impl {
    use super::*;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tokio::time::timeout;
    use tracing::{debug, info, warn};

    /// Rendered fetch strategy backed by one lazily launched browser
    pub struct RenderedFetch {
        config: RendererConfig,
        browser: Mutex<Option<Browser>>,
        handler_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    }

    impl RenderedFetch {
        pub fn new(settings: &Settings, proxies: &[String]) -> Self {
            Self::with_config(RendererConfig::from_settings(settings, proxies))
        }

        pub fn with_config(config: RendererConfig) -> Self {
            Self {
                config,
                browser: Mutex::new(None),
                handler_handle: Mutex::new(None),
            }
        }

        async fn ensure_browser(&self) -> Result<(), FetchError> {
            let mut browser_guard = self.browser.lock().await;
            if browser_guard.is_some() {
                return Ok(());
            }

            info!("Launching headless Chrome browser");

            let mut builder = BrowserConfig::builder()
                .request_timeout(self.config.page_load_timeout)
                .arg(format!("--user-agent={}", self.config.user_agent))
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--disable-extensions");

            if let Some(proxy) = &self.config.proxy {
                builder = builder.arg(format!("--proxy-server={}", proxy));
            }

            if !self.config.sandbox {
                builder = builder.no_sandbox();
            }

            let browser_config = builder.build().map_err(|e| {
                FetchError::RenderFailure(format!("Failed to build browser config: {}", e))
            })?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| FetchError::RenderFailure(format!("Failed to launch browser: {}", e)))?;

            let handle = tokio::spawn(async move {
                while let Some(result) = handler.next().await {
                    if result.is_err() {
                        break;
                    }
                }
            });

            *browser_guard = Some(browser);
            *self.handler_handle.lock().await = Some(handle);
            Ok(())
        }
    }

    #[async_trait]
    impl FetchStrategy for RenderedFetch {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Rendered
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.ensure_browser().await?;

            // Only tab creation needs the browser; rendering runs unlocked
            let page = {
                let browser_guard = self.browser.lock().await;
                let browser = browser_guard
                    .as_ref()
                    .ok_or_else(|| FetchError::RenderFailure("Browser not running".to_string()))?;
                browser
                    .new_page(url)
                    .await
                    .map_err(|e| FetchError::RenderFailure(format!("Failed to open page: {}", e)))?
            };

            let rendered: Result<FetchedPage, FetchError> = async {
                timeout(self.config.page_load_timeout, page.wait_for_navigation())
                    .await
                    .map_err(|_| FetchError::Timeout)?
                    .map_err(|e| FetchError::RenderFailure(format!("Navigation failed: {}", e)))?;

                if !self.config.render_wait.is_zero() {
                    tokio::time::sleep(self.config.render_wait).await;
                }

                let final_url = page
                    .url()
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| url.to_string());

                let body = page.content().await.map_err(|e| {
                    FetchError::RenderFailure(format!("Failed to read content: {}", e))
                })?;

                Ok(FetchedPage {
                    final_url,
                    status_code: 200,
                    body,
                })
            }
            .await;

            if let Err(e) = page.close().await {
                warn!("Failed to close tab for {}: {}", url, e);
            }

            debug!("Rendered {}", url);
            rendered
        }

        async fn shutdown(&self) {
            if let Some(mut browser) = self.browser.lock().await.take() {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser: {}", e);
                }
            }
            if let Some(handle) = self.handler_handle.lock().await.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(feature = "js-rendering")]
pub use browser_impl::RenderedFetch;

/// Rendered strategy stand-in when the `js-rendering` feature is disabled
#[cfg(not(feature = "js-rendering"))]
pub struct RenderedFetch {
    _config: RendererConfig,
}

#[cfg(not(feature = "js-rendering"))]
impl RenderedFetch {
    pub fn new(settings: &Settings, proxies: &[String]) -> Self {
        Self::with_config(RendererConfig::from_settings(settings, proxies))
    }

    pub fn with_config(config: RendererConfig) -> Self {
        Self { _config: config }
    }
}

#[cfg(not(feature = "js-rendering"))]
#[async_trait]
impl FetchStrategy for RenderedFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rendered
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        Err(FetchError::RenderFailure(format!(
            "JavaScript rendering not available for {}. \
             Compile with --features js-rendering to enable headless browser support.",
            url
        )))
    }
}
