//! Fetch strategies
//!
//! This module defines how a URL becomes HTML, including:
//! - The `FetchStrategy` seam shared by the static and rendered strategies
//! - Building HTTP clients with the crawler's user agent and proxies
//! - The static (plain HTTP GET) strategy with proxy rotation
//! - Retry with linear backoff around any strategy

use crate::config::{Settings, StrategyKind, Task};
use crate::crawler::renderer::RenderedFetch;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Proxy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A fetched page, before parsing
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// HTTP status code (200 for rendered pages)
    pub status_code: u16,
    /// Page body
    pub body: String,
}

/// Errors a fetch strategy reports for one URL
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Render failure: {0}")]
    RenderFailure(String),
}

/// One way of turning a URL into an HTML page
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// The strategy this implementation provides
    fn kind(&self) -> StrategyKind;

    /// Fetches a single URL once, without retrying
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// Releases resources held across fetches (browsers, pools)
    async fn shutdown(&self) {}
}

/// Builds the fetch strategy for a task's current strategy kind
///
/// The coordinator asks for a fresh strategy at the start of every run, so
/// an escalated task gets a rendered strategy for its second run.
pub trait StrategyProvider: Send + Sync {
    fn strategy_for(
        &self,
        kind: StrategyKind,
        task: &Task,
    ) -> Result<Arc<dyn FetchStrategy>, FetchError>;
}

/// Provides the real network strategies
#[derive(Debug, Clone)]
pub struct HttpStrategies {
    settings: Settings,
}

impl HttpStrategies {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl StrategyProvider for HttpStrategies {
    fn strategy_for(
        &self,
        kind: StrategyKind,
        task: &Task,
    ) -> Result<Arc<dyn FetchStrategy>, FetchError> {
        match kind {
            StrategyKind::Static => Ok(Arc::new(StaticFetch::new(&self.settings, &task.proxies)?)),
            StrategyKind::Rendered => Ok(Arc::new(RenderedFetch::new(
                &self.settings,
                &task.proxies,
            ))),
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The User-Agent header value
/// * `timeout` - Whole-request timeout
/// * `proxy` - Optional proxy URL all requests go through
///
/// # Example
///
/// ```no_run
/// use product_scout::config::UserAgentConfig;
/// use product_scout::crawler::build_http_client;
/// use std::time::Duration;
///
/// let agent = UserAgentConfig::default().header_value();
/// let client = build_http_client(&agent, Duration::from_secs(30), None).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// Plain HTTP GET of the static HTML
///
/// With proxies configured, one client is built per proxy and requests
/// rotate through them round-robin.
pub struct StaticFetch {
    clients: Vec<Client>,
    next: AtomicUsize,
}

impl StaticFetch {
    pub fn new(settings: &Settings, proxies: &[String]) -> Result<Self, FetchError> {
        let user_agent = settings.user_agent.header_value();
        let timeout = settings.crawler.request_timeout();

        let clients = if proxies.is_empty() {
            vec![build_http_client(&user_agent, timeout, None)]
        } else {
            proxies
                .iter()
                .map(|proxy| build_http_client(&user_agent, timeout, Some(proxy)))
                .collect()
        };

        let clients = clients
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FetchError::NetworkFailure(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    /// Number of clients in the rotation
    pub fn pool_size(&self) -> usize {
        self.clients.len()
    }

    fn next_client(&self) -> &Client {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[index]
    }
}

#[async_trait]
impl FetchStrategy for StaticFetch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Static
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .next_client()
            .get(url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(FetchError::NetworkFailure(format!("HTTP {}", status.as_u16())));
        }

        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            body,
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::NetworkFailure(format!("Connection failed: {}", e))
    } else {
        FetchError::NetworkFailure(e.to_string())
    }
}

/// Fetches a URL, retrying failed attempts
///
/// # Retry Logic
///
/// Every error is treated as transient. After the first attempt up to
/// `max_retries` more are made, waiting `delay * attempt` before each one.
/// The last error is returned once retries are exhausted.
pub async fn fetch_with_retry(
    strategy: &dyn FetchStrategy,
    url: &str,
    max_retries: u32,
    delay: Duration,
) -> Result<FetchedPage, FetchError> {
    let mut attempt = 0;
    loop {
        match strategy.fetch(url).await {
            Ok(page) => return Ok(page),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                warn!(
                    "Fetch of {} failed ({}), retry {}/{}",
                    url, e, attempt, max_retries
                );
                tokio::time::sleep(delay * attempt).await;
            }
            Err(e) => {
                debug!("Giving up on {} after {} attempts: {}", url, attempt + 1, e);
                return Err(e);
            }
        }
    }
}
