use crate::url::parse_with_domain;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Application settings shared by every task
///
/// Every section and field has a default, so an absent or empty settings
/// file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub crawler: CrawlerSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerSettings {
    /// Static runs producing fewer accepted pages than this escalate
    #[serde(rename = "escalation-threshold", default = "default_escalation_threshold")]
    pub escalation_threshold: u64,

    /// Retries per URL after the first failed fetch
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between fetch retries (milliseconds, multiplied by attempt)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Claims older than this are presumed abandoned (seconds)
    #[serde(rename = "stuck-threshold-secs", default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,

    /// Period of the stuck-entry watchdog (seconds)
    #[serde(rename = "watchdog-interval-secs", default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,

    /// Reopen attempts after a frontier storage fault
    #[serde(rename = "max-recovery-attempts", default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// How long the dispatch loop waits before re-polling an idle frontier (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Persisted pages smaller than this many bytes are rejected
    #[serde(rename = "min-content-bytes", default = "default_min_content_bytes")]
    pub min_content_bytes: u64,

    /// Timeout for a single fetch (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Directory layout configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    /// Directory holding one sub-directory per task (config + frontier)
    #[serde(rename = "tasks-dir", default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,

    /// Directory holding one sub-directory of captured pages per task
    #[serde(rename = "output-dir", default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name", default = "default_crawler_name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version", default = "default_crawler_version")]
    pub crawler_version: String,
}

impl CrawlerSettings {
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Longest time one URL can spend in `fetch_with_retry`
    ///
    /// A rendered attempt may wait `request-timeout` for the tab to open and
    /// again for navigation, plus up to a second for the page to settle.
    /// Retry backoff is linear, `retry-delay * n` before the n-th retry.
    pub fn fetch_budget(&self) -> Duration {
        let attempts = self.max_retries + 1;
        let per_attempt = self.request_timeout() * 2 + Duration::from_secs(1);
        let backoff_steps = self.max_retries * (self.max_retries + 1) / 2;
        per_attempt * attempts + self.retry_delay() * backoff_steps
    }
}

impl UserAgentConfig {
    /// Formats the User-Agent header value: `Name/Version`
    pub fn header_value(&self) -> String {
        format!("{}/{}", self.crawler_name, self.crawler_version)
    }
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            max_recovery_attempts: default_max_recovery_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            min_content_bytes: default_min_content_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            tasks_dir: default_tasks_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: default_crawler_name(),
            crawler_version: default_crawler_version(),
        }
    }
}

fn default_escalation_threshold() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_stuck_threshold_secs() -> u64 {
    300
}

fn default_watchdog_interval_secs() -> u64 {
    15
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_min_content_bytes() -> u64 {
    50 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasksConfig")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_crawler_name() -> String {
    "ProductScout".to_string()
}

fn default_crawler_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Fetch strategy a task currently crawls with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Plain HTTP GET of the static HTML
    Static,
    /// Headless browser; sees JavaScript-rendered markup
    Rendered,
}

impl StrategyKind {
    /// The strategy to escalate to, if any
    pub fn escalated(&self) -> Option<StrategyKind> {
        match self {
            Self::Static => Some(Self::Rendered),
            Self::Rendered => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Rendered => "rendered",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Self::Static),
            "rendered" => Some(Self::Rendered),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One crawl task, stored as `<tasks-dir>/<id>/<id>.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    /// Stable identifier, normally the start URL's host
    pub id: String,

    /// Where the crawl begins; also the re-seed URL after storage loss
    pub start_url: String,

    /// Cap on accepted product pages
    pub max_accepted: u64,

    /// Number of URLs processed concurrently
    pub concurrency: u32,

    /// CSS selectors; a page matching any of them is a product page
    #[serde(default)]
    pub selectors: Vec<String>,

    /// Current fetch strategy, switched to `rendered` on escalation
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Proxy URLs handed to the fetch strategies
    #[serde(default)]
    pub proxies: Vec<String>,

    /// Overrides `<output-dir>/<id>` for this task's captured pages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Static
}

/// Selectors a new task starts with
pub const DEFAULT_SELECTORS: &[&str] = &[".product", ".item", ".product-item"];

/// Accepted-page cap of a new task
pub const DEFAULT_MAX_ACCEPTED: u64 = 1000;

/// Worker count of a new task
pub const DEFAULT_CONCURRENCY: u32 = 5;

impl Task {
    /// Builds a task with default limits and selectors for a start URL
    ///
    /// The task id is the start URL's lowercase host.
    pub fn from_start_url(start_url: &str) -> Result<Self, ConfigError> {
        let (url, id) =
            parse_with_domain(start_url).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            id,
            start_url: url.to_string(),
            max_accepted: DEFAULT_MAX_ACCEPTED,
            concurrency: DEFAULT_CONCURRENCY,
            selectors: DEFAULT_SELECTORS.iter().map(|s| s.to_string()).collect(),
            strategy: StrategyKind::Static,
            proxies: Vec::new(),
            output_dir: None,
        })
    }

    /// Directory this task's accepted pages are written to
    pub fn output_path(&self, paths: &PathSettings) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| paths.output_dir.join(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_empty_toml() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.crawler.escalation_threshold, 20);
        assert_eq!(settings.crawler.max_retries, 3);
        assert_eq!(settings.crawler.min_content_bytes, 51_200);
        assert_eq!(settings.paths.tasks_dir, PathBuf::from("tasksConfig"));
        assert_eq!(settings.user_agent.crawler_name, "ProductScout");
    }

    #[test]
    fn test_partial_settings_keep_other_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[crawler]
stuck-threshold-secs = 5
"#,
        )
        .unwrap();
        assert_eq!(settings.crawler.stuck_threshold(), Duration::from_secs(5));
        assert_eq!(settings.crawler.watchdog_interval_secs, 15);
    }

    #[test]
    fn test_fetch_budget() {
        let crawler = CrawlerSettings::default();
        // 4 attempts of 61s plus 0.5 + 1.0 + 1.5s of backoff
        assert_eq!(crawler.fetch_budget(), Duration::from_millis(247_000));
        assert!(crawler.fetch_budget() < crawler.stuck_threshold());

        let single = CrawlerSettings {
            max_retries: 0,
            request_timeout_secs: 5,
            ..CrawlerSettings::default()
        };
        assert_eq!(single.fetch_budget(), Duration::from_secs(11));
    }

    #[test]
    fn test_task_from_start_url() {
        let task = Task::from_start_url("https://Shop.Example.com/catalog").unwrap();
        assert_eq!(task.id, "shop.example.com");
        assert_eq!(task.start_url, "https://shop.example.com/catalog");
        assert_eq!(task.max_accepted, 1000);
        assert_eq!(task.concurrency, 5);
        assert_eq!(task.selectors, vec![".product", ".item", ".product-item"]);
        assert_eq!(task.strategy, StrategyKind::Static);
    }

    #[test]
    fn test_task_from_invalid_url() {
        assert!(matches!(
            Task::from_start_url("not a url"),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_task_toml_roundtrip_uses_kebab_case() {
        let task = Task::from_start_url("https://example.com/").unwrap();
        let text = toml::to_string_pretty(&task).unwrap();
        assert!(text.contains("max-accepted = 1000"));
        assert!(text.contains("strategy = \"static\""));
        let parsed: Task = toml::from_str(&text).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_output_path_default_and_override() {
        let paths = PathSettings::default();
        let mut task = Task::from_start_url("https://example.com/").unwrap();
        assert_eq!(task.output_path(&paths), PathBuf::from("output/example.com"));

        task.output_dir = Some(PathBuf::from("/data/pages"));
        assert_eq!(task.output_path(&paths), PathBuf::from("/data/pages"));
    }

    #[test]
    fn test_strategy_escalation() {
        assert_eq!(StrategyKind::Static.escalated(), Some(StrategyKind::Rendered));
        assert_eq!(StrategyKind::Rendered.escalated(), None);
    }
}
