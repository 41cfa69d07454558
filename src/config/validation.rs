use crate::config::types::{CrawlerSettings, PathSettings, Settings, Task, UserAgentConfig};
use crate::crawler::SelectorRules;
use crate::ConfigError;
use url::Url;

/// Validates the application settings
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    validate_crawler_settings(&settings.crawler)?;
    validate_path_settings(&settings.paths)?;
    validate_user_agent_config(&settings.user_agent)?;
    Ok(())
}

/// Validates one task definition
pub fn validate_task(task: &Task) -> Result<(), ConfigError> {
    validate_task_id(&task.id)?;

    let url = Url::parse(&task.start_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid start-url '{}': {}", task.start_url, e))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "start-url '{}' must use http or https",
            task.start_url
        )));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "start-url '{}' has no host",
            task.start_url
        )));
    }

    if task.max_accepted < 1 {
        return Err(ConfigError::Validation(format!(
            "max-accepted must be >= 1, got {}",
            task.max_accepted
        )));
    }

    if task.concurrency < 1 || task.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            task.concurrency
        )));
    }

    // Surfaces InvalidSelector for the first rule that does not parse
    SelectorRules::compile(&task.selectors)?;

    for proxy in &task.proxies {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    Ok(())
}

/// Validates crawler settings
fn validate_crawler_settings(config: &CrawlerSettings) -> Result<(), ConfigError> {
    if config.poll_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "poll-interval-ms must be >= 1".to_string(),
        ));
    }

    if config.watchdog_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "watchdog-interval-secs must be >= 1".to_string(),
        ));
    }

    if config.stuck_threshold_secs < 1 {
        return Err(ConfigError::Validation(
            "stuck-threshold-secs must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    // A claim must outlive the slowest fetch, or the watchdog requeues live work
    let budget = config.fetch_budget();
    if config.stuck_threshold() <= budget {
        return Err(ConfigError::Validation(format!(
            "stuck-threshold-secs ({}) must exceed the worst-case fetch time of {}s \
             (request-timeout-secs, max-retries, retry-delay-ms)",
            config.stuck_threshold_secs,
            budget.as_secs_f64()
        )));
    }

    Ok(())
}

/// Validates directory settings
fn validate_path_settings(config: &PathSettings) -> Result<(), ConfigError> {
    if config.tasks_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "tasks-dir cannot be empty".to_string(),
        ));
    }

    if config.output_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "output-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Ok(())
}

/// Task ids name a directory, so they must be a single safe path component
fn validate_task_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation("task id cannot be empty".to_string()));
    }

    if id == "." || id == ".." || id.starts_with('.') {
        return Err(ConfigError::Validation(format!(
            "task id '{}' cannot start with '.'",
            id
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "task id '{}' contains invalid characters",
            id
        )));
    }

    Ok(())
}
