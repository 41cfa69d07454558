use crate::config::types::{Settings, Task};
use crate::config::validation::{validate_settings, validate_task};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and validates the application settings file
///
/// # Arguments
///
/// * `path` - Path to the TOML settings file
///
/// # Returns
///
/// * `Ok(Settings)` - Successfully loaded and validated settings
/// * `Err(ConfigError)` - Failed to load, parse, or validate the settings
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Loads the settings file when one is given, built-in defaults otherwise
///
/// ```
/// use product_scout::config::load_settings_or_default;
///
/// let settings = load_settings_or_default(None).unwrap();
/// assert_eq!(settings.crawler.max_retries, 3);
/// ```
pub fn load_settings_or_default(path: Option<&Path>) -> Result<Settings, ConfigError> {
    match path {
        Some(path) => load_settings(path),
        None => Ok(Settings::default()),
    }
}

/// Loads and validates one task file
pub fn load_task(path: &Path) -> Result<Task, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let task: Task = toml::from_str(&content)?;
    validate_task(&task)?;
    Ok(task)
}

/// Validates a task and writes it as TOML, creating parent directories
pub fn save_task(task: &Task, path: &Path) -> Result<(), ConfigError> {
    validate_task(task)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(task)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Computes a SHA-256 hash of a configuration file's content
///
/// Stored with each run record so a changed task file can be spotted
/// between runs.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}
