//! Configuration module for Product-Scout
//!
//! Two kinds of TOML files are handled here: the optional application
//! settings file (crawler tuning, directory layout, user agent) and one task
//! file per crawl target.
//!
//! # Example
//!
//! ```no_run
//! use product_scout::config::{load_settings_or_default, DirTaskStore, TaskStore};
//!
//! let settings = load_settings_or_default(None).unwrap();
//! let store = DirTaskStore::new(&settings.paths.tasks_dir);
//! for id in store.list().unwrap() {
//!     let task = store.load(&id).unwrap();
//!     println!("{} -> {} ({})", task.id, task.start_url, task.strategy);
//! }
//! ```

mod parser;
mod store;
mod types;
mod validation;

// Re-export types
pub use types::{
    CrawlerSettings, PathSettings, Settings, StrategyKind, Task, UserAgentConfig,
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ACCEPTED, DEFAULT_SELECTORS,
};

// Re-export parser, validation and store
pub use parser::{compute_config_hash, load_settings, load_settings_or_default, load_task, save_task};
pub use store::{DirTaskStore, TaskStore, FRONTIER_FILE};
pub use validation::{validate_settings, validate_task};
