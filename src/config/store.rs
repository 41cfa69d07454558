//! On-disk layout of task definitions
//!
//! ```text
//! <tasks-dir>/
//!   <id>/
//!     <id>.toml      task definition
//!     frontier.db    frontier, visited set, counters, run records
//! ```

use crate::config::parser::{compute_config_hash, load_task, save_task};
use crate::config::types::Task;
use crate::ConfigError;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of a task's frontier database inside its directory
pub const FRONTIER_FILE: &str = "frontier.db";

/// Persistence of task definitions
///
/// The coordinator writes the escalated strategy back through this trait so
/// the next start resumes with it.
pub trait TaskStore: Send + Sync {
    /// Loads one task by id
    fn load(&self, id: &str) -> Result<Task, ConfigError>;

    /// Creates or overwrites a task definition
    fn save(&self, task: &Task) -> Result<(), ConfigError>;

    /// Returns true if a definition exists for `id`
    fn exists(&self, id: &str) -> bool;

    /// Ids of all stored tasks, sorted
    fn list(&self) -> Result<Vec<String>, ConfigError>;

    /// Hash of the stored definition, recorded with each crawl run
    fn config_hash(&self, id: &str) -> Result<String, ConfigError>;

    /// Loads every stored task; unreadable definitions are logged and skipped
    fn load_all(&self) -> Result<Vec<Task>, ConfigError> {
        let mut tasks = Vec::new();
        for id in self.list()? {
            match self.load(&id) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping task '{}': {}", id, e),
            }
        }
        Ok(tasks)
    }
}

/// Task store rooted at the `tasks-dir` directory
#[derive(Debug, Clone)]
pub struct DirTaskStore {
    root: PathBuf,
}

impl DirTaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything belonging to one task
    pub fn task_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Path of the task's TOML definition
    pub fn task_file(&self, id: &str) -> PathBuf {
        self.task_dir(id).join(format!("{}.toml", id))
    }

    /// Path of the task's frontier database
    pub fn frontier_path(&self, id: &str) -> PathBuf {
        self.task_dir(id).join(FRONTIER_FILE)
    }
}

impl TaskStore for DirTaskStore {
    fn load(&self, id: &str) -> Result<Task, ConfigError> {
        let task = load_task(&self.task_file(id))?;
        if task.id != id {
            return Err(ConfigError::Validation(format!(
                "task file for '{}' declares id '{}'",
                id, task.id
            )));
        }
        Ok(task)
    }

    fn save(&self, task: &Task) -> Result<(), ConfigError> {
        save_task(task, &self.task_file(&task.id))
    }

    fn exists(&self, id: &str) -> bool {
        self.task_file(id).is_file()
    }

    fn list(&self) -> Result<Vec<String>, ConfigError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            if self.exists(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn config_hash(&self, id: &str) -> Result<String, ConfigError> {
        compute_config_hash(&self.task_file(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let store = DirTaskStore::new("/srv/tasks");
        assert_eq!(
            store.task_file("example.com"),
            Path::new("/srv/tasks/example.com/example.com.toml")
        );
        assert_eq!(
            store.frontier_path("example.com"),
            Path::new("/srv/tasks/example.com/frontier.db")
        );
    }

    #[test]
    fn test_save_load_list() {
        let dir = TempDir::new().unwrap();
        let store = DirTaskStore::new(dir.path());

        assert!(store.list().unwrap().is_empty());

        let b = Task::from_start_url("https://b.example.com/").unwrap();
        let a = Task::from_start_url("https://a.example.com/").unwrap();
        store.save(&b).unwrap();
        store.save(&a).unwrap();

        // Stray files and directories without a task file are ignored
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert!(store.exists("a.example.com"));
        assert!(!store.exists("scratch"));
        assert_eq!(
            store.list().unwrap(),
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
        assert_eq!(store.load("b.example.com").unwrap(), b);
    }

    #[test]
    fn test_saving_updates_hash() {
        let dir = TempDir::new().unwrap();
        let store = DirTaskStore::new(dir.path());
        let mut task = Task::from_start_url("https://example.com/").unwrap();

        store.save(&task).unwrap();
        let before = store.config_hash(&task.id).unwrap();

        task.strategy = StrategyKind::Rendered;
        store.save(&task).unwrap();
        let after = store.config_hash(&task.id).unwrap();

        assert_ne!(before, after);
        assert_eq!(
            store.load(&task.id).unwrap().strategy,
            StrategyKind::Rendered
        );
    }

    #[test]
    fn test_load_all_skips_broken_files() {
        let dir = TempDir::new().unwrap();
        let store = DirTaskStore::new(dir.path());
        store
            .save(&Task::from_start_url("https://good.example.com/").unwrap())
            .unwrap();

        let broken = store.task_file("broken");
        std::fs::create_dir_all(broken.parent().unwrap()).unwrap();
        std::fs::write(&broken, "max-accepted = \"many\"").unwrap();

        let tasks = store.load_all().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "good.example.com");
    }

    #[test]
    fn test_load_missing_task() {
        let dir = TempDir::new().unwrap();
        let store = DirTaskStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(ConfigError::Io(_))));
    }
}
