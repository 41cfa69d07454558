//! Integration tests for task orchestration
//!
//! These tests drive `TaskController` with scripted fetch strategies so
//! escalation, cancellation and task isolation can be checked without a
//! network or a browser.

use async_trait::async_trait;
use product_scout::config::{CrawlerSettings, PathSettings, Settings, Task, TaskStore};
use product_scout::crawler::{
    CancelFlag, FetchError, FetchStrategy, FetchedPage, StrategyProvider,
};
use product_scout::storage::Frontier;
use product_scout::tasks::TaskController;
use product_scout::{ScoutError, StrategyKind, TaskState};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const START: &str = "https://shop.example.com/";

/// Serves a fixed set of pages; unknown URLs fail
struct ScriptedFetch {
    kind: StrategyKind,
    pages: HashMap<String, String>,
    cancel_on_fetch: Option<CancelFlag>,
}

#[async_trait]
impl FetchStrategy for ScriptedFetch {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if let Some(cancel) = &self.cancel_on_fetch {
            cancel.cancel();
        }
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                final_url: url.to_string(),
                status_code: 200,
                body: body.clone(),
            }),
            None => Err(FetchError::NetworkFailure("HTTP 404".to_string())),
        }
    }
}

/// Hands out scripted strategies and records which kinds were requested
#[derive(Default)]
struct ScriptedProvider {
    static_pages: HashMap<String, String>,
    rendered_pages: HashMap<String, String>,
    cancel_on_fetch: Mutex<Option<CancelFlag>>,
    requested: Mutex<Vec<StrategyKind>>,
}

impl ScriptedProvider {
    fn requested(&self) -> Vec<StrategyKind> {
        self.requested.lock().unwrap().clone()
    }
}

impl StrategyProvider for ScriptedProvider {
    fn strategy_for(
        &self,
        kind: StrategyKind,
        _task: &Task,
    ) -> Result<Arc<dyn FetchStrategy>, FetchError> {
        self.requested.lock().unwrap().push(kind);
        let pages = match kind {
            StrategyKind::Static => self.static_pages.clone(),
            StrategyKind::Rendered => self.rendered_pages.clone(),
        };
        Ok(Arc::new(ScriptedFetch {
            kind,
            pages,
            cancel_on_fetch: self.cancel_on_fetch.lock().unwrap().clone(),
        }))
    }
}

fn create_test_settings(root: &Path, escalation_threshold: u64) -> Settings {
    Settings {
        crawler: CrawlerSettings {
            escalation_threshold,
            max_retries: 0,
            poll_interval_ms: 10,
            min_content_bytes: 0,
            ..CrawlerSettings::default()
        },
        paths: PathSettings {
            tasks_dir: root.join("tasks"),
            output_dir: root.join("output"),
        },
        ..Settings::default()
    }
}

fn html(product: bool, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!("<a href=\"{}\">link</a>", href))
        .collect();
    format!(
        "<html><head></head><body>{}{}</body></html>",
        if product { "<div class=\"product\"></div>" } else { "" },
        anchors
    )
}

fn pages(entries: &[(&str, String)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(url, body)| (url.to_string(), body.clone()))
        .collect()
}

/// A static run that finds one product page out of three
fn low_yield_provider() -> ScriptedProvider {
    ScriptedProvider {
        static_pages: pages(&[
            (START, html(false, &["/a", "/b"])),
            ("https://shop.example.com/a", html(true, &[])),
            ("https://shop.example.com/b", html(false, &[])),
        ]),
        ..ScriptedProvider::default()
    }
}

fn controller(temp: &TempDir, threshold: u64, provider: Arc<ScriptedProvider>) -> TaskController {
    TaskController::with_strategies(create_test_settings(temp.path(), threshold), provider)
}

#[tokio::test]
async fn test_low_yield_escalates_exactly_once() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(low_yield_provider());
    let controller = controller(&temp, 5, provider.clone());
    let task = controller.create_task(START).unwrap();

    let report = controller.start_task(&task.id).await.unwrap();

    assert_eq!(report.status, TaskState::Completed);
    assert!(report.escalated);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.strategy, StrategyKind::Rendered);
    assert_eq!(
        provider.requested(),
        vec![StrategyKind::Static, StrategyKind::Rendered]
    );

    let saved = controller.store().load(&task.id).unwrap();
    assert_eq!(saved.strategy, StrategyKind::Rendered);

    // A rendered task never escalates again
    let again = controller.start_task(&task.id).await.unwrap();
    assert!(!again.escalated);
    assert_eq!(
        provider.requested(),
        vec![
            StrategyKind::Static,
            StrategyKind::Rendered,
            StrategyKind::Rendered
        ]
    );
}

#[tokio::test]
async fn test_sufficient_yield_does_not_escalate() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(low_yield_provider());
    let controller = controller(&temp, 1, provider.clone());
    let task = controller.create_task(START).unwrap();

    let report = controller.start_task(&task.id).await.unwrap();

    assert_eq!(report.status, TaskState::Completed);
    assert!(!report.escalated);
    assert_eq!(provider.requested(), vec![StrategyKind::Static]);
    assert_eq!(
        controller.store().load(&task.id).unwrap().strategy,
        StrategyKind::Static
    );
}

#[tokio::test]
async fn test_cap_reached_does_not_escalate() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(low_yield_provider());
    let controller = controller(&temp, 5, provider.clone());

    let mut task = controller.create_task(START).unwrap();
    task.max_accepted = 1;
    controller.store().save(&task).unwrap();

    let report = controller.start_task(&task.id).await.unwrap();

    assert_eq!(report.status, TaskState::Completed);
    assert_eq!(report.accepted, 1);
    assert!(!report.escalated);
    assert_eq!(provider.requested(), vec![StrategyKind::Static]);
}

#[tokio::test]
async fn test_escalation_does_not_refetch_visited_urls() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider {
        // The static fetch of the product page yields nothing
        static_pages: pages(&[(START, html(false, &["/item"]))]),
        rendered_pages: pages(&[("https://shop.example.com/item", html(true, &[]))]),
        ..ScriptedProvider::default()
    });
    let controller = controller(&temp, 5, provider.clone());
    let task = controller.create_task(START).unwrap();

    let report = controller.start_task(&task.id).await.unwrap();

    // /item failed under the static strategy and is not fetched again
    assert!(report.escalated);
    assert_eq!(
        provider.requested(),
        vec![StrategyKind::Static, StrategyKind::Rendered]
    );
    assert_eq!(report.accepted, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(controller.status(&task.id).unwrap().counts.visited, 2);
}

#[tokio::test]
async fn test_cancel_after_first_claim_is_resumable() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider {
        static_pages: pages(&[(START, html(false, &[]))]),
        ..ScriptedProvider::default()
    });
    let controller = controller(&temp, 0, provider.clone());

    // The first fetch stops the task
    *provider.cancel_on_fetch.lock().unwrap() = Some(controller.cancel_flag());

    let mut task = controller.create_task(START).unwrap();
    task.concurrency = 1;
    controller.store().save(&task).unwrap();

    {
        let frontier =
            Frontier::open_path(&controller.store().frontier_path(&task.id), task.max_accepted)
                .unwrap();
        for n in 1..=4 {
            frontier
                .enqueue(&format!("https://shop.example.com/p/{}", n))
                .unwrap();
        }
    }

    let report = controller.start_task(&task.id).await.unwrap();

    assert_eq!(report.status, TaskState::Cancelled);
    assert_eq!(report.dispatched, 1);
    assert!(report.summary_line().contains("stopped, resumable"));

    let counts = controller.status(&task.id).unwrap().counts;
    assert_eq!(counts.done, 1);
    assert_eq!(counts.pending, 4);
    assert_eq!(counts.claimed, 0);
}

#[tokio::test]
async fn test_busy_task_is_refused() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(low_yield_provider());
    let controller = controller(&temp, 0, provider.clone());
    let task = controller.create_task(START).unwrap();

    let frontier =
        Frontier::open_path(&controller.store().frontier_path(&task.id), task.max_accepted)
            .unwrap();
    frontier
        .acquire_lock("another-invocation", Duration::from_secs(600))
        .unwrap();

    let err = controller.start_task(&task.id).await.unwrap_err();
    assert!(matches!(err, ScoutError::TaskBusy(id) if id == task.id));
    assert!(provider.requested().is_empty());
}

#[tokio::test]
async fn test_one_failing_task_does_not_affect_others() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(low_yield_provider());
    let controller = controller(&temp, 0, provider);
    let task = controller.create_task(START).unwrap();

    let reports = controller
        .start_tasks(&["missing.example.com".to_string(), task.id.clone()])
        .await;

    assert_eq!(reports.len(), 2);
    assert!(reports[0].is_failure());
    assert_eq!(reports[1].status, TaskState::Completed);
    assert_eq!(reports[1].accepted, 1);
}
