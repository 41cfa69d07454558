//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run tasks
//! end-to-end through the real static fetch strategy.

use product_scout::config::{CrawlerSettings, PathSettings, Settings, TaskStore};
use product_scout::crawler::{FetchError, FetchStrategy, StaticFetch};
use product_scout::output::writer::ORIGINAL_URL_META;
use product_scout::output::SitemapOutcome;
use product_scout::tasks::TaskController;
use product_scout::{StrategyKind, TaskState};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates settings rooted in a temp dir with fast retries
fn create_test_settings(root: &Path, escalation_threshold: u64) -> Settings {
    Settings {
        crawler: CrawlerSettings {
            escalation_threshold,
            max_retries: 1,
            retry_delay_ms: 10,
            poll_interval_ms: 10,
            ..CrawlerSettings::default()
        },
        paths: PathSettings {
            tasks_dir: root.join("tasks"),
            output_dir: root.join("output"),
        },
        ..Settings::default()
    }
}

/// A page of roughly `size` bytes; a product page when `product` is set
fn page(size: usize, product: bool, body: &str) -> String {
    let marker = if product {
        r#"<div class="product">Item</div>"#
    } else {
        ""
    };
    format!(
        "<html><head><title>Shop</title></head><body>{}{}<p>{}</p></body></html>",
        marker,
        body,
        "x".repeat(size)
    )
}

async fn mount(server: &MockServer, route: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(status)
                .insert_header("content-type", "text/html")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// Mounts `/` linking to a large product page `/a` and a small one `/b`
async fn shop_server() -> MockServer {
    let server = MockServer::start().await;
    let links = r#"<a href="/a">A</a> <a href="/b">B</a> <a href="https://elsewhere.example/c">C</a>"#;
    mount(&server, "/", 200, page(100, false, links)).await;
    mount(&server, "/a", 200, page(60 * 1024, true, r#"<a href="/">home</a>"#)).await;
    mount(&server, "/b", 200, page(10 * 1024, true, "")).await;
    server
}

fn host(server: &MockServer) -> String {
    url::Url::parse(&server.uri())
        .expect("Failed to parse base URL")
        .host_str()
        .expect("Failed to extract host")
        .to_string()
}

fn captured_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().map(|x| x == "txt").unwrap_or(false))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = shop_server().await;
    let temp = TempDir::new().unwrap();
    let controller = TaskController::new(create_test_settings(temp.path(), 0));

    let task = controller
        .create_task(&format!("{}/", server.uri()))
        .expect("Failed to create task");
    assert_eq!(task.id, host(&server));

    let report = controller.start_task(&task.id).await.expect("Task failed");
    assert_eq!(report.status, TaskState::Completed);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.failed, 0);
    assert!(!report.escalated);

    let snapshot = controller.status(&task.id).unwrap();
    assert_eq!(snapshot.counts.visited, 3);
    assert_eq!(snapshot.counts.accepted, 1);
    assert_eq!(snapshot.counts.pending, 0);
    assert_eq!(snapshot.runs.len(), 1);

    let files = captured_files(&temp.path().join("output").join(&task.id));
    assert_eq!(files.len(), 1, "only the large product page is kept");
    let saved = fs::read_to_string(&files[0]).unwrap();
    assert!(saved.contains(&format!(
        r#"<meta name="{}" content="{}/a">"#,
        ORIGINAL_URL_META,
        server.uri()
    )));
}

#[tokio::test]
async fn test_restart_after_completion_does_no_work() {
    let server = shop_server().await;
    let temp = TempDir::new().unwrap();
    let controller = TaskController::new(create_test_settings(temp.path(), 0));
    let task = controller.create_task(&format!("{}/", server.uri())).unwrap();

    controller.start_task(&task.id).await.unwrap();
    let again = controller.start_task(&task.id).await.unwrap();

    assert_eq!(again.status, TaskState::Completed);
    assert_eq!(again.dispatched, 0);
    assert_eq!(again.accepted, 1);
    assert_eq!(controller.status(&task.id).unwrap().runs.len(), 2);
}

#[tokio::test]
async fn test_failed_fetch_is_counted_and_visited() {
    let server = MockServer::start().await;
    mount(&server, "/", 200, page(10, false, r#"<a href="/gone">gone</a>"#)).await;
    mount(&server, "/gone", 404, "not here".to_string()).await;

    let temp = TempDir::new().unwrap();
    let controller = TaskController::new(create_test_settings(temp.path(), 0));
    let task = controller.create_task(&format!("{}/", server.uri())).unwrap();

    let report = controller.start_task(&task.id).await.unwrap();
    assert_eq!(report.status, TaskState::Completed);
    assert_eq!(report.failed, 1);
    assert_eq!(report.accepted, 0);
    assert_eq!(controller.status(&task.id).unwrap().counts.visited, 2);
}

#[tokio::test]
async fn test_low_yield_escalates_and_persists_strategy() {
    let server = shop_server().await;
    let temp = TempDir::new().unwrap();
    let controller = TaskController::new(create_test_settings(temp.path(), 5));
    let task = controller.create_task(&format!("{}/", server.uri())).unwrap();

    let report = controller.start_task(&task.id).await.unwrap();
    assert_eq!(report.status, TaskState::Completed);
    assert!(report.escalated);
    assert_eq!(report.strategy, StrategyKind::Rendered);

    // The rendered run found a drained frontier and fetched nothing
    assert_eq!(report.dispatched, 3);

    let saved = controller.store().load(&task.id).unwrap();
    assert_eq!(saved.strategy, StrategyKind::Rendered);

    let runs = controller.status(&task.id).unwrap().runs;
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn test_sitemap_from_crawl_output() {
    let server = shop_server().await;
    let temp = TempDir::new().unwrap();
    let controller = TaskController::new(create_test_settings(temp.path(), 0));
    let task = controller.create_task(&format!("{}/", server.uri())).unwrap();
    controller.start_task(&task.id).await.unwrap();

    let results = controller.generate_sitemaps(Some(&task.id)).unwrap();
    assert_eq!(results.len(), 1);
    match &results[0].1 {
        Ok(SitemapOutcome::Written { path, urls }) => {
            assert_eq!(*urls, 1);
            let xml = fs::read_to_string(path).unwrap();
            assert!(xml.contains(&format!("<loc>{}/a</loc>", server.uri())));
        }
        other => panic!("unexpected sitemap outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_static_fetch_reports_http_errors() {
    let server = MockServer::start().await;
    mount(&server, "/missing", 404, "nope".to_string()).await;
    mount(&server, "/ok", 200, page(10, false, "")).await;

    let fetch = StaticFetch::new(&Settings::default(), &[]).unwrap();

    let err = fetch
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::NetworkFailure("HTTP 404".to_string()));

    let page = fetch.fetch(&format!("{}/ok", server.uri())).await.unwrap();
    assert_eq!(page.status_code, 200);
    assert!(page.final_url.ends_with("/ok"));
}
