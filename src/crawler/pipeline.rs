//! Per-entry processing
//!
//! A claimed frontier entry goes through: cancel check, visited re-check,
//! fetch with retry, parse, classify, persist, mark done, then link
//! enqueueing. Every path ends with the entry Done or back in Pending.

use crate::crawler::classifier::{is_product_page, SelectorRules};
use crate::crawler::fetcher::{fetch_with_retry, FetchStrategy, FetchedPage};
use crate::crawler::parser::{Document, DocumentError, HtmlDocument};
use crate::crawler::scheduler::CancelFlag;
use crate::output::OutputWriter;
use crate::storage::{Frontier, FrontierEntry, RunTotals, StorageError, StorageResult};
use crate::url::{is_crawlable_page, is_same_domain};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Everything a worker needs to process entries of one run
pub struct RunContext {
    pub task_id: String,
    pub run_key: String,
    pub frontier: Arc<Frontier>,
    pub strategy: Arc<dyn FetchStrategy>,
    pub rules: SelectorRules,
    pub writer: OutputWriter,
    pub output_dir: PathBuf,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cancel: CancelFlag,
    pub counters: RunCounters,
}

/// Live totals of one run, updated by concurrent workers
#[derive(Debug, Default)]
pub struct RunCounters {
    strategy_yield: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

impl RunCounters {
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accept(&self) {
        self.strategy_yield.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunTotals {
        RunTotals {
            strategy_yield: self.strategy_yield.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// How one entry left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Cancelled before work began; the entry is Pending again
    Released,
    /// The key was already visited
    AlreadyVisited,
    /// Every fetch attempt failed
    FetchFailed,
    /// The body was not a usable HTML document
    Unparseable,
    /// Not a product page, or too small to keep
    Rejected,
    /// Saved and counted toward the cap
    Accepted,
    /// A product page refused because the cap was already reached
    OverCap,
    /// The claim was taken over by the watchdog meanwhile
    Superseded,
}

/// Result of the synchronous document stage
struct Analysis {
    is_product: bool,
    links: Vec<String>,
    html: String,
}

/// Runs one claimed entry through the pipeline
///
/// Storage errors are returned to the scheduler, which hands them to the
/// recovery path. The entry then stays claimed until the watchdog requeues
/// it.
pub async fn process_entry(
    ctx: Arc<RunContext>,
    entry: FrontierEntry,
) -> StorageResult<EntryOutcome> {
    if ctx.cancel.is_cancelled() {
        ctx.frontier.release_claim(&entry)?;
        return Ok(EntryOutcome::Released);
    }

    if ctx.frontier.is_visited(&entry.normalized_key)? {
        debug!("Skipping already visited {}", entry.url);
        return finish(&ctx, &entry, false, EntryOutcome::AlreadyVisited);
    }

    ctx.counters.record_dispatch();

    let page = match fetch_with_retry(
        ctx.strategy.as_ref(),
        &entry.url,
        ctx.max_retries,
        ctx.retry_delay,
    )
    .await
    {
        Ok(page) => page,
        Err(e) => {
            warn!("[{}] Failed to fetch {}: {}", ctx.task_id, entry.url, e);
            ctx.counters.record_failure();
            return finish(&ctx, &entry, false, EntryOutcome::FetchFailed);
        }
    };

    let analysis = match analyze(page, &entry.url, &ctx.rules) {
        Ok(analysis) => analysis,
        Err(e) => {
            debug!("[{}] Ignoring {}: {}", ctx.task_id, entry.url, e);
            return finish(&ctx, &entry, false, EntryOutcome::Unparseable);
        }
    };

    let outcome = if analysis.is_product {
        match accept(&ctx, &entry, &analysis.html)? {
            Some(outcome) => outcome,
            None => return Ok(EntryOutcome::Superseded),
        }
    } else {
        match mark(&ctx, &entry, false)? {
            true => EntryOutcome::Rejected,
            false => return Ok(EntryOutcome::Superseded),
        }
    };

    let enqueued = enqueue_links(&ctx, &entry.url, &analysis.links)?;
    if enqueued > 0 {
        debug!("[{}] {} new links from {}", ctx.task_id, enqueued, entry.url);
    }

    Ok(outcome)
}

/// Parses and classifies a page without holding the DOM across an await
fn analyze(page: FetchedPage, request_url: &str, rules: &SelectorRules) -> Result<Analysis, DocumentError> {
    let base_url = Url::parse(&page.final_url)
        .or_else(|_| Url::parse(request_url))
        .map_err(|_| DocumentError::NotHtml)?;

    let document = HtmlDocument::parse(page.body, base_url)?;
    let is_product = is_product_page(&document, rules);
    let links = document.links();

    Ok(Analysis {
        is_product,
        links,
        html: document.into_html(),
    })
}

/// Persists a product page and counts it
///
/// Returns None when the claim went stale, after removing the written file.
fn accept(ctx: &RunContext, entry: &FrontierEntry, html: &str) -> StorageResult<Option<EntryOutcome>> {
    let sequence = ctx.frontier.next_sequence()?;

    let persisted = match ctx.writer.persist(html, &entry.url, &ctx.output_dir, sequence) {
        Ok(kept) => kept,
        Err(e) => {
            warn!("[{}] Failed to write page for {}: {}", ctx.task_id, entry.url, e);
            false
        }
    };

    if !persisted {
        debug!("[{}] Product page {} too small to keep", ctx.task_id, entry.url);
        return Ok(mark(ctx, entry, false)?.then_some(EntryOutcome::Rejected));
    }

    match ctx.frontier.mark_done(entry, true) {
        Ok(true) => {
            ctx.counters.record_accept();
            info!(
                "[{}] Saved product page {} as {:07}.txt",
                ctx.task_id, entry.url, sequence
            );
            Ok(Some(EntryOutcome::Accepted))
        }
        Ok(false) => {
            debug!("[{}] Cap reached, dropping {}", ctx.task_id, entry.url);
            discard(ctx, sequence);
            Ok(Some(EntryOutcome::OverCap))
        }
        Err(StorageError::InvalidTransition { .. }) => {
            debug!("[{}] Claim on {} went stale", ctx.task_id, entry.url);
            discard(ctx, sequence);
            Ok(None)
        }
        Err(e) => {
            discard(ctx, sequence);
            Err(e)
        }
    }
}

fn discard(ctx: &RunContext, sequence: u64) {
    if let Err(e) = ctx.writer.discard(&ctx.output_dir, sequence) {
        warn!("[{}] Failed to remove {:07}.txt: {}", ctx.task_id, sequence, e);
    }
}

/// Marks the entry Done; false when the claim went stale
fn mark(ctx: &RunContext, entry: &FrontierEntry, accepted: bool) -> StorageResult<bool> {
    match ctx.frontier.mark_done(entry, accepted) {
        Ok(_) => Ok(true),
        Err(StorageError::InvalidTransition { .. }) => {
            debug!("[{}] Claim on {} went stale", ctx.task_id, entry.url);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn finish(
    ctx: &RunContext,
    entry: &FrontierEntry,
    accepted: bool,
    outcome: EntryOutcome,
) -> StorageResult<EntryOutcome> {
    if mark(ctx, entry, accepted)? {
        Ok(outcome)
    } else {
        Ok(EntryOutcome::Superseded)
    }
}

/// Enqueues same-domain page links; returns how many were new
fn enqueue_links(ctx: &RunContext, page_url: &str, links: &[String]) -> StorageResult<usize> {
    let mut enqueued = 0;
    for link in links {
        if !is_same_domain(page_url, link) || !is_crawlable_page(link) {
            continue;
        }
        if ctx.frontier.enqueue(link)? {
            enqueued += 1;
        }
    }
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use crate::crawler::fetcher::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Pages(HashMap<String, String>);

    #[async_trait]
    impl FetchStrategy for Pages {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Static
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            match self.0.get(url) {
                Some(body) => Ok(FetchedPage {
                    final_url: url.to_string(),
                    status_code: 200,
                    body: body.clone(),
                }),
                None => Err(FetchError::NetworkFailure("HTTP 404".to_string())),
            }
        }
    }

    fn product_page(links: &str, padding: usize) -> String {
        format!(
            "<html><head><title>p</title></head><body><div class=\"product\">x</div>{}<p>{}</p></body></html>",
            links,
            "a".repeat(padding)
        )
    }

    fn context(dir: &TempDir, cap: u64, pages: &[(&str, String)], min_bytes: u64) -> Arc<RunContext> {
        let pages = pages
            .iter()
            .map(|(url, body)| (url.to_string(), body.clone()))
            .collect();
        Arc::new(RunContext {
            task_id: "example.com".to_string(),
            run_key: "run".to_string(),
            frontier: Arc::new(Frontier::in_memory(cap).unwrap()),
            strategy: Arc::new(Pages(pages)),
            rules: SelectorRules::compile(&[".product".to_string()]).unwrap(),
            writer: OutputWriter::new(min_bytes),
            output_dir: dir.path().to_path_buf(),
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
            cancel: CancelFlag::new(),
            counters: RunCounters::default(),
        })
    }

    fn claim(ctx: &RunContext, url: &str) -> FrontierEntry {
        ctx.frontier.enqueue(url).unwrap();
        ctx.frontier.claim_next(&ctx.run_key).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_product_page_is_saved_and_links_enqueued() {
        let dir = TempDir::new().unwrap();
        let links = r#"<a href="/b">b</a><a href="https://other.com/c">c</a><a href="/logo.png">i</a>"#;
        let ctx = context(&dir, 10, &[("https://example.com/a", product_page(links, 0))], 0);

        let entry = claim(&ctx, "https://example.com/a");
        let outcome = process_entry(ctx.clone(), entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Accepted);
        assert_eq!(ctx.frontier.accepted_count().unwrap(), 1);
        assert!(dir.path().join("0000001.txt").exists());

        let counts = ctx.frontier.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.done, 1);
        assert_eq!(ctx.counters.snapshot().strategy_yield, 1);
    }

    #[tokio::test]
    async fn test_small_product_page_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 10, &[("https://example.com/a", product_page("", 0))], 1024);

        let entry = claim(&ctx, "https://example.com/a");
        let outcome = process_entry(ctx.clone(), entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Rejected);
        assert_eq!(ctx.frontier.accepted_count().unwrap(), 0);
        assert!(!dir.path().join("0000001.txt").exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_done_and_counts() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 10, &[], 0);

        let entry = claim(&ctx, "https://example.com/missing");
        let outcome = process_entry(ctx.clone(), entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::FetchFailed);
        assert!(ctx.frontier.is_visited("https://example.com/missing").unwrap());
        assert_eq!(ctx.counters.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_cap_refusal_removes_file_but_follows_links() {
        let dir = TempDir::new().unwrap();
        let page = product_page(r#"<a href="/next">n</a>"#, 0);
        let ctx = context(&dir, 1, &[("https://example.com/a", page.clone()), ("https://example.com/b", page)], 0);

        let first = claim(&ctx, "https://example.com/a");
        let second = claim(&ctx, "https://example.com/b");

        assert_eq!(process_entry(ctx.clone(), first).await.unwrap(), EntryOutcome::Accepted);
        assert_eq!(process_entry(ctx.clone(), second).await.unwrap(), EntryOutcome::OverCap);

        assert_eq!(ctx.frontier.accepted_count().unwrap(), 1);
        assert!(dir.path().join("0000001.txt").exists());
        assert!(!dir.path().join("0000002.txt").exists());
        assert_eq!(ctx.frontier.counts().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_cancelled_entry_is_released() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 10, &[("https://example.com/a", product_page("", 0))], 0);

        let entry = claim(&ctx, "https://example.com/a");
        ctx.cancel.cancel();
        let outcome = process_entry(ctx.clone(), entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Released);
        let counts = ctx.frontier.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.done, 0);
    }

    #[tokio::test]
    async fn test_stale_claim_keeps_no_file() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 10, &[("https://example.com/a", product_page("", 0))], 0);

        let stale = claim(&ctx, "https://example.com/a");
        ctx.frontier.release_claim(&stale).unwrap();
        let fresh = ctx.frontier.claim_next("other").unwrap().unwrap();

        let outcome = process_entry(ctx.clone(), stale).await.unwrap();
        assert_eq!(outcome, EntryOutcome::Superseded);
        assert!(!dir.path().join("0000001.txt").exists());
        assert_eq!(ctx.frontier.accepted_count().unwrap(), 0);

        assert!(ctx.frontier.mark_done(&fresh, false).unwrap());
    }
}
