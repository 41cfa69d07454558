//! Crawler module for fetching and classifying product pages
//!
//! This module contains the core crawling logic, including:
//! - Static and rendered fetch strategies with retry
//! - HTML parsing, selector classification and link extraction
//! - The per-entry pipeline and the bounded dispatch loop
//! - The stuck-claim watchdog and frontier recovery
//! - Task coordination with one-time strategy escalation

mod classifier;
mod coordinator;
mod fetcher;
mod parser;
mod pipeline;
mod renderer;
mod scheduler;
mod watchdog;

pub use classifier::{is_product_page, matching_rule, SelectorRule, SelectorRules};
pub use coordinator::{run_key, Coordinator};
pub use fetcher::{
    build_http_client, fetch_with_retry, FetchError, FetchStrategy, FetchedPage, HttpStrategies,
    StaticFetch, StrategyProvider,
};
pub use parser::{Document, DocumentError, HtmlDocument};
pub use pipeline::{process_entry, EntryOutcome, RunContext, RunCounters};
pub use renderer::{RenderedFetch, RendererConfig};
pub use scheduler::{CancelFlag, RunSummary, Scheduler};
pub use watchdog::{StorageRecovery, TickOutcome, Watchdog, WatchdogHandle};
