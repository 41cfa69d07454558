//! Product-Scout main entry point
//!
//! This is the command-line interface for the Product-Scout product page
//! crawler.

use anyhow::Context;
use clap::{Parser, Subcommand};
use product_scout::config::load_settings_or_default;
use product_scout::output::{print_reports, print_task_list, print_task_status, SitemapOutcome};
use product_scout::tasks::TaskController;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Product-Scout: a single-domain product page crawler
///
/// Product-Scout crawls one site per task, keeps every page matching the
/// task's product selectors, and escalates to a headless browser when the
/// static HTML yields too few products.
#[derive(Parser, Debug)]
#[command(name = "product-scout")]
#[command(version = "1.0.0")]
#[command(about = "A single-domain product page crawler", long_about = None)]
struct Cli {
    /// Path to the TOML settings file (defaults apply when omitted)
    #[arg(long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a task for a start URL and seed its frontier
    CreateTask {
        /// The URL the crawl starts from; its host becomes the task id
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Run one or more tasks concurrently; Ctrl-C stops them resumably
    StartTask {
        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// List every task with its accepted page count
    ListTasks,

    /// Show frontier counts and recent runs of a task
    Status {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Build sitemap.xml files from the captured pages
    GenerateSitemap {
        /// Only this site's output directory
        #[arg(long, value_name = "SITE")]
        site: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs the chosen command; `Ok(false)` means it finished with failures
async fn run(cli: Cli) -> anyhow::Result<bool> {
    if let Some(path) = &cli.settings {
        tracing::info!("Loading settings from: {}", path.display());
    }
    let settings = load_settings_or_default(cli.settings.as_deref())
        .context("Failed to load settings")?;
    let controller = TaskController::new(settings);

    match cli.command {
        Command::CreateTask { url } => {
            let task = controller.create_task(&url)?;
            println!("✓ Created task {} ({})", task.id, task.start_url);
            println!(
                "  Config: {}",
                controller.store().task_file(&task.id).display()
            );
            Ok(true)
        }
        Command::StartTask { ids } => handle_start(&controller, &ids).await,
        Command::ListTasks => {
            print_task_list(&controller.list()?);
            Ok(true)
        }
        Command::Status { id } => {
            print_task_status(&controller.status(&id)?);
            Ok(true)
        }
        Command::GenerateSitemap { site } => handle_sitemaps(&controller, site.as_deref()),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("product_scout=info,warn"),
            1 => EnvFilter::new("product_scout=debug,info"),
            2 => EnvFilter::new("product_scout=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs tasks until they finish or Ctrl-C stops them
async fn handle_start(controller: &TaskController, ids: &[String]) -> anyhow::Result<bool> {
    let cancel = controller.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            cancel.cancel();
        }
    });

    tracing::info!("Starting {} task(s)", ids.len());
    let reports = controller.start_tasks(ids).await;

    println!();
    print_reports(&reports);

    Ok(reports.iter().all(|report| !report.is_failure()))
}

/// Handles `generate-sitemap`
fn handle_sitemaps(controller: &TaskController, site: Option<&str>) -> anyhow::Result<bool> {
    let results = controller.generate_sitemaps(site)?;
    if results.is_empty() {
        println!("No output directories found.");
        return Ok(true);
    }

    let mut all_ok = true;
    for (site, outcome) in results {
        match outcome {
            Ok(SitemapOutcome::Written { path, urls }) => {
                println!("✓ {}: {} URL(s) -> {}", site, urls, path.display());
            }
            Ok(SitemapOutcome::NoUrls) => println!("  {}: no captured pages", site),
            Ok(SitemapOutcome::MissingSite) => {
                println!("✗ {}: no output directory", site);
                all_ok = false;
            }
            Err(e) => {
                println!("✗ {}: {}", site, e);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}
