//! Output module for captured pages and reports
//!
//! This module handles:
//! - Writing accepted product pages with their provenance marker
//! - Generating sitemaps from the captured pages
//! - Printing task reports and status

pub mod sitemap;
pub mod stats;
pub mod writer;

pub use sitemap::{generate_all_sitemaps, generate_site_sitemap, SitemapOutcome};
pub use stats::{print_reports, print_task_list, print_task_status, TaskReport, TaskSnapshot};
pub use writer::{embed_original_url, output_file, OutputWriter};
