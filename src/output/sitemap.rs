//! Sitemap generation from captured pages
//!
//! Every `*.txt` capture under `<output-dir>/<site>/` carries the URL it was
//! fetched from in its `original-url` meta tag. Those URLs become the
//! site's `sitemap.xml` (sitemaps.org protocol 0.9).

use crate::output::writer::ORIGINAL_URL_META;
use crate::ScoutError;
use chrono::{SecondsFormat, Utc};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of a generated sitemap
pub const SITEMAP_FILE: &str = "sitemap.xml";

/// Result of generating one site's sitemap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapOutcome {
    /// Sitemap written with this many URLs
    Written { path: PathBuf, urls: usize },
    /// The site has captures but none carried a marker
    NoUrls,
    /// `<output-dir>/<site>` does not exist
    MissingSite,
}

/// Generates the sitemap of every site directory under `output_root`
///
/// A failure for one site is reported in its result and does not stop the
/// others.
pub fn generate_all_sitemaps(
    output_root: &Path,
) -> Result<Vec<(String, Result<SitemapOutcome, ScoutError>)>, ScoutError> {
    if !output_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut sites = Vec::new();
    for entry in fs::read_dir(output_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            sites.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    sites.sort();

    Ok(sites
        .into_iter()
        .map(|site| {
            let outcome = generate_site_sitemap(output_root, &site);
            if let Err(e) = &outcome {
                warn!("Sitemap generation for {} failed: {}", site, e);
            }
            (site, outcome)
        })
        .collect())
}

/// Generates `<output_root>/<site>/sitemap.xml`
pub fn generate_site_sitemap(output_root: &Path, site: &str) -> Result<SitemapOutcome, ScoutError> {
    let site_dir = output_root.join(site);
    if !site_dir.is_dir() {
        return Ok(SitemapOutcome::MissingSite);
    }

    let urls = collect_original_urls(&site_dir)?;
    if urls.is_empty() {
        info!("No captured URLs found for {}", site);
        return Ok(SitemapOutcome::NoUrls);
    }

    let lastmod = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let xml = render_sitemap(urls.iter().map(String::as_str), &lastmod);
    let path = site_dir.join(SITEMAP_FILE);
    fs::write(&path, xml)?;

    info!(
        "Sitemap for {} written with {} URLs: {}",
        site,
        urls.len(),
        path.display()
    );
    Ok(SitemapOutcome::Written {
        path,
        urls: urls.len(),
    })
}

/// Reads the provenance URL of every capture in a site directory
///
/// Unreadable files are logged and skipped. The result is de-duplicated and
/// sorted.
pub fn collect_original_urls(site_dir: &Path) -> Result<BTreeSet<String>, ScoutError> {
    let selector = Selector::parse(&format!("meta[name=\"{}\"][content]", ORIGINAL_URL_META))
        .map_err(|e| ScoutError::Output(format!("marker selector: {}", e)))?;

    let mut urls = BTreeSet::new();
    for entry in fs::read_dir(site_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
            continue;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if let Some(url) = original_url(&content, &selector) {
            urls.insert(url);
        }
    }

    Ok(urls)
}

fn original_url(content: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(content);
    document
        .select(selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Renders a sitemaps.org 0.9 `urlset`
pub fn render_sitemap<'a>(urls: impl IntoIterator<Item = &'a str>, lastmod: &str) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );

    for url in urls {
        xml.push_str("  <url>\n");
        xml.push_str(&format!("    <loc>{}</loc>\n", escape_xml(url)));
        xml.push_str(&format!("    <lastmod>{}</lastmod>\n", lastmod));
        xml.push_str("    <changefreq>weekly</changefreq>\n");
        xml.push_str("    <priority>0.8</priority>\n");
        xml.push_str("  </url>\n");
    }

    xml.push_str("</urlset>\n");
    xml
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
