//! Parsed documents
//!
//! Both fetch strategies produce HTML, so one concrete document type serves
//! both. The `Document` trait is what the classifier and the link filter
//! see.
//!
//! `scraper::Html` is not `Send`; documents are built and consumed
//! synchronously between two awaits and never cross one.

use crate::crawler::classifier::SelectorRule;
use scraper::{Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Errors turning a fetched body into a document
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Empty response body")]
    Empty,

    #[error("Response body is not HTML")]
    NotHtml,
}

/// A page the crawler can classify and extract links from
pub trait Document {
    /// Returns true if at least one node matches the rule
    fn matches(&self, rule: &SelectorRule) -> bool;

    /// Absolute http(s) links to follow, deduplicated, in document order
    fn links(&self) -> Vec<String>;

    /// The markup as fetched
    fn html(&self) -> &str;
}

/// A parsed HTML page
pub struct HtmlDocument {
    source: String,
    dom: Html,
    base_url: Url,
}

impl HtmlDocument {
    /// Parses a fetched body
    ///
    /// `base_url` is the page's final URL; relative links resolve against it.
    ///
    /// # Example
    ///
    /// ```
    /// use product_scout::crawler::{Document, HtmlDocument};
    /// use url::Url;
    ///
    /// let base = Url::parse("https://shop.example.com/list").unwrap();
    /// let doc = HtmlDocument::parse(r#"<a href="/item/1">One</a>"#.to_string(), base).unwrap();
    /// assert_eq!(doc.links(), vec!["https://shop.example.com/item/1"]);
    /// ```
    pub fn parse(body: String, base_url: Url) -> Result<Self, DocumentError> {
        if body.trim().is_empty() {
            return Err(DocumentError::Empty);
        }

        // Binary payloads served with a wrong content type
        if body.contains('\0') || !body.contains('<') {
            return Err(DocumentError::NotHtml);
        }

        let dom = Html::parse_document(&body);
        Ok(Self {
            source: body,
            dom,
            base_url,
        })
    }

    /// Returns the document's markup, consuming it
    pub fn into_html(self) -> String {
        self.source
    }

    fn collect_hrefs(&self, selector: &str, links: &mut Vec<String>, seen: &mut HashSet<String>) {
        let Ok(selector) = Selector::parse(selector) else {
            return;
        };

        for element in self.dom.select(&selector) {
            // Skip if it has the download attribute
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, &self.base_url) {
                    if seen.insert(absolute_url.clone()) {
                        links.push(absolute_url);
                    }
                }
            }
        }
    }
}

impl Document for HtmlDocument {
    fn matches(&self, rule: &SelectorRule) -> bool {
        self.dom.select(rule.selector()).next().is_some()
    }

    /// # Link Extraction Rules
    ///
    /// **Include:**
    /// - `<a href="...">` tags
    /// - `<link rel="canonical" href="...">`
    ///
    /// **Exclude:**
    /// - `<a href="..." download>`
    /// - `javascript:`, `mailto:`, `tel:` links
    /// - Data URIs
    /// - Fragment-only anchors
    fn links(&self) -> Vec<String> {
        let mut links = Vec::new();
        let mut seen = HashSet::new();
        self.collect_hrefs("a[href]", &mut links, &mut seen);
        self.collect_hrefs("link[rel='canonical'][href]", &mut links, &mut seen);
        links
    }

    fn html(&self) -> &str {
        &self.source
    }
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if matches!(absolute_url.scheme(), "http" | "https") => {
            Some(absolute_url.to_string())
        }
        _ => None,
    }
}
