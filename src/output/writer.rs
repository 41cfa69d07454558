//! Durable capture of accepted product pages
//!
//! Each accepted page is written as `{sequence:07}.txt` holding the page's
//! HTML with a provenance marker naming the URL it came from:
//!
//! ```text
//! <head>
//!   <meta name="original-url" content="https://shop.example.com/item/7">
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `name` attribute of the provenance meta tag
pub const ORIGINAL_URL_META: &str = "original-url";

/// Default minimum size of a persisted page (50 KiB)
pub const DEFAULT_MIN_CONTENT_BYTES: u64 = 50 * 1024;

/// Writes accepted pages and enforces the minimum content size
#[derive(Debug, Clone, Copy)]
pub struct OutputWriter {
    min_content_bytes: u64,
}

impl Default for OutputWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONTENT_BYTES)
    }
}

impl OutputWriter {
    pub fn new(min_content_bytes: u64) -> Self {
        Self { min_content_bytes }
    }

    pub fn min_content_bytes(&self) -> u64 {
        self.min_content_bytes
    }

    /// Persists a page under `dir` with its provenance marker
    ///
    /// The size check applies to the file as written, marker included. A
    /// file under the minimum is deleted again and `Ok(false)` returned, so
    /// a selector match alone does not make a page accepted.
    pub fn persist(&self, html: &str, url: &str, dir: &Path, sequence: u64) -> io::Result<bool> {
        fs::create_dir_all(dir)?;

        let path = output_file(dir, sequence);
        fs::write(&path, embed_original_url(html, url))?;

        let size = fs::metadata(&path)?.len();
        if size < self.min_content_bytes {
            debug!(
                "Rejecting {} ({} bytes < {} bytes)",
                url, size, self.min_content_bytes
            );
            fs::remove_file(&path)?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Removes a persisted page whose acceptance could not be counted
    pub fn discard(&self, dir: &Path, sequence: u64) -> io::Result<()> {
        match fs::remove_file(output_file(dir, sequence)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

/// Path of the capture with the given sequence number
pub fn output_file(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("{:07}.txt", sequence))
}

/// Inserts the provenance meta tag right after the first `<head>` tag
///
/// Documents without a head get the tag prepended.
pub fn embed_original_url(html: &str, url: &str) -> String {
    let meta = format!(
        "<meta name=\"{}\" content=\"{}\">",
        ORIGINAL_URL_META,
        escape_attribute(url)
    );

    match find_head_end(html) {
        Some(end) => {
            let mut out = String::with_capacity(html.len() + meta.len() + 3);
            out.push_str(&html[..end]);
            out.push_str("\n  ");
            out.push_str(&meta);
            out.push_str(&html[end..]);
            out
        }
        None => format!("{}\n{}", meta, html),
    }
}

/// Byte offset just past the `>` of the first `<head ...>` tag
fn find_head_end(html: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("<head") {
        let start = from + pos;
        let after = start + "<head".len();
        // Reject `<header>` and similar
        match lower.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                return lower[after..].find('>').map(|end| after + end + 1);
            }
            _ => from = after,
        }
    }
    None
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
