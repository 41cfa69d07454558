//! URL handling module for Product-Scout
//!
//! This module provides the frontier's deduplication key, same-domain checks,
//! resource filtering, and relative link resolution.

mod domain;
mod filter;
mod normalize;

use url::Url;

// Re-export main functions
pub use domain::{extract_domain, is_same_domain, parse_with_domain};
pub use filter::is_crawlable_page;
pub use normalize::normalize_url;

/// Resolves a possibly relative reference against a base URL
///
/// Resolution follows RFC 3986 (`Url::join`). When either the base or the
/// reference cannot be parsed, the reference is returned unchanged; callers
/// then see the raw string and the later filters reject it.
///
/// # Examples
///
/// ```
/// use product_scout::url::to_absolute;
///
/// assert_eq!(
///     to_absolute("https://example.com/shop/", "item/7"),
///     "https://example.com/shop/item/7"
/// );
/// assert_eq!(to_absolute("not a base", "/a"), "/a");
/// ```
pub fn to_absolute(base: &str, maybe_relative: &str) -> String {
    match Url::parse(base).and_then(|base| base.join(maybe_relative)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => maybe_relative.to_string(),
    }
}
