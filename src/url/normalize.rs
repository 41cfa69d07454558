use url::Url;

/// Normalizes a URL into the frontier's deduplication key
///
/// # Normalization Steps
///
/// 1. Parse the URL; if that fails, the raw string is the key
/// 2. Lowercase the scheme and host
/// 3. Drop the port when it is the scheme's default
/// 4. Keep the path as-is (empty path becomes /)
/// 5. Drop the query string and the fragment
///
/// Unparseable input degrades to exact string matching rather than failing,
/// so a malformed link can still be deduplicated against itself.
///
/// # Examples
///
/// ```
/// use product_scout::url::normalize_url;
///
/// assert_eq!(
///     normalize_url("HTTPS://Shop.Example.COM:443/item/42?color=red#reviews"),
///     "https://shop.example.com/item/42"
/// );
/// assert_eq!(normalize_url("not a url"), "not a url");
/// ```
pub fn normalize_url(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(url) => normalized_key(&url).unwrap_or_else(|| url_str.to_string()),
        Err(_) => url_str.to_string(),
    }
}

/// Builds the key for an already parsed URL
///
/// Returns None for URLs without a host (e.g. `mailto:`), which fall back to
/// the raw string in [`normalize_url`].
fn normalized_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();

    // Url::port() is None when the port equals the scheme default
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();

    let path = if url.path().is_empty() { "/" } else { url.path() };

    Some(format!(
        "{}://{}{}{}",
        url.scheme().to_lowercase(),
        host,
        port,
        path
    ))
}
