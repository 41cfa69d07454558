use crate::{UrlError, UrlResult};
use url::Url;

/// Extracts the domain from a URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// If the URL has no host, it returns None.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use product_scout::url::extract_domain;
///
/// let url = Url::parse("https://Shop.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("shop.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses an absolute URL and returns it with its lowercase host
pub fn parse_with_domain(url_str: &str) -> UrlResult<(Url, String)> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(format!("'{}': {}", url_str, e)))?;
    let domain = extract_domain(&url).ok_or_else(|| UrlError::MissingHost(url_str.to_string()))?;
    Ok((url, domain))
}

/// Checks whether two URLs point at the same host
///
/// Hostnames are compared exactly after parsing: `www.example.com` and
/// `example.com` are different domains, and so are `shop.example.com` and
/// `example.com`. Ports and schemes are ignored. If either URL fails to
/// parse the answer is `false`.
pub fn is_same_domain(base: &str, candidate: &str) -> bool {
    match (Url::parse(base), Url::parse(candidate)) {
        (Ok(base), Ok(candidate)) => match (extract_domain(&base), extract_domain(&candidate)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}
