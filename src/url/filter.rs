use url::Url;

/// File extensions that never point at an HTML document
const NON_DOCUMENT_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "ico", "webp", "avif", "tif", "tiff",
    // video
    "mp4", "avi", "mov", "wmv", "flv", "webm", "mkv", "m4v",
    // audio
    "mp3", "wav", "ogg", "flac", "aac", "m4a",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // archives
    "zip", "rar", "tar", "gz", "tgz", "7z", "bz2",
    // stylesheets, scripts and fonts
    "css", "js", "mjs", "map", "woff", "woff2", "ttf", "eot",
    // structured data
    "json", "xml", "rss", "atom", "csv",
];

/// Checks whether a URL looks like a crawlable page
///
/// The check only looks at the extension of the last path segment, ignoring
/// the query string and fragment. Paths without an extension, and paths with
/// an unknown extension such as `.html` or `.php`, are accepted. Input that
/// does not parse as an absolute URL is judged on its raw text.
///
/// # Examples
///
/// ```
/// use product_scout::url::is_crawlable_page;
///
/// assert!(is_crawlable_page("https://example.com/products/shoe"));
/// assert!(is_crawlable_page("https://example.com/products/shoe.html"));
/// assert!(!is_crawlable_page("https://example.com/img/shoe.JPG"));
/// ```
pub fn is_crawlable_page(url_str: &str) -> bool {
    let path = match Url::parse(url_str) {
        Ok(url) => url.path().to_string(),
        Err(_) => url_str
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let last_segment = path.rsplit('/').next().unwrap_or_default();

    match last_segment.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => {
            let extension = extension.to_ascii_lowercase();
            !NON_DOCUMENT_EXTENSIONS.contains(&extension.as_str())
        }
        _ => true,
    }
}
