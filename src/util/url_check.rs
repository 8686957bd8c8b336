use thiserror::Error;
use url::Url;

/// Errors raised when a configured feed URL is unusable.
#[derive(Error, Debug)]
pub enum UrlCheckError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// Feed URLs come from the user's own configuration, so loopback and private
/// addresses are allowed (self-hosted mirrors are common). Only the scheme and
/// the presence of a host are enforced.
///
/// # Examples
///
/// ```
/// use newsbrief::util::validate_feed_url;
///
/// let url = validate_feed_url("https://news.google.com/rss/search?q=rust").unwrap();
/// assert_eq!(url.host_str(), Some("news.google.com"));
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlCheckError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlCheckError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlCheckError::MissingHost);
    }

    Ok(url)
}
