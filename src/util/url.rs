use thiserror::Error;
use ::url::Url;

/// Errors produced while normalizing a URL literal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
    /// The string could not be parsed as an absolute URL.
    #[error("Invalid URL: {0}")]
    Invalid(#[from] ::url::ParseError),
    /// Only http and https URLs take part in the graph.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Parses and canonicalizes a URL so it can serve as a dedup key.
///
/// Canonical form is whatever the `url` crate serializes after parsing:
/// scheme and host lowercased, default port dropped, an empty path becomes
/// `/`. The fragment is removed since it never changes the fetched resource.
///
/// # Errors
///
/// Returns [`UrlError`] if the literal is not an absolute http(s) URL with a host.
///
/// # Examples
///
/// ```
/// use feedcluster::util::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM:443#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/");
///
/// assert!(normalize_url("mailto:someone@example.com").is_err());
/// ```
pub fn normalize_url(literal: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(literal.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);
    Ok(url)
}

/// The domain key of a URL: its origin `scheme://host[:port]`.
///
/// Frontier state is tracked per origin, so `http://a.example` and
/// `https://a.example` are distinct websites.
///
/// ```
/// use feedcluster::util::{normalize_url, origin_of};
///
/// let url = normalize_url("https://blog.example:8443/posts/1?x=y").unwrap();
/// assert_eq!(origin_of(&url), "https://blog.example:8443");
/// ```
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Host part of an origin key such as `https://a.example:8080`.
pub fn host_of_origin(origin: &str) -> Option<String> {
    Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

/// True if `host` equals `domain` or is a subdomain of it.
pub fn host_within(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_drops_default_port() {
        let url = normalize_url("HTTP://WWW.Example.org:80/Path?q=1#frag").unwrap();
        assert_eq!(url.as_str(), "http://www.example.org/Path?q=1");
    }

    #[test]
    fn test_normalize_keeps_non_default_port() {
        let url = normalize_url("https://example.org:8443").unwrap();
        assert_eq!(url.as_str(), "https://example.org:8443/");
    }

    #[test]
    fn test_normalize_rejects_other_schemes() {
        assert_eq!(
            normalize_url("ftp://example.org/file"),
            Err(UrlError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(normalize_url("javascript:void(0)"), Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_normalize_rejects_relative() {
        assert!(matches!(normalize_url("/relative/path"), Err(UrlError::Invalid(_))));
        assert!(matches!(normalize_url(""), Err(UrlError::Invalid(_))));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_url("https://Example.com/a/../b/?x=1#y").unwrap();
        let twice = normalize_url(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_origin_distinguishes_scheme() {
        let http = normalize_url("http://a.example/x").unwrap();
        let https = normalize_url("https://a.example/y").unwrap();
        assert_eq!(origin_of(&http), "http://a.example");
        assert_eq!(origin_of(&https), "https://a.example");
    }

    #[test]
    fn test_host_of_origin() {
        assert_eq!(host_of_origin("https://a.example:8080").as_deref(), Some("a.example"));
        assert_eq!(host_of_origin("not a url"), None);
    }

    #[test]
    fn test_host_within() {
        assert!(host_within("blog.example.com", "example.com"));
        assert!(host_within("example.com", "example.com"));
        assert!(host_within("Example.COM", "example.com"));
        assert!(!host_within("badexample.com", "example.com"));
        assert!(!host_within("example.com", "blog.example.com"));
        assert!(!host_within("example.com", ""));
    }

    proptest::proptest! {
        #[test]
        fn prop_normalize_is_idempotent(
            host in "[a-z]{1,10}\\.(com|org|example)",
            path in "(/[A-Za-z0-9._~-]{0,8}){0,4}",
            fragment in "[a-z]{0,5}"
        ) {
            let once = normalize_url(&format!("HTTPS://{host}{path}#{fragment}")).unwrap();
            let twice = normalize_url(once.as_str()).unwrap();
            proptest::prop_assert!(once.fragment().is_none());
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
