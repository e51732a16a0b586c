//! URL handling for Pricewatch
//!
//! Request dedup keys default to the normalized URL, and sessions are matched to
//! crawl targets by host.

mod normalize;

pub use normalize::normalize_url;

use ::url::Url;

/// Extracts the lowercase host of a URL string, used as the crawl target key
///
/// Returns `None` when the string does not parse or has no host.
///
/// # Examples
///
/// ```
/// use pricewatch::url::extract_domain;
///
/// assert_eq!(
///     extract_domain("https://WWW.Shop.cz/c/tv"),
///     Some("www.shop.cz".to_string())
/// );
/// assert_eq!(extract_domain("not a url"), None);
/// ```
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Resolves a possibly relative link against a base URL
///
/// Returns `None` for links that cannot be fetched (`javascript:`, `mailto:`,
/// `tel:`, data URIs, or unparseable values).
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain_lowercases() {
        assert_eq!(
            extract_domain("https://EXAMPLE.com/path"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn test_extract_domain_keeps_port_free_host() {
        assert_eq!(
            extract_domain("http://127.0.0.1:8080/x"),
            Some("127.0.0.1".to_string())
        );
    }

    #[test]
    fn test_resolve_relative_link() {
        let base = Url::parse("https://shop.cz/kategorie/tv").unwrap();
        let resolved = resolve_link(&base, "/kategorie/audio?page=2").unwrap();
        assert_eq!(resolved.as_str(), "https://shop.cz/kategorie/audio?page=2");
    }

    #[test]
    fn test_resolve_rejects_non_fetchable() {
        let base = Url::parse("https://shop.cz/").unwrap();
        assert!(resolve_link(&base, "javascript:void(0)").is_none());
        assert!(resolve_link(&base, "mailto:info@shop.cz").is_none());
        assert!(resolve_link(&base, "   ").is_none());
    }
}
