//! Extraction pipeline interface
//!
//! A pipeline turns an accepted page into records and follow-up requests. It
//! never touches the queue or the dedup sets itself; the controller applies
//! its output.

use crate::crawler::fetcher::FetchedPage;
use crate::crawler::request::{Priority, Record, Request, RequestKind};
use thiserror::Error;
use url::Url;

/// Errors that make a whole page unusable
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected page structure: {0}")]
    Structure(String),

    #[error("No pipeline handles {0} requests")]
    Unsupported(&'static str),
}

/// "N items in total, M per page" announced by a first listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub total_count: u64,
    pub page_size: u64,
    /// Page URL with a `{page}` placeholder
    ///
    /// `{url}` stands for the parent listing URL. Its query parameters are
    /// kept unless the template sets the same key, its fragment is dropped.
    pub url_template: String,
}

impl Pagination {
    /// Number of pages, the first one included
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size)
    }

    /// Front-priority requests for pages 2..=n of `parent`'s listing
    ///
    /// Page requests keep the parent's category. Returns nothing unless the
    /// parent is a first page.
    pub fn followups(&self, parent: &Request) -> Vec<Request> {
        if !parent.kind.is_first_page() {
            return Vec::new();
        }

        let (category_id, category_name) = match &parent.kind {
            RequestKind::Page {
                category_id,
                category_name,
                ..
            } => (category_id.clone(), category_name.clone()),
            _ => (None, None),
        };

        (2..=self.page_count())
            .filter_map(|page| {
                let kind = RequestKind::Page {
                    category_id: category_id.clone(),
                    category_name: category_name.clone(),
                    page: u32::try_from(page).ok()?,
                };
                let url = match self.page_url(&parent.url, page) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!("Skipping page {} of {}: {}", page, parent.url, e);
                        return None;
                    }
                };
                match Request::new(url.as_str(), kind) {
                    Ok(request) => Some(request.with_priority(Priority::Front)),
                    Err(e) => {
                        tracing::warn!("Skipping page URL {}: {}", url, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn page_url(&self, parent_url: &str, page: u64) -> Result<Url, url::ParseError> {
        let mut base = Url::parse(parent_url)?;
        base.set_fragment(None);
        let inherited: Vec<(String, String)> = base.query_pairs().into_owned().collect();
        base.set_query(None);

        let rendered = self
            .url_template
            .replace("{url}", base.as_str())
            .replace("{page}", &page.to_string());
        let mut url = Url::parse(&rendered)?;
        if inherited.is_empty() || !self.url_template.contains("{url}") {
            return Ok(url);
        }

        let own: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(inherited.iter().filter(|(key, _)| !own.iter().any(|(k, _)| k == key)))
            .extend_pairs(&own);
        Ok(url)
    }
}

/// Output of one extraction
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub followups: Vec<Request>,
    pub pagination: Option<Pagination>,
    pub categories_seen: u64,
}

pub trait ExtractionPipeline: Send + Sync {
    fn extract(&self, request: &Request, page: &FetchedPage) -> Result<Extraction, ExtractionError>;
}

/// Reads the first run of digits after removing whitespace
///
/// `"12 990 Kč"` gives 12990; text without digits gives `None`.
pub fn parse_price(text: &str) -> Option<u64> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let digits: String = compact
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pagination(total_count: u64) -> Pagination {
        Pagination {
            total_count,
            page_size: 24,
            url_template: "https://shop.cz/tv_c5622.html?page={page}#prodlistanchor".to_string(),
        }
    }

    fn first_page() -> Request {
        Request::new(
            "https://shop.cz/tv_c5622.html",
            RequestKind::first_page(Some("5622".to_string()), Some("TV".to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(pagination(3000).page_count(), 125);
        assert_eq!(pagination(24).page_count(), 1);
        assert_eq!(pagination(25).page_count(), 2);
        assert_eq!(pagination(0).page_count(), 0);
    }

    #[test]
    fn test_followups_for_large_listing() {
        let followups = pagination(3000).followups(&first_page());
        assert_eq!(followups.len(), 124);
        assert!(followups.iter().all(|r| r.priority == Priority::Front));

        let first = &followups[0];
        assert_eq!(
            first.url,
            "https://shop.cz/tv_c5622.html?page=2#prodlistanchor"
        );
        assert_eq!(
            first.kind,
            RequestKind::Page {
                category_id: Some("5622".to_string()),
                category_name: Some("TV".to_string()),
                page: 2
            }
        );
        assert_eq!(followups.last().unwrap().kind.page_number(), Some(125));
    }

    #[test]
    fn test_page_url_merges_parent_query() {
        let pagination = Pagination {
            total_count: 48,
            page_size: 24,
            url_template: "{url}?page={page}".to_string(),
        };
        let parent = Request::new(
            "https://shop.cz/tv_c5622.html?f=lg&page=1#top",
            RequestKind::first_page(None, None),
        )
        .unwrap();

        let followups = pagination.followups(&parent);
        assert_eq!(followups.len(), 1);
        assert_eq!(followups[0].url, "https://shop.cz/tv_c5622.html?f=lg&page=2");
    }

    #[test]
    fn test_no_followups_from_later_pages() {
        let later = Request::new(
            "https://shop.cz/tv_c5622.html?page=3",
            RequestKind::Page {
                category_id: None,
                category_name: None,
                page: 3,
            },
        )
        .unwrap();
        assert!(pagination(3000).followups(&later).is_empty());
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("12 990 Kč"), Some(12990));
        assert_eq!(parse_price("od\u{a0}1\u{a0}299,-"), Some(1299));
        assert_eq!(parse_price("zdarma"), None);
        assert_eq!(parse_price("3000 produktů"), Some(3000));
    }
}
