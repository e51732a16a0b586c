//! Work items and the records extracted from them

use crate::url::{extract_domain, normalize_url};
use crate::UrlError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue level of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    /// Drained before any normal request
    Front,
}

/// What a request is for, with only the data that kind of page needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label")]
pub enum RequestKind {
    /// Catalog entry page listing top-level categories
    #[serde(rename = "START")]
    Start,

    /// Listing reached from a sub-list page
    #[serde(rename = "LIST")]
    List,

    /// Section page linking to listings
    #[serde(rename = "SUBLIST")]
    SubList,

    /// Category listing page
    #[serde(rename = "PAGE")]
    Page {
        category_id: Option<String>,
        category_name: Option<String>,
        page: u32,
    },

    /// Price lookup for a batch of item ids
    #[serde(rename = "PRICE")]
    PriceBatch { ids: Vec<String> },

    /// Promotional landing page
    #[serde(rename = "PROMO")]
    Promo,
}

impl RequestKind {
    /// First listing page of a category
    pub fn first_page(category_id: Option<String>, category_name: Option<String>) -> Self {
        Self::Page {
            category_id,
            category_name,
            page: 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::List => "LIST",
            Self::SubList => "SUBLIST",
            Self::Page { .. } => "PAGE",
            Self::PriceBatch { .. } => "PRICE",
            Self::Promo => "PROMO",
        }
    }

    /// Page number for listing requests; `List` is always a first page
    pub fn page_number(&self) -> Option<u32> {
        match self {
            Self::List => Some(1),
            Self::Page { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Returns true for listings that may announce further pages
    pub fn is_first_page(&self) -> bool {
        self.page_number() == Some(1)
    }

    /// Category name carried by a listing request
    pub fn category_name(&self) -> Option<&str> {
        match self {
            Self::Page { category_name, .. } => category_name.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A unit of crawl work
///
/// Everything except `retry_count` is fixed once the request is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub kind: RequestKind,
    pub dedup_key: String,
    pub priority: Priority,
    pub retry_count: u32,
    /// Form-encoded POST body; `None` means GET
    pub body: Option<String>,
}

impl Request {
    /// Creates a normal-priority GET request keyed by its normalized URL
    pub fn new(url: &str, kind: RequestKind) -> Result<Self, UrlError> {
        let dedup_key = normalize_url(url)?.to_string();
        Ok(Self {
            url: url.to_string(),
            kind,
            dedup_key,
            priority: Priority::Normal,
            retry_count: 0,
            body: None,
        })
    }

    pub fn with_dedup_key(mut self, dedup_key: impl Into<String>) -> Self {
        self.dedup_key = dedup_key.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Host the request targets, used for session affinity
    pub fn target(&self) -> Option<String> {
        extract_domain(&self.url)
    }
}

/// A product price record
///
/// Built through [`Record::with_prices`] so that `discounted` always matches the
/// presence of an original price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub item_id: String,
    pub name: Option<String>,
    pub current_price: Option<u64>,
    pub original_price: Option<u64>,
    pub discounted: bool,
    pub category: Vec<String>,
    pub source_url: String,
    pub image_url: Option<String>,
    pub menu_category: Option<String>,
}

impl Record {
    pub fn new(item_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            name: None,
            current_price: None,
            original_price: None,
            discounted: false,
            category: Vec::new(),
            source_url: source_url.into(),
            image_url: None,
            menu_category: None,
        }
    }

    pub fn with_prices(mut self, current: Option<u64>, original: Option<u64>) -> Self {
        self.current_price = current;
        self.original_price = original;
        self.discounted = original.is_some();
        self
    }
}
