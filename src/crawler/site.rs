//! Selector-driven catalog extraction
//!
//! The shop's markup is described by `[site]` configuration:
//! - Start and promo pages yield category links
//! - Sub-list pages yield listing links
//! - Listing pages yield sub-category links, products and pagination
//!
//! [`SitePipeline`] routes each request kind to the pipeline that handles it.

use crate::config::SiteConfig;
use crate::crawler::fetcher::FetchedPage;
use crate::crawler::pipeline::{parse_price, Extraction, ExtractionError, ExtractionPipeline, Pagination};
use crate::crawler::price::PriceListPipeline;
use crate::crawler::request::{Record, Request, RequestKind};
use crate::url::resolve_link;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Menu category given to listings found on the promo page
pub const PROMO_CATEGORY: &str = "promo";

fn compile(name: &str, selector: &Option<String>) -> Result<Option<Selector>, ConfigError> {
    selector
        .as_deref()
        .map(|s| {
            Selector::parse(s)
                .map_err(|e| ConfigError::InvalidSelector(format!("{} '{}': {:?}", name, s, e)))
        })
        .transpose()
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct CatalogPipeline {
    category_links: Option<Selector>,
    promo_links: Option<Selector>,
    sublist_links: Option<Selector>,
    subcategories: Option<Selector>,
    category_id_attribute: Option<String>,
    products: Option<Selector>,
    item_id_attribute: String,
    name: Option<Selector>,
    link: Option<Selector>,
    price: Option<Selector>,
    original_price: Option<Selector>,
    image: Option<Selector>,
    image_attribute: String,
    breadcrumb: Option<Selector>,
    record_count: Option<Selector>,
    page_size: u64,
    page_url_template: String,
}

impl CatalogPipeline {
    pub fn new(config: &SiteConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            category_links: compile("category-link-selector", &config.category_link_selector)?,
            promo_links: compile("promo-link-selector", &config.promo_link_selector)?,
            sublist_links: compile("sublist-link-selector", &config.sublist_link_selector)?,
            subcategories: compile("subcategory-selector", &config.subcategory_selector)?,
            category_id_attribute: config.category_id_attribute.clone(),
            products: compile("product-selector", &config.product_selector)?,
            item_id_attribute: config.item_id_attribute.clone(),
            name: compile("name-selector", &config.name_selector)?,
            link: compile("link-selector", &config.link_selector)?,
            price: compile("price-selector", &config.price_selector)?,
            original_price: compile("original-price-selector", &config.original_price_selector)?,
            image: compile("image-selector", &config.image_selector)?,
            image_attribute: config.image_attribute.clone(),
            breadcrumb: compile("breadcrumb-selector", &config.breadcrumb_selector)?,
            record_count: compile("record-count-selector", &config.record_count_selector)?,
            page_size: config.page_size,
            page_url_template: config.page_url_template.clone(),
        })
    }

    /// Resolved `href`s and link texts matched by `selector`
    fn links<'a>(
        &self,
        document: &'a Html,
        selector: &Option<Selector>,
        base: &Url,
    ) -> Vec<(Url, ElementRef<'a>)> {
        let Some(selector) = selector else {
            return Vec::new();
        };
        document
            .select(selector)
            .filter_map(|a| {
                let href = a.value().attr("href")?;
                resolve_link(base, href).map(|url| (url, a))
            })
            .collect()
    }

    fn category_requests(
        &self,
        document: &Html,
        selector: &Option<Selector>,
        base: &Url,
        menu_category: Option<&str>,
    ) -> Vec<Request> {
        self.links(document, selector, base)
            .into_iter()
            .filter_map(|(url, a)| {
                let category_id = self
                    .category_id_attribute
                    .as_deref()
                    .and_then(|attr| a.value().attr(attr))
                    .map(str::to_string);
                let category_name = match menu_category {
                    Some(name) => Some(name.to_string()),
                    None => Some(element_text(a)).filter(|t| !t.is_empty()),
                };
                Request::new(
                    url.as_str(),
                    RequestKind::first_page(category_id, category_name),
                )
                .ok()
            })
            .collect()
    }

    fn listing(&self, request: &Request, document: &Html, base: &Url) -> Extraction {
        let mut extraction = Extraction::default();

        let subcategory_name = request.kind.category_name().map(str::to_string);
        for (url, _) in self.links(document, &self.subcategories, base) {
            if let Ok(followup) = Request::new(
                url.as_str(),
                RequestKind::first_page(None, subcategory_name.clone()),
            ) {
                extraction.followups.push(followup);
            }
        }
        extraction.categories_seen = extraction.followups.len() as u64;

        if extraction.followups.is_empty() && request.kind.is_first_page() {
            extraction.pagination = self.pagination(document);
        }

        extraction.records = self.products(request, document, base);
        extraction
    }

    fn pagination(&self, document: &Html) -> Option<Pagination> {
        let selector = self.record_count.as_ref()?;
        let total_count = document
            .select(selector)
            .next()
            .and_then(|el| parse_price(&element_text(el)))?;

        Some(Pagination {
            total_count,
            page_size: self.page_size,
            url_template: self.page_url_template.clone(),
        })
    }

    fn products(&self, request: &Request, document: &Html, base: &Url) -> Vec<Record> {
        let Some(products) = &self.products else {
            return Vec::new();
        };

        let category: Vec<String> = self
            .breadcrumb
            .as_ref()
            .map(|selector| {
                document
                    .select(selector)
                    .map(element_text)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let menu_category = request.kind.category_name().map(str::to_string);

        let mut records = Vec::new();
        for product in document.select(products) {
            let Some(item_id) = product
                .value()
                .attr(&self.item_id_attribute)
                .map(str::trim)
                .filter(|id| !id.is_empty())
            else {
                tracing::warn!("Product without {} on {}", self.item_id_attribute, request.url);
                continue;
            };

            let first = |selector: &Option<Selector>| {
                selector
                    .as_ref()
                    .and_then(|s| product.select(s).next())
            };

            let name = first(&self.name).map(element_text).filter(|n| !n.is_empty());
            let source_url = first(&self.link)
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| resolve_link(base, href))
                .map(|u| u.to_string())
                .unwrap_or_else(|| request.url.clone());
            let current = first(&self.price).and_then(|el| parse_price(&element_text(el)));
            let original = first(&self.original_price).and_then(|el| parse_price(&element_text(el)));
            let image_url = first(&self.image)
                .and_then(|img| {
                    img.value()
                        .attr(&self.image_attribute)
                        .or_else(|| img.value().attr("src"))
                })
                .and_then(|src| resolve_link(base, src))
                .map(|u| u.to_string());

            let mut record = Record::new(item_id, source_url).with_prices(current, original);
            record.name = name;
            record.image_url = image_url;
            record.category = category.clone();
            record.menu_category = menu_category.clone();
            records.push(record);
        }

        records
    }
}

impl ExtractionPipeline for CatalogPipeline {
    fn extract(&self, request: &Request, page: &FetchedPage) -> Result<Extraction, ExtractionError> {
        let base = Url::parse(&page.url)
            .or_else(|_| Url::parse(&request.url))
            .map_err(|e| ExtractionError::Structure(format!("bad page URL: {}", e)))?;
        let document = Html::parse_document(&page.body);

        let extraction = match &request.kind {
            RequestKind::Start => {
                let followups = self.category_requests(&document, &self.category_links, &base, None);
                Extraction {
                    categories_seen: followups.len() as u64,
                    followups,
                    ..Extraction::default()
                }
            }
            RequestKind::Promo => {
                let followups = self.category_requests(
                    &document,
                    &self.promo_links,
                    &base,
                    Some(PROMO_CATEGORY),
                );
                Extraction {
                    categories_seen: followups.len() as u64,
                    followups,
                    ..Extraction::default()
                }
            }
            RequestKind::SubList => {
                let followups: Vec<Request> = self
                    .links(&document, &self.sublist_links, &base)
                    .into_iter()
                    .filter_map(|(url, _)| Request::new(url.as_str(), RequestKind::List).ok())
                    .collect();
                Extraction {
                    categories_seen: followups.len() as u64,
                    followups,
                    ..Extraction::default()
                }
            }
            RequestKind::List | RequestKind::Page { .. } => self.listing(request, &document, &base),
            RequestKind::PriceBatch { .. } => return Err(ExtractionError::Unsupported("PRICE")),
        };

        Ok(extraction)
    }
}

/// Routes requests to the catalog or price-list pipeline by kind
pub struct SitePipeline {
    catalog: CatalogPipeline,
    prices: PriceListPipeline,
}

impl SitePipeline {
    pub fn new(config: &SiteConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            catalog: CatalogPipeline::new(config)?,
            prices: PriceListPipeline,
        })
    }
}

impl ExtractionPipeline for SitePipeline {
    fn extract(&self, request: &Request, page: &FetchedPage) -> Result<Extraction, ExtractionError> {
        match request.kind {
            RequestKind::PriceBatch { .. } => self.prices.extract(request, page),
            _ => self.catalog.extract(request, page),
        }
    }
}
