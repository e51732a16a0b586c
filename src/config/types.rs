use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Main configuration structure for Pricewatch
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    pub seeds: SeedConfig,
    #[serde(default)]
    pub site: SiteConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub post_processing: PostProcessingConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of concurrent fetch workers
    pub max_concurrency: usize,

    /// Retries allowed per request before it is dropped as failed
    pub max_request_retries: u32,

    /// Delay strategy between a failure and the retry
    pub retry_backoff: BackoffKind,

    /// Base retry delay (milliseconds)
    pub retry_delay_ms: u64,

    /// Upper bound for exponential retry delays (milliseconds)
    pub max_retry_delay_ms: u64,

    /// Timeout for a single fetch, including redirects (seconds)
    pub fetch_timeout_secs: u64,

    /// Interval between state checkpoints (seconds)
    pub checkpoint_interval_secs: u64,

    /// Random pause after each handled request, `[min, max]` milliseconds
    pub jitter_ms: [u64; 2],

    /// Log a progress line every N finished requests
    pub progress_every: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 6,
            max_request_retries: 3,
            retry_backoff: BackoffKind::Fixed,
            retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            fetch_timeout_secs: 60,
            checkpoint_interval_secs: 60,
            jitter_ms: [250, 950],
            progress_every: 25,
        }
    }
}

/// Retry delay strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Session pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Maximum number of live sessions
    pub max_pool_size: usize,

    /// Errors in a row a session may accumulate; one more retires it
    pub max_consecutive_errors: u32,

    /// Retire a session after serving this many requests (0 = never)
    pub max_requests_per_session: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 12,
            max_consecutive_errors: 3,
            max_requests_per_session: 0,
        }
    }
}

/// Proxy pools
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// Pools to draw session proxies from, in rotation order
    pub pool_names: Vec<String>,

    /// Proxy URLs per pool name
    pub pools: HashMap<String, Vec<String>>,
}

/// Interactive challenge handling
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChallengeConfig {
    /// Whether detected challenges are sent to the solver
    pub enabled: bool,

    /// Endpoint of the HTTP solver service
    pub solver_url: Option<String>,

    /// Give up on a solve after this long (seconds)
    pub solve_timeout_secs: u64,

    /// Pause after a solved challenge before the page is accepted (milliseconds)
    pub cooldown_ms: u64,

    /// Response status codes that may carry a challenge
    pub status_codes: Vec<u16>,

    /// Body markers that identify a challenge page
    pub markers: Vec<String>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            solver_url: None,
            solve_timeout_secs: 180,
            cooldown_ms: 10_000,
            status_codes: vec![403],
            markers: vec!["recaptcha".to_string()],
        }
    }
}

/// Seed strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Walk the whole catalog from the start URLs
    Full,
    /// Crawl a single category page
    Test,
    /// Refresh prices for the ids listed in the price feed
    Price,
    /// Walk the promotional subset of the catalog
    Promo,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Test => "test",
            Self::Price => "price",
            Self::Promo => "promo",
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "test" => Ok(Self::Test),
            "price" => Ok(Self::Price),
            "promo" | "bf" => Ok(Self::Promo),
            other => Err(format!("unknown crawl mode '{}'", other)),
        }
    }
}

/// Seed URLs per crawl mode
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeedConfig {
    #[serde(default = "default_mode")]
    pub mode: CrawlMode,

    /// Catalog entry points (full mode)
    #[serde(default)]
    pub start_urls: Vec<String>,

    /// Top-level sections listing sub-categories (full mode)
    #[serde(default)]
    pub sublist_urls: Vec<String>,

    /// Single category page (test mode)
    pub test_url: Option<String>,

    /// Promotional landing page (promo mode)
    pub promo_url: Option<String>,

    /// CSV feed of item ids (price mode)
    pub price_feed_url: Option<String>,

    /// Endpoint answering price lists for a batch of ids (price mode)
    pub price_endpoint: Option<String>,

    /// Number of ids per price request
    #[serde(default = "default_price_batch_size")]
    pub price_batch_size: usize,
}

fn default_mode() -> CrawlMode {
    CrawlMode::Full
}

fn default_price_batch_size() -> usize {
    24
}

/// Selector rules for the crawled shop
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Links to categories on the start page
    pub category_link_selector: Option<String>,

    /// Links to categories on the promo page
    pub promo_link_selector: Option<String>,

    /// Links to listings on a sub-list page
    pub sublist_link_selector: Option<String>,

    /// Links to sub-categories on a listing page
    pub subcategory_selector: Option<String>,

    /// Attribute on category links carrying the category id
    pub category_id_attribute: Option<String>,

    /// One element per product on a listing page
    pub product_selector: Option<String>,

    /// Attribute of the product element holding the item id
    pub item_id_attribute: String,

    pub name_selector: Option<String>,
    pub link_selector: Option<String>,
    pub price_selector: Option<String>,
    pub original_price_selector: Option<String>,
    pub image_selector: Option<String>,
    pub image_attribute: String,

    /// Breadcrumb entries forming the category path
    pub breadcrumb_selector: Option<String>,

    /// Element whose text holds the total number of products in a listing
    pub record_count_selector: Option<String>,

    /// Products per listing page
    pub page_size: u64,

    /// Listing page URL, `{url}` is the first page and `{page}` the page number
    pub page_url_template: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            category_link_selector: None,
            promo_link_selector: None,
            sublist_link_selector: None,
            subcategory_selector: None,
            category_id_attribute: None,
            product_selector: None,
            item_id_attribute: "data-id".to_string(),
            name_selector: None,
            link_selector: None,
            price_selector: None,
            original_price_selector: None,
            image_selector: None,
            image_attribute: "src".to_string(),
            breadcrumb_selector: None,
            record_count_selector: None,
            page_size: 24,
            page_url_template: "{url}?page={page}".to_string(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database holding queue and checkpoint state
    pub database_path: String,

    /// Path to the JSON-lines dataset of emitted records
    pub dataset_path: String,
}

/// Work done once the crawl has quiesced
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PostProcessingConfig {
    /// Skip invalidation and upload entirely
    pub development: bool,

    /// CDN distribution to invalidate
    pub distribution_id: Option<String>,

    /// Domain whose cached data is invalidated
    pub domain: Option<String>,

    /// Base dataset name for the uploader; the crawl mode may add a suffix
    pub dataset_name: Option<String>,

    /// Invalidation webhook
    pub invalidate_url: Option<String>,

    /// Upload webhook
    pub upload_url: Option<String>,
}
