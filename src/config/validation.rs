use crate::config::types::{
    ChallengeConfig, Config, CrawlMode, CrawlerConfig, OutputConfig, PostProcessingConfig,
    ProxyConfig, SeedConfig, SessionConfig, SiteConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_session_config(&config.session)?;
    validate_proxy_config(&config.proxy)?;
    validate_challenge_config(&config.challenge)?;
    validate_seed_config(&config.seeds)?;
    validate_site_config(&config.site)?;
    validate_output_config(&config.output)?;
    validate_post_processing(&config.post_processing)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrency must be between 1 and 100, got {}",
            config.max_concurrency
        )));
    }

    if config.fetch_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.checkpoint_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "checkpoint-interval-secs must be >= 1".to_string(),
        ));
    }

    if config.retry_delay_ms > config.max_retry_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry-delay-ms ({}) cannot exceed max-retry-delay-ms ({})",
            config.retry_delay_ms, config.max_retry_delay_ms
        )));
    }

    let [min, max] = config.jitter_ms;
    if min > max {
        return Err(ConfigError::Validation(format!(
            "jitter-ms must be [min, max] with min <= max, got [{}, {}]",
            min, max
        )));
    }

    Ok(())
}

fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.max_pool_size < 1 {
        return Err(ConfigError::Validation(
            "max-pool-size must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    for name in &config.pool_names {
        let urls = config.pools.get(name).ok_or_else(|| {
            ConfigError::Validation(format!("Proxy pool '{}' is not defined in [proxy.pools]", name))
        })?;

        if urls.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Proxy pool '{}' has no proxy URLs",
                name
            )));
        }

        for proxy in urls {
            let url = Url::parse(proxy).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid proxy URL '{}': {}", proxy, e))
            })?;
            if !matches!(url.scheme(), "http" | "https" | "socks5") {
                return Err(ConfigError::InvalidUrl(format!(
                    "Proxy URL '{}' must use http, https or socks5",
                    proxy
                )));
            }
        }
    }
    Ok(())
}

fn validate_challenge_config(config: &ChallengeConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    let solver_url = config.solver_url.as_deref().ok_or_else(|| {
        ConfigError::Validation("challenge.enabled requires challenge.solver-url".to_string())
    })?;
    validate_http_url("challenge.solver-url", solver_url)?;

    if config.status_codes.is_empty() || config.markers.is_empty() {
        return Err(ConfigError::Validation(
            "challenge detection needs at least one status code and one marker".to_string(),
        ));
    }

    Ok(())
}

fn validate_seed_config(config: &SeedConfig) -> Result<(), ConfigError> {
    for url in config.start_urls.iter().chain(&config.sublist_urls) {
        validate_http_url("seed URL", url)?;
    }
    for url in [
        &config.test_url,
        &config.promo_url,
        &config.price_feed_url,
        &config.price_endpoint,
    ]
    .into_iter()
    .flatten()
    {
        validate_http_url("seed URL", url)?;
    }

    match config.mode {
        CrawlMode::Full => {
            if config.start_urls.is_empty() && config.sublist_urls.is_empty() {
                return Err(ConfigError::Validation(
                    "full mode needs start-urls or sublist-urls".to_string(),
                ));
            }
        }
        CrawlMode::Test => {
            if config.test_url.is_none() {
                return Err(ConfigError::Validation("test mode needs test-url".to_string()));
            }
        }
        CrawlMode::Promo => {
            if config.promo_url.is_none() {
                return Err(ConfigError::Validation(
                    "promo mode needs promo-url".to_string(),
                ));
            }
        }
        CrawlMode::Price => {
            if config.price_feed_url.is_none() || config.price_endpoint.is_none() {
                return Err(ConfigError::Validation(
                    "price mode needs price-feed-url and price-endpoint".to_string(),
                ));
            }
        }
    }

    if config.price_batch_size < 1 {
        return Err(ConfigError::Validation(
            "price-batch-size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let selectors = [
        ("category-link-selector", &config.category_link_selector),
        ("promo-link-selector", &config.promo_link_selector),
        ("sublist-link-selector", &config.sublist_link_selector),
        ("subcategory-selector", &config.subcategory_selector),
        ("product-selector", &config.product_selector),
        ("name-selector", &config.name_selector),
        ("link-selector", &config.link_selector),
        ("price-selector", &config.price_selector),
        ("original-price-selector", &config.original_price_selector),
        ("image-selector", &config.image_selector),
        ("breadcrumb-selector", &config.breadcrumb_selector),
        ("record-count-selector", &config.record_count_selector),
    ];

    for (name, selector) in selectors {
        if let Some(selector) = selector {
            Selector::parse(selector).map_err(|e| {
                ConfigError::InvalidSelector(format!("{} '{}': {:?}", name, selector, e))
            })?;
        }
    }

    if config.page_size < 1 {
        return Err(ConfigError::Validation("page-size must be >= 1".to_string()));
    }

    if !config.page_url_template.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "page-url-template must contain {{page}}, got '{}'",
            config.page_url_template
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.dataset_path.is_empty() {
        return Err(ConfigError::Validation(
            "dataset-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_post_processing(config: &PostProcessingConfig) -> Result<(), ConfigError> {
    for (name, url) in [
        ("invalidate-url", &config.invalidate_url),
        ("upload-url", &config.upload_url),
    ] {
        if let Some(url) = url {
            validate_http_url(name, url)?;
        }
    }
    Ok(())
}

fn validate_http_url(what: &str, url: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use HTTP or HTTPS",
            what, url
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds(mode: CrawlMode) -> SeedConfig {
        SeedConfig {
            mode,
            start_urls: vec![],
            sublist_urls: vec![],
            test_url: None,
            promo_url: None,
            price_feed_url: None,
            price_endpoint: None,
            price_batch_size: 24,
        }
    }

    #[test]
    fn test_seed_mode_requirements() {
        assert!(validate_seed_config(&seeds(CrawlMode::Full)).is_err());
        assert!(validate_seed_config(&seeds(CrawlMode::Test)).is_err());
        assert!(validate_seed_config(&seeds(CrawlMode::Promo)).is_err());

        let mut price = seeds(CrawlMode::Price);
        price.price_feed_url = Some("https://feed.example.com/ids.csv".to_string());
        assert!(validate_seed_config(&price).is_err());
        price.price_endpoint = Some("https://shop.cz/PriceList_jx.asp".to_string());
        assert!(validate_seed_config(&price).is_ok());
    }

    #[test]
    fn test_seed_urls_must_be_http() {
        let mut full = seeds(CrawlMode::Full);
        full.start_urls = vec!["ftp://shop.cz/".to_string()];
        assert!(matches!(
            validate_seed_config(&full),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_proxy_pool_must_exist() {
        let mut proxy = ProxyConfig::default();
        proxy.pool_names = vec!["czech".to_string()];
        assert!(validate_proxy_config(&proxy).is_err());

        proxy
            .pools
            .insert("czech".to_string(), vec!["http://proxy:8000".to_string()]);
        assert!(validate_proxy_config(&proxy).is_ok());

        proxy
            .pools
            .insert("czech".to_string(), vec!["not a proxy".to_string()]);
        assert!(validate_proxy_config(&proxy).is_err());
    }

    #[test]
    fn test_challenge_requires_solver() {
        let mut challenge = ChallengeConfig {
            enabled: true,
            ..ChallengeConfig::default()
        };
        assert!(validate_challenge_config(&challenge).is_err());

        challenge.solver_url = Some("https://solver.example.com/solve".to_string());
        assert!(validate_challenge_config(&challenge).is_ok());
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let site = SiteConfig {
            product_selector: Some("div[[".to_string()),
            ..SiteConfig::default()
        };
        assert!(matches!(
            validate_site_config(&site),
            Err(ConfigError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_page_template_needs_placeholder() {
        let site = SiteConfig {
            page_url_template: "{url}?page=2".to_string(),
            ..SiteConfig::default()
        };
        assert!(validate_site_config(&site).is_err());
    }

    #[test]
    fn test_jitter_bounds() {
        let crawler = CrawlerConfig {
            jitter_ms: [900, 100],
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&crawler).is_err());
    }
}
