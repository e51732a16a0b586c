//! Initial requests for each crawl mode

use crate::config::{CrawlMode, SeedConfig};
use crate::crawler::request::{Request, RequestKind};
use crate::{CrawlError, UrlError};
use reqwest::Client;

/// Item ids listed in a CSV price feed
///
/// Quotes are stripped, the header line is skipped and empty lines dropped.
pub fn parse_price_feed(body: &str) -> Vec<String> {
    body.replace('"', "")
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split(',').next().unwrap_or(line).trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// One POST request per `batch_size` ids, keyed by batch offset
pub fn price_batches(
    ids: &[String],
    endpoint: &str,
    batch_size: usize,
) -> Result<Vec<Request>, UrlError> {
    let batch_size = batch_size.max(1);
    ids.chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| {
            let body = format!("stiidlist={}", chunk.join(","));
            Ok(Request::new(
                endpoint,
                RequestKind::PriceBatch {
                    ids: chunk.to_vec(),
                },
            )?
            .with_dedup_key(format!("price-batch:{}", index * batch_size))
            .with_body(body))
        })
        .collect()
}

fn required<'a>(value: &'a Option<String>, key: &str, mode: CrawlMode) -> Result<&'a str, CrawlError> {
    value
        .as_deref()
        .ok_or_else(|| CrawlError::Startup(format!("{} mode requires seeds.{}", mode, key)))
}

/// Builds the seed requests for `mode`
///
/// Price mode downloads the feed first; an unreachable feed is a startup
/// failure.
pub async fn seed_requests(
    seeds: &SeedConfig,
    mode: CrawlMode,
    client: &Client,
) -> Result<Vec<Request>, CrawlError> {
    let requests = match mode {
        CrawlMode::Full => {
            let mut requests = Vec::new();
            for url in &seeds.start_urls {
                requests.push(Request::new(url, RequestKind::Start)?);
            }
            for url in &seeds.sublist_urls {
                requests.push(Request::new(url, RequestKind::SubList)?);
            }
            requests
        }
        CrawlMode::Test => {
            let url = required(&seeds.test_url, "test-url", mode)?;
            vec![Request::new(url, RequestKind::first_page(None, None))?]
        }
        CrawlMode::Promo => {
            let url = required(&seeds.promo_url, "promo-url", mode)?;
            vec![Request::new(url, RequestKind::Promo)?]
        }
        CrawlMode::Price => {
            let feed_url = required(&seeds.price_feed_url, "price-feed-url", mode)?;
            let endpoint = required(&seeds.price_endpoint, "price-endpoint", mode)?;

            let response = client
                .get(feed_url)
                .send()
                .await
                .map_err(|e| CrawlError::Startup(format!("price feed unreachable: {}", e)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(CrawlError::Startup(format!(
                    "price feed {} answered HTTP {}",
                    feed_url,
                    status.as_u16()
                )));
            }
            let body = response.text().await?;

            let ids = parse_price_feed(&body);
            tracing::info!("Price feed lists {} items", ids.len());
            price_batches(&ids, endpoint, seeds.price_batch_size)?
        }
    };

    if requests.is_empty() {
        return Err(CrawlError::Startup(format!("no seed requests for {} mode", mode)));
    }

    Ok(requests)
}
