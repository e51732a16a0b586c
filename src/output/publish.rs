//! Post-crawl publishing: CDN invalidation and dataset upload
//!
//! Both run once, concurrently, after the crawl quiesced. Their failures are
//! logged and never change the exit status.

use crate::config::{CrawlMode, PostProcessingConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook answered HTTP {0}")]
    Status(u16),

    #[error("Missing post-processing setting: {0}")]
    NotConfigured(&'static str),
}

#[async_trait]
pub trait CdnInvalidator: Send + Sync {
    async fn invalidate(&self, distribution_id: &str, domain: &str) -> Result<(), PublishError>;
}

#[async_trait]
pub trait BatchUploader: Send + Sync {
    async fn upload(&self, dataset_name: &str) -> Result<(), PublishError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvalidatePayload<'a> {
    distribution_id: &'a str,
    domain: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadPayload<'a> {
    dataset_name: &'a str,
}

/// JSON POST to a webhook URL
pub struct Webhook {
    client: Client,
    url: String,
}

impl Webhook {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn post<T: Serialize + Sync>(&self, payload: &T) -> Result<(), PublishError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl CdnInvalidator for Webhook {
    async fn invalidate(&self, distribution_id: &str, domain: &str) -> Result<(), PublishError> {
        self.post(&InvalidatePayload {
            distribution_id,
            domain,
        })
        .await
    }
}

#[async_trait]
impl BatchUploader for Webhook {
    async fn upload(&self, dataset_name: &str) -> Result<(), PublishError> {
        self.post(&UploadPayload { dataset_name }).await
    }
}

/// Dataset name for a crawl mode; price and promo crawls feed their own tables
pub fn dataset_name_for(base: &str, mode: CrawlMode) -> String {
    match mode {
        CrawlMode::Price => format!("{}_price", base),
        CrawlMode::Promo => format!("{}_bf", base),
        CrawlMode::Full | CrawlMode::Test => base.to_string(),
    }
}

/// Runs invalidation and upload side by side
///
/// Skipped entirely in development. Returns how many of the two steps
/// succeeded.
pub async fn publish(
    config: &PostProcessingConfig,
    mode: CrawlMode,
    invalidator: Option<&dyn CdnInvalidator>,
    uploader: Option<&dyn BatchUploader>,
) -> usize {
    if config.development {
        tracing::info!("Development mode, skipping post-processing");
        return 0;
    }

    let invalidation = async {
        let invalidator = invalidator.ok_or(PublishError::NotConfigured("invalidate-url"))?;
        let distribution_id = config
            .distribution_id
            .as_deref()
            .ok_or(PublishError::NotConfigured("distribution-id"))?;
        let domain = config
            .domain
            .as_deref()
            .ok_or(PublishError::NotConfigured("domain"))?;
        invalidator.invalidate(distribution_id, domain).await
    };

    let upload = async {
        let uploader = uploader.ok_or(PublishError::NotConfigured("upload-url"))?;
        let base = config
            .dataset_name
            .as_deref()
            .ok_or(PublishError::NotConfigured("dataset-name"))?;
        uploader.upload(&dataset_name_for(base, mode)).await
    };

    let (invalidated, uploaded) = tokio::join!(invalidation, upload);

    let mut succeeded = 0;
    match invalidated {
        Ok(()) => {
            tracing::info!("Invalidated CDN cache");
            succeeded += 1;
        }
        Err(e) => tracing::error!("CDN invalidation failed: {}", e),
    }
    match uploaded {
        Ok(()) => {
            tracing::info!("Uploaded dataset");
            succeeded += 1;
        }
        Err(e) => tracing::error!("Dataset upload failed: {}", e),
    }
    succeeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> PostProcessingConfig {
        PostProcessingConfig {
            development: false,
            distribution_id: Some("DIST1".to_string()),
            domain: Some("shop.cz".to_string()),
            dataset_name: Some("shop".to_string()),
            invalidate_url: Some(format!("{}/invalidate", server.uri())),
            upload_url: Some(format!("{}/upload", server.uri())),
        }
    }

    #[test]
    fn test_dataset_names() {
        assert_eq!(dataset_name_for("shop", CrawlMode::Full), "shop");
        assert_eq!(dataset_name_for("shop", CrawlMode::Price), "shop_price");
        assert_eq!(dataset_name_for("shop", CrawlMode::Promo), "shop_bf");
    }

    #[tokio::test]
    async fn test_publish_posts_both_webhooks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invalidate"))
            .and(body_json(serde_json::json!({"distributionId": "DIST1", "domain": "shop.cz"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(body_json(serde_json::json!({"datasetName": "shop_price"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = config(&server);
        let client = Client::new();
        let invalidator = Webhook::new(client.clone(), config.invalidate_url.clone().unwrap());
        let uploader = Webhook::new(client, config.upload_url.clone().unwrap());

        assert_eq!(publish(&config, CrawlMode::Price, Some(&invalidator), Some(&uploader)).await, 2);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_other() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invalidate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = config(&server);
        let client = Client::new();
        let invalidator = Webhook::new(client.clone(), config.invalidate_url.clone().unwrap());
        let uploader = Webhook::new(client, config.upload_url.clone().unwrap());

        assert_eq!(publish(&config, CrawlMode::Full, Some(&invalidator), Some(&uploader)).await, 1);
    }

    #[tokio::test]
    async fn test_missing_webhook_is_reported_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = config(&server);
        let uploader = Webhook::new(Client::new(), config.upload_url.clone().unwrap());
        assert_eq!(publish(&config, CrawlMode::Full, None, Some(&uploader)).await, 1);
    }

    #[tokio::test]
    async fn test_development_skips_everything() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.development = true;
        let webhook = Webhook::new(Client::new(), format!("{}/any", server.uri()));

        assert_eq!(publish(&config, CrawlMode::Full, Some(&webhook), Some(&webhook)).await, 0);
    }
}
