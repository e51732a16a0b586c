//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - One HTTP client per session, carrying its proxy and user agent
//! - Fingerprint headers on every request, cookies from the session's store
//! - Form POST bodies (price batches, challenge resubmission)
//! - Error classification

use crate::crawler::lock;
use crate::crawler::request::Request;
use crate::crawler::session::SessionIdentity;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Form field carrying a solved challenge token
pub const CHALLENGE_TOKEN_FIELD: &str = "g-recaptcha-response";

/// A received response
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors raised before a response was received
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_builder() {
            FetchError::Client(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Executes requests on behalf of a session
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs the request as the given session
    async fn fetch(
        &self,
        request: &Request,
        identity: &SessionIdentity,
    ) -> Result<FetchedPage, FetchError>;

    /// Resubmits the request with a solved challenge token
    async fn submit_challenge(
        &self,
        request: &Request,
        identity: &SessionIdentity,
        token: &str,
    ) -> Result<FetchedPage, FetchError>;

    /// Drops per-session resources of a retired session
    fn forget_session(&self, session_id: u64);
}

/// Builds an HTTP client for a session
///
/// # Arguments
///
/// * `identity` - The session whose fingerprint, proxy and cookie store the client uses
/// * `timeout` - Timeout for a whole request, redirects included
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy URL or TLS setup failure
pub fn build_http_client(
    identity: &SessionIdentity,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    for (name, value) in identity.fingerprint.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    let mut builder = Client::builder()
        .user_agent(identity.fingerprint.user_agent.clone())
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .cookie_provider(Arc::clone(&identity.cookies))
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = &identity.proxy.url {
        builder = builder.proxy(Proxy::all(proxy_url)?);
    }

    builder.build()
}

/// reqwest-backed fetcher with a client cache keyed by session id
pub struct HttpFetcher {
    clients: Mutex<HashMap<u64, Client>>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn client_for(&self, identity: &SessionIdentity) -> Result<Client, FetchError> {
        let mut clients = lock(&self.clients);
        if let Some(client) = clients.get(&identity.session_id) {
            return Ok(client.clone());
        }
        let client = build_http_client(identity, self.timeout)?;
        clients.insert(identity.session_id, client.clone());
        Ok(client)
    }

    async fn send(
        &self,
        identity: &SessionIdentity,
        url: &str,
        form_body: Option<String>,
    ) -> Result<FetchedPage, FetchError> {
        let client = self.client_for(identity)?;

        let builder = match form_body {
            Some(body) => client
                .post(url)
                .header(
                    CONTENT_TYPE,
                    "application/x-www-form-urlencoded; charset=UTF-8",
                )
                .body(body),
            None => client.get(url),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        tracing::debug!("{} {} -> {}", identity.session_id, url, status);

        Ok(FetchedPage {
            url: final_url,
            status,
            body,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &Request,
        identity: &SessionIdentity,
    ) -> Result<FetchedPage, FetchError> {
        self.send(identity, &request.url, request.body.clone()).await
    }

    async fn submit_challenge(
        &self,
        request: &Request,
        identity: &SessionIdentity,
        token: &str,
    ) -> Result<FetchedPage, FetchError> {
        // The serializer is not Send, so it must be gone before the await
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            if let Some(body) = &request.body {
                for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
                    form.append_pair(&key, &value);
                }
            }
            form.append_pair(CHALLENGE_TOKEN_FIELD, token);
            form.finish()
        };

        self.send(identity, &request.url, Some(body)).await
    }

    fn forget_session(&self, session_id: u64) {
        lock(&self.clients).remove(&session_id);
    }
}
