//! Interactive challenge handling
//!
//! A challenged response is detected by status code plus a body marker. The
//! site key is read from the embedded widget, a [`Solver`] turns it into a
//! token, and the fetcher resubmits the page with that token. Solving happens
//! inside the worker that hit the challenge; other workers keep going.

use crate::config::ChallengeConfig;
use crate::crawler::fetcher::{FetchError, FetchedPage, Fetcher};
use crate::crawler::request::Request;
use crate::crawler::session::SessionIdentity;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Why a challenge could not be resolved
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Challenge solving is disabled")]
    Disabled,

    #[error("No site key found on challenge page")]
    MissingSiteKey,

    #[error("Solver timed out after {0}s")]
    Timeout(u64),

    #[error("Solver failed: {0}")]
    Solver(String),

    #[error("Resubmission failed: {0}")]
    Submit(#[from] FetchError),

    #[error("Page still challenged after resubmission")]
    StillChallenged,
}

/// Progress of one challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    None,
    Detected,
    Solving,
    Solved,
    Failed,
}

impl ChallengeStatus {
    fn can_advance_to(self, next: ChallengeStatus) -> bool {
        matches!(
            (self, next),
            (Self::None, Self::Detected)
                | (Self::Detected, Self::Solving)
                | (Self::Detected, Self::Failed)
                | (Self::Solving, Self::Solved)
                | (Self::Solving, Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Solved | Self::Failed)
    }
}

/// Challenge bookkeeping for a single request; never persisted
#[derive(Debug, Clone)]
pub struct ChallengeState {
    pub request_id: String,
    pub status: ChallengeStatus,
    pub site_key: Option<String>,
    pub solver_handle: Option<String>,
}

impl ChallengeState {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ChallengeStatus::None,
            site_key: None,
            solver_handle: None,
        }
    }

    /// Moves to `next` if the transition is allowed; returns whether it moved
    pub fn advance(&mut self, next: ChallengeStatus) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                "Ignoring challenge transition {:?} -> {:?} for {}",
                self.status,
                next,
                self.request_id
            );
            return false;
        }
        tracing::debug!("Challenge {}: {:?} -> {:?}", self.request_id, self.status, next);
        self.status = next;
        true
    }
}

/// Turns a challenge site key into a response token
#[async_trait]
pub trait Solver: Send + Sync {
    async fn solve(
        &self,
        site_key: &str,
        page_url: &str,
        identity: &SessionIdentity,
    ) -> Result<String, ChallengeError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveRequest<'a> {
    site_key: &'a str,
    page_url: &'a str,
    user_agent: &'a str,
}

#[derive(Deserialize)]
struct SolveResponse {
    token: Option<String>,
    error: Option<String>,
}

/// Solver backed by an HTTP solving service
pub struct HttpSolver {
    client: Client,
    endpoint: String,
}

impl HttpSolver {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Solver for HttpSolver {
    async fn solve(
        &self,
        site_key: &str,
        page_url: &str,
        identity: &SessionIdentity,
    ) -> Result<String, ChallengeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SolveRequest {
                site_key,
                page_url,
                user_agent: &identity.fingerprint.user_agent,
            })
            .send()
            .await
            .map_err(|e| ChallengeError::Solver(e.to_string()))?;

        let status = response.status();
        let body: SolveResponse = response
            .json()
            .await
            .map_err(|e| ChallengeError::Solver(format!("HTTP {}: {}", status, e)))?;

        match (body.token, body.error) {
            (Some(token), _) if !token.is_empty() => Ok(token),
            (_, Some(error)) => Err(ChallengeError::Solver(error)),
            _ => Err(ChallengeError::Solver(format!(
                "HTTP {}: response carried no token",
                status
            ))),
        }
    }
}

/// Reads the widget site key from a challenge page
///
/// Looks at the `k` query parameter of the challenge frame first, then at a
/// `data-sitekey` attribute.
pub fn extract_site_key(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let frames = Selector::parse("iframe[src*='/bframe'], iframe[src*='/anchor']").ok()?;
    let base = Url::parse("https://www.google.com/").ok()?;

    for frame in document.select(&frames) {
        let Some(src) = frame.value().attr("src") else {
            continue;
        };
        let Ok(url) = base.join(src) else {
            continue;
        };
        if let Some((_, key)) = url.query_pairs().find(|(name, _)| name == "k") {
            if !key.is_empty() {
                return Some(key.into_owned());
            }
        }
    }

    let widgets = Selector::parse("[data-sitekey]").ok()?;
    document
        .select(&widgets)
        .filter_map(|el| el.value().attr("data-sitekey"))
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string)
}

pub struct ChallengeHandler {
    config: ChallengeConfig,
    solver: Option<Arc<dyn Solver>>,
    markers: Vec<String>,
}

impl ChallengeHandler {
    pub fn new(config: ChallengeConfig, solver: Option<Arc<dyn Solver>>) -> Self {
        let markers = config.markers.iter().map(|m| m.to_lowercase()).collect();
        Self {
            config,
            solver,
            markers,
        }
    }

    /// Returns true if the response is a challenge page
    pub fn detect(&self, page: &FetchedPage) -> bool {
        if !self.config.status_codes.contains(&page.status) {
            return false;
        }
        let body = page.body.to_lowercase();
        self.markers.iter().any(|marker| body.contains(marker))
    }

    /// Solves the challenge on `page` and returns the accepted response
    ///
    /// On success the response of the resubmission is returned with its status
    /// forced to 200, after the configured cool-down. Cancelling `cancel` cuts
    /// the cool-down short.
    pub async fn resolve(
        &self,
        fetcher: &dyn Fetcher,
        request: &Request,
        identity: &SessionIdentity,
        page: &FetchedPage,
        cancel: &CancellationToken,
    ) -> Result<FetchedPage, ChallengeError> {
        let mut state = ChallengeState::new(request.dedup_key.clone());
        state.advance(ChallengeStatus::Detected);
        tracing::warn!("Challenge detected on {}", request.url);

        let result = self
            .solve_detected(&mut state, fetcher, request, identity, page, cancel)
            .await;
        match &result {
            Ok(_) => {
                state.advance(ChallengeStatus::Solved);
                tracing::info!("Challenge solved for {}", request.url);
            }
            Err(e) => {
                state.advance(ChallengeStatus::Failed);
                tracing::warn!("Challenge failed for {}: {}", request.url, e);
            }
        }
        result
    }

    async fn solve_detected(
        &self,
        state: &mut ChallengeState,
        fetcher: &dyn Fetcher,
        request: &Request,
        identity: &SessionIdentity,
        page: &FetchedPage,
        cancel: &CancellationToken,
    ) -> Result<FetchedPage, ChallengeError> {
        let solver = match (&self.solver, self.config.enabled) {
            (Some(solver), true) => solver,
            _ => return Err(ChallengeError::Disabled),
        };

        let site_key = extract_site_key(&page.body).ok_or(ChallengeError::MissingSiteKey)?;
        state.site_key = Some(site_key.clone());
        state.advance(ChallengeStatus::Solving);

        let timeout = Duration::from_secs(self.config.solve_timeout_secs);
        let token = tokio::time::timeout(timeout, solver.solve(&site_key, &page.url, identity))
            .await
            .map_err(|_| ChallengeError::Timeout(self.config.solve_timeout_secs))??;
        state.solver_handle = Some(token.chars().take(12).collect());

        let mut accepted = fetcher.submit_challenge(request, identity, &token).await?;
        if self.detect(&accepted) {
            return Err(ChallengeError::StillChallenged);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Cool-down for {} cut short by shutdown", request.url);
            }
            _ = tokio::time::sleep(Duration::from_millis(self.config.cooldown_ms)) => {}
        }
        accepted.status = 200;
        Ok(accepted)
    }
}
