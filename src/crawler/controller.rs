//! Concurrency controller - the worker loop
//!
//! A fixed number of workers each repeat the same ordered stages:
//! 1. Take a request from the queue
//! 2. Lease a session for the request's target
//! 3. Fetch it, bounded by the fetch timeout
//! 4. Resolve a challenge in place if the response is one
//! 5. Extract records and follow-ups, or classify the failure
//! 6. Release or retire the session, then settle the request with the queue
//!
//! The crawl ends when the queue reports quiescence or the stop token is
//! cancelled and in-flight work has drained.

use crate::config::CrawlerConfig;
use crate::crawler::challenge::ChallengeHandler;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::pipeline::{Extraction, ExtractionPipeline};
use crate::crawler::queue::{Disposition, EnqueueOutcome, RequestQueue};
use crate::crawler::request::Request;
use crate::crawler::retry::{Failure, RetryDecision, RetryPolicy};
use crate::crawler::session::{SessionLease, SessionOutcome, SessionPool, SessionState};
use crate::output::{EmitOutcome, RecordEmitter, StatsEvent, StatsHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Worker settings taken from `[crawler]`
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub max_concurrency: usize,
    pub fetch_timeout: Duration,
    pub jitter_ms: [u64; 2],
    pub progress_every: u64,
}

impl ControllerSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            jitter_ms: config.jitter_ms,
            progress_every: config.progress_every,
        }
    }

    fn jitter(&self) -> Duration {
        let [min, max] = self.jitter_ms;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

/// Collaborators shared by all workers
pub struct CrawlEngine {
    pub queue: Arc<RequestQueue>,
    pub sessions: Arc<SessionPool>,
    pub fetcher: Arc<dyn Fetcher>,
    pub challenges: Arc<ChallengeHandler>,
    pub policy: RetryPolicy,
    pub pipeline: Arc<dyn ExtractionPipeline>,
    pub emitter: RecordEmitter,
    pub stats: StatsHandle,
}

struct Shared {
    engine: CrawlEngine,
    settings: ControllerSettings,
    handled: AtomicU64,
    started: Instant,
}

pub struct ConcurrencyController {
    shared: Arc<Shared>,
}

impl ConcurrencyController {
    pub fn new(engine: CrawlEngine, settings: ControllerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                settings,
                handled: AtomicU64::new(0),
                started: Instant::now(),
            }),
        }
    }

    /// Runs the workers to completion
    ///
    /// Returns the number of requests settled (handled, dropped or requeued).
    pub async fn run(&self, cancel: &CancellationToken) -> u64 {
        let workers = self.shared.settings.max_concurrency;
        tracing::info!("Starting {} workers", workers);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                shared.worker(worker_id, cancel).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        let settled = self.shared.handled.load(Ordering::Relaxed);
        tracing::info!(
            "Workers stopped after {} requests in {:?}",
            settled,
            self.shared.started.elapsed()
        );
        settled
    }
}

impl Shared {
    async fn worker(&self, worker_id: usize, cancel: CancellationToken) {
        tracing::debug!("Worker {} started", worker_id);

        while let Some(request) = self.engine.queue.dequeue(&cancel).await {
            self.process(request, &cancel).await;
            self.report_progress();

            let pause = self.settings.jitter();
            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::debug!("Worker {} finished", worker_id);
    }

    async fn process(&self, request: Request, cancel: &CancellationToken) {
        let target = request.target();
        let lease = match self.engine.sessions.acquire(target.as_deref()).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!("No session for {}: {}", request.url, e);
                let failure = Failure::NetworkTransient(format!("no session: {}", e));
                self.settle_failure(request, failure, None, cancel).await;
                return;
            }
        };

        match self.attempt(&request, &lease, cancel).await {
            Ok(extraction) => {
                self.release(lease, SessionOutcome::Success);
                if self.apply(&request, extraction) > 0 {
                    // Records must be on disk before the request is marked handled
                    if let Err(e) = self.engine.emitter.flush() {
                        tracing::error!("Failed to flush records of {}: {}", request.url, e);
                    }
                }
                self.engine.queue.finish(request, Disposition::Handled);
            }
            Err(failure) => {
                self.settle_failure(request, failure, Some(lease), cancel)
                    .await;
            }
        }
    }

    /// Fetch, challenge and extraction stages for one attempt
    async fn attempt(
        &self,
        request: &Request,
        lease: &SessionLease,
        cancel: &CancellationToken,
    ) -> Result<Extraction, Failure> {
        let fetcher = self.engine.fetcher.as_ref();
        let identity = &lease.identity;

        let page = match tokio::time::timeout(
            self.settings.fetch_timeout,
            fetcher.fetch(request, identity),
        )
        .await
        {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => return Err(Failure::NetworkTransient(e.to_string())),
            Err(_) => {
                return Err(Failure::NetworkTransient(format!(
                    "fetch timed out after {:?}",
                    self.settings.fetch_timeout
                )))
            }
        };

        let page = if self.engine.challenges.detect(&page) {
            match self
                .engine
                .challenges
                .resolve(fetcher, request, identity, &page, cancel)
                .await
            {
                Ok(accepted) => {
                    self.engine.stats.record(StatsEvent::ChallengeSolved);
                    accepted
                }
                Err(e) => {
                    self.engine.stats.record(StatsEvent::ChallengeFailed);
                    return Err(Failure::ChallengeSolveFailed(e.to_string()));
                }
            }
        } else {
            page
        };

        if !page.is_success() {
            return Err(Failure::from_status(page.status));
        }

        self.engine.stats.record(StatsEvent::PageFetched);
        tracing::debug!("Fetched {} {} ({} bytes)", request.kind, request.url, page.body.len());

        self.engine
            .pipeline
            .extract(request, &page)
            .map_err(|e| Failure::ExtractionMalformed(e.to_string()))
    }

    /// Queues follow-ups and emits records of an accepted page
    ///
    /// Returns how many records reached the sink.
    fn apply(&self, request: &Request, extraction: Extraction) -> usize {
        if extraction.categories_seen > 0 {
            self.engine
                .stats
                .record(StatsEvent::CategoriesSeen(extraction.categories_seen));
        }

        for followup in extraction.followups {
            self.engine.queue.enqueue(followup);
        }

        if let Some(pagination) = &extraction.pagination {
            let enqueued = pagination
                .followups(request)
                .into_iter()
                .map(|page| self.engine.queue.enqueue(page))
                .filter(|outcome| *outcome == EnqueueOutcome::Enqueued)
                .count() as u64;
            if enqueued > 0 {
                tracing::info!(
                    "Enqueued {} more pages of {} ({} items)",
                    enqueued,
                    request.url,
                    pagination.total_count
                );
                self.engine
                    .stats
                    .record(StatsEvent::PaginationEnqueued(enqueued));
            }
        }

        let mut emitted = 0;
        for record in &extraction.records {
            match self.engine.emitter.emit(record) {
                Ok(EmitOutcome::Emitted) => emitted += 1,
                Ok(EmitOutcome::Duplicate) => {}
                Err(e) => tracing::error!("Failed to write record {}: {}", record.item_id, e),
            }
        }
        emitted
    }

    async fn settle_failure(
        &self,
        request: Request,
        failure: Failure,
        lease: Option<SessionLease>,
        cancel: &CancellationToken,
    ) {
        let decision = self.engine.policy.decide(&failure, request.retry_count);

        if let Some(lease) = lease {
            let retire = matches!(
                decision,
                RetryDecision::Retry {
                    retire_session: true,
                    ..
                } | RetryDecision::Drop {
                    retire_session: true,
                    ..
                }
            );
            if retire {
                let session_id = lease.session_id();
                self.engine.sessions.retire(lease);
                self.session_retired(session_id);
            } else {
                self.release(lease, failure.session_outcome());
            }
        }

        match decision {
            RetryDecision::Retry { delay, .. } => {
                tracing::warn!(
                    "Retrying {} (attempt {} of {}): {}",
                    request.url,
                    request.retry_count + 1,
                    self.engine.policy.max_retries(),
                    failure
                );
                self.engine.stats.record(StatsEvent::RequestRetried);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                self.engine.queue.finish(request, Disposition::Retry);
            }
            RetryDecision::Drop { reason, .. } => {
                tracing::error!("Giving up on {}: {}", request.url, reason);
                self.engine.stats.record(StatsEvent::ItemFailed);
                self.engine.queue.finish(request, Disposition::Failed(reason));
            }
        }
    }

    fn release(&self, lease: SessionLease, outcome: SessionOutcome) {
        let session_id = lease.session_id();
        if self.engine.sessions.release(lease, outcome) == SessionState::Retired {
            self.session_retired(session_id);
        }
    }

    fn session_retired(&self, session_id: u64) {
        tracing::warn!("Session {} retired", session_id);
        self.engine.fetcher.forget_session(session_id);
        self.engine.stats.record(StatsEvent::SessionRetired);
    }

    fn report_progress(&self) {
        let settled = self.handled.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self.settings.progress_every;
        if every == 0 || settled % every != 0 {
            return;
        }

        let elapsed = self.started.elapsed();
        let rate = settled as f64 / elapsed.as_secs_f64().max(0.001);
        tracing::info!(
            "Progress: {} requests settled, {} queued, {} in flight, {} sessions, {:.2} req/sec",
            settled,
            self.engine.queue.size(),
            self.engine.queue.in_flight(),
            self.engine.sessions.active_count(),
            rate
        );
    }
}
