//! Crawler coordinator - run lifecycle
//!
//! This module ties a crawl run together:
//! - Opening the store and deciding between resuming and starting fresh
//! - Seeding the queue for the selected crawl mode
//! - Building sessions, fetcher, challenge handler and pipelines from config
//! - Running the workers with periodic checkpoints
//! - Recording the run outcome and publishing the dataset

use crate::config::{Config, CrawlMode};
use crate::crawler::challenge::{ChallengeHandler, HttpSolver, Solver};
use crate::crawler::checkpoint::{load_checkpoint, save_checkpoint, Checkpointer};
use crate::crawler::controller::{ConcurrencyController, ControllerSettings, CrawlEngine};
use crate::crawler::dedup::Deduplicator;
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::fingerprint::FingerprintGenerator;
use crate::crawler::lock;
use crate::crawler::pipeline::ExtractionPipeline;
use crate::crawler::proxy::{DirectProvider, ProxyProvider, StaticProxyProvider};
use crate::crawler::queue::RequestQueue;
use crate::crawler::retry::RetryPolicy;
use crate::crawler::seed::seed_requests;
use crate::crawler::session::SessionPool;
use crate::crawler::site::SitePipeline;
use crate::output::{
    publish, BatchUploader, CdnInvalidator, JsonLinesSink, OutputSink, RecordEmitter, Stats,
    StatsAccumulator, Webhook,
};
use crate::storage::{open_storage, PersistentStore, RunStatus, SqliteStorage, Storage};
use crate::CrawlError;
use reqwest::Client;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run options taken from the command line
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Start a new run even if the last one can be resumed
    pub fresh: bool,

    /// Overrides `seeds.mode`
    pub mode: Option<CrawlMode>,
}

/// Outcome of a finished or interrupted run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub run_id: i64,
    pub mode: CrawlMode,
    pub resumed: bool,
    pub status: RunStatus,
    pub stats: Stats,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    mode: CrawlMode,
    storage: Arc<Mutex<SqliteStorage>>,
    run_id: i64,
    resumed: bool,
    dedup: Arc<Deduplicator>,
    queue: Arc<RequestQueue>,
    initial_stats: Stats,
    pipeline: Arc<dyn ExtractionPipeline>,
    sink: Arc<dyn OutputSink>,
    provider: Arc<dyn ProxyProvider>,
    fetcher: Arc<dyn Fetcher>,
    solver: Option<Arc<dyn Solver>>,
    invalidator: Option<Arc<dyn CdnInvalidator>>,
    uploader: Option<Arc<dyn BatchUploader>>,
}

impl Coordinator {
    /// Creates a coordinator with a resumed or freshly seeded queue
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, recorded with new runs
    /// * `options` - Command line overrides
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(CrawlError)` - Startup failure: the store cannot be opened, the
    ///   seeds cannot be built, or no proxy is obtainable
    pub async fn new(
        config: Config,
        config_hash: &str,
        options: CrawlOptions,
    ) -> Result<Self, CrawlError> {
        let mode = options.mode.unwrap_or(config.seeds.mode);
        let client = Client::builder()
            .timeout(Duration::from_secs(config.crawler.fetch_timeout_secs))
            .build()?;

        let provider: Arc<dyn ProxyProvider> = if config.proxy.pool_names.is_empty() {
            Arc::new(DirectProvider)
        } else {
            Arc::new(StaticProxyProvider::from_config(&config.proxy))
        };
        for pool in &config.proxy.pool_names {
            let endpoint = provider.next(pool)?;
            tracing::debug!("Proxy pool {} ready ({:?})", pool, endpoint.url);
        }

        let pipeline: Arc<dyn ExtractionPipeline> = Arc::new(SitePipeline::new(&config.site)?);

        let mut storage = open_storage(Path::new(&config.output.database_path))?;
        let dedup = Arc::new(Deduplicator::new());

        let resumable = match storage.get_latest_run()? {
            Some(run) if !options.fresh && run.status.is_resumable() && run.mode == mode.as_str() => {
                Some(run.id)
            }
            _ => None,
        };

        let (run_id, resumed, initial_stats) = match resumable {
            Some(run_id) => {
                tracing::info!("Resuming run {} ({} mode)", run_id, mode);
                let (stats, handled_ids) = load_checkpoint(&storage)?;
                dedup.seed_records(handled_ids);
                storage.update_run_status(run_id, RunStatus::Running)?;
                (run_id, true, stats)
            }
            None => {
                storage.clear_requests()?;
                PersistentStore::clear(&mut storage)?;
                let run_id = storage.create_run(config_hash, mode.as_str())?;
                tracing::info!("Starting run {} ({} mode)", run_id, mode);
                (run_id, false, Stats::default())
            }
        };

        let storage = Arc::new(Mutex::new(storage));
        let queue = if resumed {
            RequestQueue::resume(Arc::clone(&storage), Arc::clone(&dedup))?
        } else {
            let seeds = match seed_requests(&config.seeds, mode, &client).await {
                Ok(seeds) => seeds,
                Err(e) => {
                    lock(&storage).update_run_status(run_id, RunStatus::Failed)?;
                    return Err(e);
                }
            };
            let queue = RequestQueue::new(Arc::clone(&storage), Arc::clone(&dedup));
            for request in seeds {
                queue.enqueue(request);
            }
            tracing::info!("Seeded {} requests", queue.size());
            queue
        };

        let sink: Arc<dyn OutputSink> = Arc::new(JsonLinesSink::open(
            Path::new(&config.output.dataset_path),
            !resumed,
        )?);

        let solver: Option<Arc<dyn Solver>> = match (&config.challenge.solver_url, config.challenge.enabled) {
            (Some(url), true) => Some(Arc::new(HttpSolver::new(url.clone())?) as Arc<dyn Solver>),
            _ => None,
        };

        let post = &config.post_processing;
        let invalidator = post
            .invalidate_url
            .as_ref()
            .map(|url| Arc::new(Webhook::new(client.clone(), url.clone())) as Arc<dyn CdnInvalidator>);
        let uploader = post
            .upload_url
            .as_ref()
            .map(|url| Arc::new(Webhook::new(client.clone(), url.clone())) as Arc<dyn BatchUploader>);

        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.crawler.fetch_timeout_secs,
        )));

        Ok(Self {
            config: Arc::new(config),
            mode,
            storage,
            run_id,
            resumed,
            dedup,
            queue: Arc::new(queue),
            initial_stats,
            pipeline,
            sink,
            provider,
            fetcher,
            solver,
            invalidator,
            uploader,
        })
    }

    /// Replaces the HTTP fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replaces the challenge solver
    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_publishers(
        mut self,
        invalidator: Arc<dyn CdnInvalidator>,
        uploader: Arc<dyn BatchUploader>,
    ) -> Self {
        self.invalidator = Some(invalidator);
        self.uploader = Some(uploader);
        self
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Number of requests waiting to be crawled
    pub fn pending(&self) -> usize {
        self.queue.size()
    }

    /// Runs the crawl until quiescence or until `cancel` fires
    ///
    /// An interrupted run is recorded as such and can be resumed; post-processing
    /// only follows a run that reached quiescence.
    pub async fn run(self, cancel: CancellationToken) -> Result<CrawlReport, CrawlError> {
        let config = Arc::clone(&self.config);

        let accumulator = StatsAccumulator::spawn(self.initial_stats.clone());
        let emitter = RecordEmitter::new(
            Arc::clone(&self.dedup),
            Arc::clone(&self.sink),
            accumulator.handle(),
        );

        let sessions = Arc::new(SessionPool::new(
            config.session.clone(),
            Arc::clone(&self.provider),
            config.proxy.pool_names.clone(),
            FingerprintGenerator::default(),
        ));

        let engine = CrawlEngine {
            queue: Arc::clone(&self.queue),
            sessions,
            fetcher: Arc::clone(&self.fetcher),
            challenges: Arc::new(ChallengeHandler::new(
                config.challenge.clone(),
                self.solver.clone(),
            )),
            policy: RetryPolicy::from_config(&config.crawler),
            pipeline: Arc::clone(&self.pipeline),
            emitter: emitter.clone(),
            stats: accumulator.handle(),
        };
        let controller =
            ConcurrencyController::new(engine, ControllerSettings::from_config(&config.crawler));

        let stop_checkpoints = CancellationToken::new();
        let checkpoints = Checkpointer::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.dedup),
            accumulator.handle(),
            Duration::from_secs(config.crawler.checkpoint_interval_secs),
        )
        .with_sink(Arc::clone(&self.sink))
        .spawn(stop_checkpoints.clone());

        tracing::info!(
            "Crawling run {} with {} pending requests",
            self.run_id,
            self.queue.size()
        );
        controller.run(&cancel).await;

        stop_checkpoints.cancel();
        if let Err(e) = checkpoints.await {
            tracing::error!("Checkpoint task failed: {}", e);
        }

        if let Err(e) = emitter.flush() {
            tracing::error!("Failed to flush dataset: {}", e);
        }
        let stats = accumulator.finish().await;

        let status = if cancel.is_cancelled() {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };

        {
            let mut storage = lock(&self.storage);
            if let Err(e) = save_checkpoint(&mut *storage, &stats, &self.dedup) {
                tracing::error!("Final checkpoint failed: {}", e);
            }
            storage.update_run_status(self.run_id, status)?;
        }

        match status {
            RunStatus::Completed => {
                tracing::info!("Crawl completed: {:?}", stats);
                publish(
                    &config.post_processing,
                    self.mode,
                    self.invalidator.as_deref(),
                    self.uploader.as_deref(),
                )
                .await;
            }
            _ => tracing::warn!(
                "Crawl interrupted with {} requests pending; run again to resume",
                self.queue.size()
            ),
        }

        Ok(CrawlReport {
            run_id: self.run_id,
            mode: self.mode,
            resumed: self.resumed,
            status,
            stats,
        })
    }
}

/// Runs a crawl, stopping gracefully on Ctrl-C
///
/// # Example
///
/// ```no_run
/// use pricewatch::config::load_config_with_hash;
/// use pricewatch::crawler::{run_crawl, CrawlOptions};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("config.toml"))?;
/// let report = run_crawl(config, &hash, CrawlOptions::default()).await?;
/// println!("{} items", report.stats.items_emitted);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    options: CrawlOptions,
) -> Result<CrawlReport, CrawlError> {
    let coordinator = Coordinator::new(config, config_hash, options).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    coordinator.run(cancel).await
}
