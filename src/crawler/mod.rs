//! Crawl engine
//!
//! This module contains the core crawling logic, including:
//! - The durable, deduplicating request queue
//! - Session rotation over proxies and browser fingerprints
//! - Challenge detection and solving
//! - Retry classification and backoff
//! - Extraction pipelines for catalog pages and price lists
//! - The bounded worker pool and overall run coordination

mod challenge;
mod checkpoint;
mod controller;
mod coordinator;
mod dedup;
mod fetcher;
mod fingerprint;
mod pipeline;
mod price;
mod proxy;
mod queue;
mod request;
mod retry;
mod seed;
mod session;
mod site;

pub use challenge::{
    extract_site_key, ChallengeError, ChallengeHandler, ChallengeState, ChallengeStatus,
    HttpSolver, Solver,
};
pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpointer, HANDLED_IDS_KEY};
pub use controller::{ConcurrencyController, ControllerSettings, CrawlEngine};
pub use coordinator::{run_crawl, CrawlOptions, CrawlReport, Coordinator};
pub use dedup::Deduplicator;
pub use fetcher::{
    build_http_client, FetchError, FetchedPage, Fetcher, HttpFetcher, CHALLENGE_TOKEN_FIELD,
};
pub use fingerprint::{DeviceKind, Fingerprint, FingerprintGenerator};
pub use pipeline::{parse_price, Extraction, ExtractionError, ExtractionPipeline, Pagination};
pub use price::PriceListPipeline;
pub use proxy::{DirectProvider, ProxyEndpoint, ProxyError, ProxyProvider, StaticProxyProvider};
pub use queue::{Disposition, EnqueueOutcome, RequestQueue};
pub use request::{Priority, Record, Request, RequestKind};
pub use retry::{Failure, FailureClass, RetryDecision, RetryPolicy};
pub use seed::{parse_price_feed, price_batches, seed_requests};
pub use session::{
    SessionIdentity, SessionLease, SessionOutcome, SessionPool, SessionState,
};
pub use site::{CatalogPipeline, SitePipeline, PROMO_CATEGORY};

use std::sync::{Mutex, MutexGuard};

/// Locks a mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
