//! Storage traits and error types
//!
//! This module defines the trait interfaces for storage backends and
//! associated error types.

use crate::crawler::Request;
use crate::state::RequestState;
use crate::storage::{RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable crawl state: runs and the request queue
///
/// Implementations are used behind a mutex by the request queue; every call is
/// a short synchronous write so workers never hold the lock across an await.
pub trait Storage: Send {
    // ===== Run Management =====

    /// Creates a new crawl run and returns its id
    fn create_run(&mut self, config_hash: &str, mode: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    // ===== Request Queue =====

    /// Stores a newly enqueued request
    ///
    /// Returns false if a row with the same dedup key already exists.
    fn insert_request(&mut self, request: &Request) -> StorageResult<bool>;

    /// Records a state change (and the current retry count) for a request
    fn update_request_state(
        &mut self,
        dedup_key: &str,
        state: RequestState,
        retry_count: u32,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Loads every non-terminal request, front rows first, then insertion order
    fn load_pending_requests(&self) -> StorageResult<Vec<Request>>;

    /// Loads every dedup key ever stored
    fn load_request_keys(&self) -> StorageResult<Vec<String>>;

    /// Counts requests in a given state
    fn count_requests_by_state(&self, state: RequestState) -> StorageResult<u64>;

    /// Removes all request rows (fresh crawl)
    fn clear_requests(&mut self) -> StorageResult<()>;
}

/// Key-value store used for checkpoints
pub trait PersistentStore: Send {
    /// Loads the value saved under `key`
    fn load(&self, key: &str) -> StorageResult<Option<String>>;

    /// Saves `value` under `key`, replacing any previous value
    fn save(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes every saved value (fresh crawl)
    fn clear(&mut self) -> StorageResult<()>;
}
