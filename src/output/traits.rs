//! Output sink trait and errors

use crate::crawler::Record;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output closed")]
    Closed,
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for extracted records
///
/// Sinks do not deduplicate; callers go through [`super::RecordEmitter`].
/// Implementations must be thread-safe, workers emit concurrently.
pub trait OutputSink: Send + Sync {
    fn emit(&self, record: &Record) -> OutputResult<()>;

    /// Makes everything emitted so far durable
    fn flush(&self) -> OutputResult<()>;
}
