//! Output module for records, counters and post-crawl publishing
//!
//! This module handles:
//! - Writing deduplicated records to the JSON-lines dataset
//! - Accumulating crawl counters and printing them
//! - Invalidating the CDN and uploading the dataset once a crawl ends

mod emitter;
mod jsonl;
pub mod publish;
pub mod stats;
mod traits;

pub use emitter::{EmitOutcome, RecordEmitter};
pub use jsonl::JsonLinesSink;
pub use publish::{publish, BatchUploader, CdnInvalidator, PublishError, Webhook};
pub use stats::{
    load_statistics, print_statistics, CrawlStatistics, Stats, StatsAccumulator, StatsEvent,
    StatsHandle, STATS_KEY,
};
pub use traits::{OutputError, OutputResult, OutputSink};
