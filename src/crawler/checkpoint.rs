//! Periodic snapshots of counters and emitted item ids

use crate::crawler::{lock, Deduplicator};
use crate::output::{OutputSink, Stats, StatsHandle, STATS_KEY};
use crate::storage::{PersistentStore, SqliteStorage, StorageResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Key under which checkpoints store the emitted item ids
pub const HANDLED_IDS_KEY: &str = "handled-ids";

/// Writes counters and the record dedup set to the key-value store
pub fn save_checkpoint(
    store: &mut dyn PersistentStore,
    stats: &Stats,
    dedup: &Deduplicator,
) -> StorageResult<()> {
    let stats_json = serde_json::to_string(stats)?;
    let ids_json = serde_json::to_string(&dedup.handled_ids())?;
    store.save(STATS_KEY, &stats_json)?;
    store.save(HANDLED_IDS_KEY, &ids_json)?;
    Ok(())
}

/// Reads the last checkpoint; missing keys give empty values
pub fn load_checkpoint(store: &dyn PersistentStore) -> StorageResult<(Stats, Vec<String>)> {
    let stats = match store.load(STATS_KEY)? {
        Some(json) => serde_json::from_str(&json)?,
        None => Stats::default(),
    };
    let ids = match store.load(HANDLED_IDS_KEY)? {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };
    Ok((stats, ids))
}

pub struct Checkpointer {
    storage: Arc<Mutex<SqliteStorage>>,
    dedup: Arc<Deduplicator>,
    stats: StatsHandle,
    interval: Duration,
    sink: Option<Arc<dyn OutputSink>>,
}

impl Checkpointer {
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        dedup: Arc<Deduplicator>,
        stats: StatsHandle,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            dedup,
            stats,
            interval,
            sink: None,
        }
    }

    /// Flushes `sink` before each checkpoint so saved item ids are on disk
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Snapshots the live counters and saves them
    ///
    /// Returns false when the accumulator has already finished.
    pub async fn checkpoint(&self) -> StorageResult<bool> {
        let Some(stats) = self.stats.snapshot().await else {
            return Ok(false);
        };
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.flush() {
                tracing::error!("Failed to flush dataset before checkpoint: {}", e);
            }
        }
        save_checkpoint(&mut *lock(&self.storage), &stats, &self.dedup)?;
        tracing::debug!(
            "Checkpoint saved: {} items, {} pages",
            stats.items_emitted,
            stats.pages_fetched
        );
        Ok(true)
    }

    /// Checkpoints every interval until `stop` is cancelled
    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.checkpoint().await {
                            Ok(true) => {}
                            Ok(false) => break,
                            Err(e) => tracing::error!("Checkpoint failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
