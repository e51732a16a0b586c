//! Crawl counters
//!
//! A single task owns the [`Stats`] value. Workers send [`StatsEvent`]s through a
//! cloneable [`StatsHandle`]; snapshots are answered over a oneshot channel.

use crate::state::RequestState;
use crate::storage::{PersistentStore, RunRecord, SqliteStorage, Storage};
use crate::CrawlError;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Key under which checkpoints store the counters
pub const STATS_KEY: &str = "stats";

/// Monotonic crawl counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub categories_seen: u64,
    pub pages_fetched: u64,
    pub pagination_links_enqueued: u64,
    pub items_emitted: u64,
    pub items_duplicate: u64,
    pub items_failed: u64,
    pub requests_retried: u64,
    pub challenges_solved: u64,
    pub challenges_failed: u64,
    pub sessions_retired: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsEvent {
    CategoriesSeen(u64),
    PageFetched,
    PaginationEnqueued(u64),
    ItemEmitted,
    ItemDuplicate,
    ItemFailed,
    RequestRetried,
    ChallengeSolved,
    ChallengeFailed,
    SessionRetired,
}

impl Stats {
    pub fn apply(&mut self, event: StatsEvent) {
        match event {
            StatsEvent::CategoriesSeen(n) => self.categories_seen += n,
            StatsEvent::PageFetched => self.pages_fetched += 1,
            StatsEvent::PaginationEnqueued(n) => self.pagination_links_enqueued += n,
            StatsEvent::ItemEmitted => self.items_emitted += 1,
            StatsEvent::ItemDuplicate => self.items_duplicate += 1,
            StatsEvent::ItemFailed => self.items_failed += 1,
            StatsEvent::RequestRetried => self.requests_retried += 1,
            StatsEvent::ChallengeSolved => self.challenges_solved += 1,
            StatsEvent::ChallengeFailed => self.challenges_failed += 1,
            StatsEvent::SessionRetired => self.sessions_retired += 1,
        }
    }
}

enum Command {
    Event(StatsEvent),
    Snapshot(oneshot::Sender<Stats>),
    Finish(oneshot::Sender<Stats>),
}

/// Cloneable sender side of the accumulator
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl StatsHandle {
    /// Records an event; events sent after `finish` are dropped
    pub fn record(&self, event: StatsEvent) {
        let _ = self.tx.send(Command::Event(event));
    }

    /// Current counters, or `None` once the accumulator has finished
    pub async fn snapshot(&self) -> Option<Stats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(reply)).ok()?;
        rx.await.ok()
    }
}

pub struct StatsAccumulator {
    handle: StatsHandle,
    task: JoinHandle<Stats>,
}

impl StatsAccumulator {
    /// Spawns the owning task, starting from `initial` (resumed runs carry their counters)
    pub fn spawn(initial: Stats) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut stats = initial;
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Event(event) => stats.apply(event),
                    Command::Snapshot(reply) => {
                        let _ = reply.send(stats.clone());
                    }
                    Command::Finish(reply) => {
                        let _ = reply.send(stats.clone());
                        break;
                    }
                }
            }
            stats
        });

        Self {
            handle: StatsHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> StatsHandle {
        self.handle.clone()
    }

    /// Stops the accumulator after every event sent so far, returning the final counters
    pub async fn finish(self) -> Stats {
        let (reply, rx) = oneshot::channel();
        if self.handle.tx.send(Command::Finish(reply)).is_ok() {
            if let Ok(stats) = rx.await {
                return stats;
            }
        }
        self.task.await.unwrap_or_default()
    }
}

/// Stored state of the latest run
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub run: Option<RunRecord>,

    /// Counters of the last checkpoint
    pub stats: Stats,

    /// Queue rows per state
    pub requests_by_state: Vec<(RequestState, u64)>,
}

/// Loads the latest run, its last checkpointed counters and the queue breakdown
pub fn load_statistics(storage: &SqliteStorage) -> Result<CrawlStatistics, CrawlError> {
    let run = storage.get_latest_run()?;

    let stats = match storage.load(STATS_KEY)? {
        Some(json) => serde_json::from_str(&json).map_err(crate::storage::StorageError::from)?,
        None => Stats::default(),
    };

    let mut requests_by_state = Vec::new();
    for state in RequestState::all_states() {
        requests_by_state.push((state, storage.count_requests_by_state(state)?));
    }

    Ok(CrawlStatistics {
        run,
        stats,
        requests_by_state,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(statistics: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    match &statistics.run {
        Some(run) => {
            println!("Run #{} ({} mode): {}", run.id, run.mode, run.status.to_db_string());
            println!("  Started:  {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
        }
        None => println!("No crawl runs recorded"),
    }
    println!();

    let stats = &statistics.stats;
    println!("Counters:");
    println!("  Categories seen:        {}", stats.categories_seen);
    println!("  Pages fetched:          {}", stats.pages_fetched);
    println!("  Pagination enqueued:    {}", stats.pagination_links_enqueued);
    println!("  Items emitted:          {}", stats.items_emitted);
    println!("  Duplicate items:        {}", stats.items_duplicate);
    println!("  Failed requests:        {}", stats.items_failed);
    println!("  Retries:                {}", stats.requests_retried);
    println!("  Challenges solved:      {}", stats.challenges_solved);
    println!("  Challenges failed:      {}", stats.challenges_failed);
    println!("  Sessions retired:       {}", stats.sessions_retired);
    println!();

    let total: u64 = statistics.requests_by_state.iter().map(|(_, n)| n).sum();
    println!("Requests by State:");
    for (state, count) in &statistics.requests_by_state {
        let percentage = if total > 0 {
            (*count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
}
