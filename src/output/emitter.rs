//! Record deduplication in front of the sink

use super::stats::{StatsEvent, StatsHandle};
use super::traits::{OutputResult, OutputSink};
use crate::crawler::{Deduplicator, Record};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Emitted,
    Duplicate,
}

/// Emits each `item_id` at most once and counts duplicates
#[derive(Clone)]
pub struct RecordEmitter {
    dedup: Arc<Deduplicator>,
    sink: Arc<dyn OutputSink>,
    stats: StatsHandle,
}

impl RecordEmitter {
    pub fn new(dedup: Arc<Deduplicator>, sink: Arc<dyn OutputSink>, stats: StatsHandle) -> Self {
        Self { dedup, sink, stats }
    }

    pub fn emit(&self, record: &Record) -> OutputResult<EmitOutcome> {
        if !self.dedup.check_and_mark_record(&record.item_id) {
            self.stats.record(StatsEvent::ItemDuplicate);
            return Ok(EmitOutcome::Duplicate);
        }

        if let Err(e) = self.sink.emit(record) {
            // Unmark so a later page may still deliver the item
            self.dedup.unmark_record(&record.item_id);
            return Err(e);
        }

        self.stats.record(StatsEvent::ItemEmitted);
        Ok(EmitOutcome::Emitted)
    }

    pub fn flush(&self) -> OutputResult<()> {
        self.sink.flush()
    }
}
