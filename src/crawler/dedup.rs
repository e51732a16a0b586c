//! Seen-sets for request keys and record ids
//!
//! The two namespaces are independent: a request key never collides with an
//! item id. `DashSet::insert` is the atomic check-and-set, so two workers racing
//! on the same key see exactly one winner.

use dashmap::DashSet;

#[derive(Debug, Default)]
pub struct Deduplicator {
    requests: DashSet<String>,
    records: DashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a request key as seen; returns true if it was not seen before
    pub fn check_and_mark_request(&self, dedup_key: &str) -> bool {
        self.requests.insert(dedup_key.to_string())
    }

    /// Marks an item id as emitted; returns true if it was not emitted before
    pub fn check_and_mark_record(&self, item_id: &str) -> bool {
        self.records.insert(item_id.to_string())
    }

    /// Forgets an item id whose record never reached the output
    pub fn unmark_record(&self, item_id: &str) {
        self.records.remove(item_id);
    }

    pub fn seed_requests<I: IntoIterator<Item = String>>(&self, keys: I) {
        for key in keys {
            self.requests.insert(key);
        }
    }

    pub fn seed_records<I: IntoIterator<Item = String>>(&self, ids: I) {
        for id in ids {
            self.records.insert(id);
        }
    }

    /// Snapshot of emitted item ids, sorted for stable checkpoints
    pub fn handled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|id| id.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_namespaces_are_independent() {
        let dedup = Deduplicator::new();
        assert!(dedup.check_and_mark_request("42"));
        assert!(dedup.check_and_mark_record("42"));
        assert!(!dedup.check_and_mark_request("42"));
        assert!(!dedup.check_and_mark_record("42"));
    }

    #[test]
    fn test_seeded_keys_count_as_seen() {
        let dedup = Deduplicator::new();
        dedup.seed_records(vec!["b".to_string(), "a".to_string()]);
        assert!(!dedup.check_and_mark_record("a"));
        assert_eq!(dedup.handled_ids(), vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_have_one_winner() {
        let dedup = Arc::new(Deduplicator::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let dedup = Arc::clone(&dedup);
            let winners = Arc::clone(&winners);
            handles.push(tokio::spawn(async move {
                if dedup.check_and_mark_request("https://shop.cz/tv") {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.request_count(), 1);
    }
}
