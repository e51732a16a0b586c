//! Durable, deduplicating request queue
//!
//! This module handles:
//! - Two priority levels, FIFO within each, front drained first
//! - Request dedup through the shared [`Deduplicator`]
//! - Write-through of every state change to the `requests` table
//! - In-flight accounting and quiescence detection
//! - Replaying pending rows when a run is resumed

use crate::crawler::dedup::Deduplicator;
use crate::crawler::lock;
use crate::crawler::request::{Priority, Request};
use crate::state::RequestState;
use crate::storage::{SqliteStorage, Storage, StorageResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The dedup key was seen earlier in this run; nothing was added
    AlreadyQueued,
}

/// How a dequeued request left the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    Failed(String),
    /// Put back at the request's own priority with `retry_count + 1`
    Retry,
}

#[derive(Default)]
struct QueueInner {
    front: VecDeque<Request>,
    normal: VecDeque<Request>,
    in_flight: usize,
}

impl QueueInner {
    fn push(&mut self, request: Request) {
        match request.priority {
            Priority::Front => self.front.push_back(request),
            Priority::Normal => self.normal.push_back(request),
        }
    }

    fn pop(&mut self) -> Option<Request> {
        match self.front.pop_front() {
            Some(request) => Some(request),
            None => self.normal.pop_front(),
        }
    }

    fn len(&self) -> usize {
        self.front.len() + self.normal.len()
    }
}

pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    dedup: Arc<Deduplicator>,
    storage: Arc<Mutex<SqliteStorage>>,
}

impl RequestQueue {
    /// Creates an empty queue writing through to `storage`
    pub fn new(storage: Arc<Mutex<SqliteStorage>>, dedup: Arc<Deduplicator>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            dedup,
            storage,
        }
    }

    /// Rebuilds the queue of an interrupted run
    ///
    /// Every stored key seeds the dedup set; every pending row (queued or left
    /// in flight by the previous process) is queued again, front rows first.
    pub fn resume(
        storage: Arc<Mutex<SqliteStorage>>,
        dedup: Arc<Deduplicator>,
    ) -> StorageResult<Self> {
        let (keys, pending) = {
            let storage = lock(&storage);
            (storage.load_request_keys()?, storage.load_pending_requests()?)
        };

        dedup.seed_requests(keys);

        let queue = Self::new(storage, dedup);
        {
            let mut inner = lock(&queue.inner);
            for request in pending {
                inner.push(request);
            }
        }

        tracing::info!("Restored {} pending requests", queue.size());
        Ok(queue)
    }

    /// Adds a request unless its dedup key was already seen
    pub fn enqueue(&self, request: Request) -> EnqueueOutcome {
        if !self.dedup.check_and_mark_request(&request.dedup_key) {
            tracing::debug!("Already queued: {}", request.dedup_key);
            return EnqueueOutcome::AlreadyQueued;
        }

        if let Err(e) = lock(&self.storage).insert_request(&request) {
            tracing::error!("Failed to persist request {}: {}", request.dedup_key, e);
        }

        lock(&self.inner).push(request);
        self.notify.notify_waiters();
        EnqueueOutcome::Enqueued
    }

    /// Takes the next request, waiting while the queue is empty but work is in flight
    ///
    /// Returns `None` once the crawl is quiescent (empty queue, nothing in
    /// flight) or the token is cancelled.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<Request> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = lock(&self.inner);
                if let Some(request) = inner.pop() {
                    inner.in_flight += 1;
                    drop(inner);
                    self.persist_state(&request, RequestState::InFlight, None);
                    return Some(request);
                }
                if inner.in_flight == 0 {
                    return None;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Settles a dequeued request
    pub fn finish(&self, mut request: Request, disposition: Disposition) {
        match disposition {
            Disposition::Handled => {
                self.persist_state(&request, RequestState::Handled, None);
                self.settle(None);
            }
            Disposition::Failed(reason) => {
                self.persist_state(&request, RequestState::Failed, Some(&reason));
                self.settle(None);
            }
            Disposition::Retry => {
                request.retry_count += 1;
                self.persist_state(&request, RequestState::Queued, None);
                self.settle(Some(request));
            }
        }
    }

    /// Number of queued (not in-flight) requests
    pub fn size(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inner).in_flight
    }

    /// Returns true when nothing is queued and nothing is in flight
    pub fn is_quiescent(&self) -> bool {
        let inner = lock(&self.inner);
        inner.len() == 0 && inner.in_flight == 0
    }

    fn settle(&self, requeue: Option<Request>) {
        {
            let mut inner = lock(&self.inner);
            if let Some(request) = requeue {
                inner.push(request);
            }
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    fn persist_state(&self, request: &Request, state: RequestState, error: Option<&str>) {
        if let Err(e) = lock(&self.storage).update_request_state(
            &request.dedup_key,
            state,
            request.retry_count,
            error,
        ) {
            tracing::error!(
                "Failed to record {} for {}: {}",
                state,
                request.dedup_key,
                e
            );
        }
    }
}
