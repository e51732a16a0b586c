//! Session pool
//!
//! This module handles:
//! - A fixed-capacity arena of sessions, addressed by slot + id leases
//! - Handing each session to at most one request at a time
//! - Preferring the session that last served the same crawl target
//! - Cookie persistence per session
//! - Retiring sessions after repeated errors, bans or a request quota

use crate::config::SessionConfig;
use crate::crawler::fingerprint::{Fingerprint, FingerprintGenerator};
use crate::crawler::lock;
use crate::crawler::proxy::{ProxyEndpoint, ProxyError, ProxyProvider, DIRECT_POOL};
use reqwest::cookie::Jar;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// What a fetcher needs to act as a session
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: u64,
    pub fingerprint: Fingerprint,
    pub proxy: ProxyEndpoint,
    /// Cookie store shared by every client acting as this session
    pub cookies: Arc<Jar>,
}

/// Exclusive handle on a pooled session
///
/// Not `Clone`: giving it back through [`SessionPool::release`] or
/// [`SessionPool::retire`] consumes it.
#[derive(Debug)]
pub struct SessionLease {
    slot: usize,
    id: u64,
    pub identity: SessionIdentity,
}

impl SessionLease {
    pub fn session_id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Retired,
}

/// Result of the request a session served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Response accepted
    Success,
    /// Network failure or a block-like response
    Failure,
    /// The session is known to be burnt
    Banned,
}

#[derive(Debug)]
struct Session {
    id: u64,
    cookie_jar: Arc<Jar>,
    fingerprint: Fingerprint,
    bound_proxy: ProxyEndpoint,
    requests_served: u32,
    consecutive_errors: u32,
    last_target: Option<String>,
    leased: bool,
}

impl Session {
    fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            session_id: self.id,
            fingerprint: self.fingerprint.clone(),
            proxy: self.bound_proxy.clone(),
            cookies: Arc::clone(&self.cookie_jar),
        }
    }
}

pub struct SessionPool {
    slots: Mutex<Vec<Option<Session>>>,
    notify: Notify,
    provider: Arc<dyn ProxyProvider>,
    fingerprints: FingerprintGenerator,
    pool_names: Vec<String>,
    config: SessionConfig,
    next_id: AtomicU64,
    pool_cursor: AtomicUsize,
    retired: AtomicU64,
}

impl SessionPool {
    /// Creates an empty pool
    ///
    /// # Arguments
    ///
    /// * `config` - Pool capacity and retirement thresholds
    /// * `provider` - Source of proxies for new sessions
    /// * `pool_names` - Proxy pools to rotate through; empty means direct
    /// * `fingerprints` - Generator for new session identities
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn ProxyProvider>,
        pool_names: Vec<String>,
        fingerprints: FingerprintGenerator,
    ) -> Self {
        let capacity = config.max_pool_size.max(1);
        Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            notify: Notify::new(),
            provider,
            fingerprints,
            pool_names,
            config,
            next_id: AtomicU64::new(1),
            pool_cursor: AtomicUsize::new(0),
            retired: AtomicU64::new(0),
        }
    }

    /// Leases a session for a request against `affinity` (the crawl target)
    ///
    /// Selection order: an idle session that last served the same target, any
    /// idle session, a new session while under capacity. Otherwise waits for a
    /// release or retirement.
    pub async fn acquire(&self, affinity: Option<&str>) -> Result<SessionLease, ProxyError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_acquire(affinity)? {
                return Ok(lease);
            }

            notified.await;
        }
    }

    fn try_acquire(&self, affinity: Option<&str>) -> Result<Option<SessionLease>, ProxyError> {
        let mut slots = lock(&self.slots);

        let idle = |s: &Option<Session>| matches!(s, Some(session) if !session.leased);

        let matching = affinity.and_then(|target| {
            slots.iter().position(|s| {
                idle(s)
                    && s.as_ref()
                        .and_then(|session| session.last_target.as_deref())
                        == Some(target)
            })
        });

        let slot = match matching.or_else(|| slots.iter().position(idle)) {
            Some(slot) => slot,
            None => match slots.iter().position(Option::is_none) {
                Some(slot) => {
                    slots[slot] = Some(self.create_session()?);
                    slot
                }
                None => return Ok(None),
            },
        };

        let Some(session) = slots[slot].as_mut() else {
            return Ok(None);
        };
        session.leased = true;
        session.last_target = affinity.map(str::to_string);

        Ok(Some(SessionLease {
            slot,
            id: session.id,
            identity: session.identity(),
        }))
    }

    fn create_session(&self) -> Result<Session, ProxyError> {
        let pool_name = if self.pool_names.is_empty() {
            DIRECT_POOL
        } else {
            let index = self.pool_cursor.fetch_add(1, Ordering::Relaxed) % self.pool_names.len();
            self.pool_names[index].as_str()
        };

        let bound_proxy = self.provider.next(pool_name)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fingerprint = self.fingerprints.generate();

        tracing::debug!(
            "Created session {} ({}, proxy pool {})",
            id,
            fingerprint.os,
            bound_proxy.pool
        );

        Ok(Session {
            id,
            cookie_jar: Arc::new(Jar::default()),
            fingerprint,
            bound_proxy,
            requests_served: 0,
            consecutive_errors: 0,
            last_target: None,
            leased: false,
        })
    }

    /// Returns a leased session, recording how its request went
    pub fn release(&self, lease: SessionLease, outcome: SessionOutcome) -> SessionState {
        let state = {
            let mut slots = lock(&self.slots);
            let Some(session) = slots
                .get_mut(lease.slot)
                .and_then(Option::as_mut)
                .filter(|session| session.id == lease.id)
            else {
                return SessionState::Retired;
            };

            session.requests_served += 1;
            let banned = match outcome {
                SessionOutcome::Success => {
                    session.consecutive_errors = 0;
                    false
                }
                SessionOutcome::Failure => {
                    session.consecutive_errors += 1;
                    false
                }
                SessionOutcome::Banned => true,
            };

            let quota_reached = self.config.max_requests_per_session > 0
                && session.requests_served >= self.config.max_requests_per_session;

            if banned || session.consecutive_errors > self.config.max_consecutive_errors {
                tracing::warn!(
                    "Retiring session {} after {} consecutive errors{}",
                    session.id,
                    session.consecutive_errors,
                    if banned { " (banned)" } else { "" }
                );
                slots[lease.slot] = None;
                SessionState::Retired
            } else if quota_reached {
                tracing::debug!(
                    "Rotating session {} after {} requests",
                    session.id,
                    session.requests_served
                );
                slots[lease.slot] = None;
                SessionState::Retired
            } else {
                session.leased = false;
                SessionState::Active
            }
        };

        if state == SessionState::Retired {
            self.retired.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_waiters();
        state
    }

    /// Removes a leased session from the pool for good
    pub fn retire(&self, lease: SessionLease) {
        self.release(lease, SessionOutcome::Banned);
    }

    /// Sessions currently alive (leased or idle)
    pub fn active_count(&self) -> usize {
        lock(&self.slots).iter().filter(|s| s.is_some()).count()
    }

    pub fn idle_count(&self) -> usize {
        lock(&self.slots)
            .iter()
            .filter(|s| matches!(s, Some(session) if !session.leased))
            .count()
    }

    pub fn retired_count(&self) -> u64 {
        self.retired.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        lock(&self.slots).len()
    }
}
