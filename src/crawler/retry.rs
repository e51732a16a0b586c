//! Failure classification and retry decisions

use crate::config::{BackoffKind, CrawlerConfig};
use crate::crawler::session::SessionOutcome;
use std::fmt;
use std::time::Duration;

/// Why a request attempt did not produce an accepted page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Connection, timeout or body read failure
    NetworkTransient(String),
    /// 401/403/429 without challenge markers
    ServerBlocked(u16),
    /// Any other non-success status
    HttpStatus(u16),
    /// A detected challenge could not be resolved
    ChallengeSolveFailed(String),
    /// The page was fetched but its content could not be extracted
    ExtractionMalformed(String),
}

impl Failure {
    /// Maps a non-success status with no challenge to a failure
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 | 429 => Failure::ServerBlocked(status),
            _ => Failure::HttpStatus(status),
        }
    }

    /// How the session that served the attempt should be credited
    pub fn session_outcome(&self) -> SessionOutcome {
        match self {
            Failure::NetworkTransient(_) => SessionOutcome::Failure,
            Failure::ServerBlocked(_) | Failure::ChallengeSolveFailed(_) => SessionOutcome::Banned,
            Failure::HttpStatus(status) if *status >= 500 || *status == 408 => {
                SessionOutcome::Failure
            }
            Failure::HttpStatus(_) | Failure::ExtractionMalformed(_) => {
                SessionOutcome::Success
            }
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::NetworkTransient(e) => write!(f, "network error: {}", e),
            Failure::ServerBlocked(status) => write!(f, "blocked (HTTP {})", status),
            Failure::HttpStatus(status) => write!(f, "HTTP {}", status),
            Failure::ChallengeSolveFailed(e) => write!(f, "challenge failed: {}", e),
            Failure::ExtractionMalformed(e) => write!(f, "malformed page: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Try again, possibly on the same session
    Retryable,
    /// Retire the session, then try again on another
    SessionBad,
    /// Drop the request
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        retire_session: bool,
    },
    Drop {
        reason: String,
        /// True when the request was retryable but out of attempts
        exhausted: bool,
        retire_session: bool,
    },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: BackoffKind,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffKind, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.max_request_retries,
            config.retry_backoff,
            Duration::from_millis(config.retry_delay_ms),
            Duration::from_millis(config.max_retry_delay_ms),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn classify(failure: &Failure) -> FailureClass {
        match failure {
            Failure::NetworkTransient(_) => FailureClass::Retryable,
            Failure::HttpStatus(status) if *status >= 500 || *status == 408 => {
                FailureClass::Retryable
            }
            Failure::ServerBlocked(_) | Failure::ChallengeSolveFailed(_) => {
                FailureClass::SessionBad
            }
            Failure::HttpStatus(_) | Failure::ExtractionMalformed(_) => FailureClass::Fatal,
        }
    }

    /// Decides what happens to a request whose attempt number `retry_count` failed
    pub fn decide(&self, failure: &Failure, retry_count: u32) -> RetryDecision {
        let class = Self::classify(failure);
        let retire_session = class == FailureClass::SessionBad;

        if class == FailureClass::Fatal {
            return RetryDecision::Drop {
                reason: failure.to_string(),
                exhausted: false,
                retire_session,
            };
        }

        if retry_count >= self.max_retries {
            return RetryDecision::Drop {
                reason: format!("{} (retries exhausted after {})", failure, retry_count),
                exhausted: true,
                retire_session,
            };
        }

        RetryDecision::Retry {
            delay: self.backoff_delay(retry_count),
            retire_session,
        }
    }

    /// Delay before retry number `retry_count + 1`
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(retry_count.min(31));
                self.base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }
}
