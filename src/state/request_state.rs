/// Lifecycle states of a queued request
///
/// This is what the durable queue records for each request row; resuming a run
/// replays every row that is not yet terminal.
use std::fmt;

/// Represents the current state of a request in the crawl queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    // ===== Active States =====
    /// Waiting in the queue
    Queued,

    /// Dequeued by a worker and not yet finished
    InFlight,

    // ===== Terminal States =====
    /// Fetched and extracted successfully
    Handled,

    /// Dropped: retries exhausted or a fatal failure
    Failed,
}

impl RequestState {
    /// Returns true if this request needs no further processing
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Handled | Self::Failed)
    }

    /// Returns true if a resumed run should pick this request up again
    ///
    /// In-flight rows belong to workers of a crashed or interrupted process.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::InFlight)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Handled => "handled",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "in_flight" => Some(Self::InFlight),
            "handled" => Some(Self::Handled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all request states
    pub fn all_states() -> [Self; 4] {
        [Self::Queued, Self::InFlight, Self::Handled, Self::Failed]
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_pending_are_disjoint() {
        for state in RequestState::all_states() {
            assert_ne!(state.is_terminal(), state.is_pending(), "{}", state);
        }
    }

    #[test]
    fn test_db_string_parsing() {
        assert_eq!(
            RequestState::from_db_string("in_flight"),
            Some(RequestState::InFlight)
        );
        assert_eq!(RequestState::from_db_string("processed"), None);
    }

    #[test]
    fn test_db_strings_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for state in RequestState::all_states() {
            assert!(seen.insert(state.to_db_string()));
        }
    }
}
