// Status transition domain model
use super::machine::OperatingState;
use chrono::{DateTime, Utc};

/// A state change observed by a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub index: usize,
    pub from: OperatingState,
    pub to: OperatingState,
    pub observed_at: DateTime<Utc>,
    /// Dwell time in `from` when the change was observed.
    pub previous_dwell_secs: u64,
}
