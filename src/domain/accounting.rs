// Time accounting - folds a fresh status read into a machine snapshot
use super::machine::{MachineSnapshot, OperatingState};
use chrono::{DateTime, Utc};

/// Apply a successful read of `new_state` to `previous`.
///
/// `elapsed_secs` is credited to `new_state` only. A state change resets the
/// dwell time to `elapsed_secs`: the tick that observed the transition already
/// counts toward the new state.
pub fn advance(
    previous: &MachineSnapshot,
    new_state: OperatingState,
    elapsed_secs: u64,
    read_at: DateTime<Utc>,
) -> MachineSnapshot {
    let mut durations = previous.durations;
    durations.add(new_state, elapsed_secs);

    let dwell_secs = if new_state == previous.state {
        previous.dwell_secs.saturating_add(elapsed_secs)
    } else {
        elapsed_secs
    };

    MachineSnapshot {
        index: previous.index,
        address: previous.address.clone(),
        state: new_state,
        dwell_secs,
        durations,
        last_read: Some(read_at),
        connected: true,
    }
}
