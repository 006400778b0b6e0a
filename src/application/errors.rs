// Error types for device acquisition and the polling scheduler
use crate::application::polling_scheduler::SchedulerPhase;
use crate::domain::machine::MachineAddress;
use crate::infrastructure::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failure reported by a `DeviceLink`.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("device refused connection: {0}")]
    Refused(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Device unreachable or handshake failed; retried next cycle.
    #[error("could not connect to {address}")]
    Connect { address: MachineAddress },

    /// Transaction issued but no valid response came back.
    #[error("read from {address} failed: {source}")]
    Read {
        address: MachineAddress,
        #[source]
        source: LinkError,
    },

    #[error("{address} is not connected")]
    NotConnected { address: MachineAddress },

    #[error("no machine at index {0}")]
    UnknownMachine(usize),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("scheduler is {0:?}, not running")]
    NotRunning(SchedulerPhase),

    #[error("scheduler already started ({0:?})")]
    AlreadyStarted(SchedulerPhase),

    #[error("no machine at index {0}")]
    UnknownMachine(usize),
}
