// Status reader - one register read per machine, coerced into OperatingState
use crate::application::connection_manager::ConnectionManager;
use crate::application::errors::AcquisitionError;
use crate::domain::machine::OperatingState;
use std::sync::Arc;
use std::time::Duration;

/// Number of registers holding the status value.
const STATUS_REGISTER_COUNT: u16 = 1;

#[derive(Clone)]
pub struct StatusReader {
    connections: Arc<ConnectionManager>,
    register_offset: u16,
}

impl StatusReader {
    pub fn new(connections: Arc<ConnectionManager>, register_offset: u16) -> Self {
        Self {
            connections,
            register_offset,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Read the current operating state of machine `index`, connecting first if needed.
    pub async fn read_status(&self, index: usize) -> Result<OperatingState, AcquisitionError> {
        self.read_status_after(index, self.connections.reconnect_cooldown())
            .await
    }

    /// Like `read_status`, but a device that failed to connect within the last
    /// `cooldown` is skipped without a new attempt.
    pub async fn read_status_after(
        &self,
        index: usize,
        cooldown: Duration,
    ) -> Result<OperatingState, AcquisitionError> {
        if !self.connections.connect_after(index, cooldown).await {
            return Err(self.connect_failure(index));
        }

        let registers = self
            .connections
            .read(index, self.register_offset, STATUS_REGISTER_COUNT)
            .await?;

        // read() guarantees exactly STATUS_REGISTER_COUNT values
        let raw = registers[0];
        tracing::debug!("Machine {} status register = {}", index, raw);
        Ok(coerce_status(index, raw))
    }

    fn connect_failure(&self, index: usize) -> AcquisitionError {
        match self.connections.address(index) {
            Some(address) => AcquisitionError::Connect { address },
            None => AcquisitionError::UnknownMachine(index),
        }
    }
}

/// Map a raw register value to a state, falling back to `Operational` for
/// anything outside the known domain.
pub fn coerce_status(index: usize, raw: u16) -> OperatingState {
    OperatingState::from_raw(raw).unwrap_or_else(|| {
        tracing::warn!(
            "Machine {} reported invalid status value {}, treating as operational",
            index,
            raw
        );
        OperatingState::Operational
    })
}
