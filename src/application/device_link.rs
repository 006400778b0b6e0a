// Device link traits - the field-bus boundary
use crate::application::errors::LinkError;
use crate::domain::machine::MachineAddress;
use async_trait::async_trait;

/// Opens sessions to devices. Implemented by the Modbus TCP client and by the
/// in-memory simulator, selected by configuration.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Establish a session with the device at `address`
    async fn open(&self, address: &MachineAddress) -> Result<Box<dyn DeviceSession>, LinkError>;
}

/// A live connection to one device.
#[async_trait]
pub trait DeviceSession: Send {
    /// Read `count` holding registers starting at `offset`
    async fn read_holding_registers(&mut self, offset: u16, count: u16)
    -> Result<Vec<u16>, LinkError>;
}
