// Modbus TCP implementation of DeviceLink
use crate::application::device_link::{DeviceLink, DeviceSession};
use crate::application::errors::LinkError;
use crate::domain::machine::MachineAddress;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

#[derive(Debug, Clone)]
pub struct ModbusTcpLink {
    unit_id: u8,
    io_timeout: Duration,
}

impl ModbusTcpLink {
    pub fn new(unit_id: u8, io_timeout: Duration) -> Self {
        Self {
            unit_id,
            io_timeout,
        }
    }

    async fn resolve(&self, address: &MachineAddress) -> Result<SocketAddr, LinkError> {
        let mut addrs = timeout(
            self.io_timeout,
            tokio::net::lookup_host((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| LinkError::Timeout(self.io_timeout))??;

        addrs
            .next()
            .ok_or_else(|| LinkError::Refused(format!("{} did not resolve", address)))
    }
}

#[async_trait]
impl DeviceLink for ModbusTcpLink {
    async fn open(&self, address: &MachineAddress) -> Result<Box<dyn DeviceSession>, LinkError> {
        let socket_addr = self.resolve(address).await?;
        tracing::debug!("Connecting to Modbus TCP device at {}", socket_addr);

        let ctx = timeout(
            self.io_timeout,
            tcp::connect_slave(socket_addr, Slave(self.unit_id)),
        )
        .await
        .map_err(|_| LinkError::Timeout(self.io_timeout))??;

        Ok(Box::new(ModbusTcpSession {
            ctx,
            io_timeout: self.io_timeout,
        }))
    }
}

struct ModbusTcpSession {
    ctx: Context,
    io_timeout: Duration,
}

#[async_trait]
impl DeviceSession for ModbusTcpSession {
    async fn read_holding_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u16>, LinkError> {
        let registers = timeout(self.io_timeout, self.ctx.read_holding_registers(offset, count))
            .await
            .map_err(|_| LinkError::Timeout(self.io_timeout))??;

        if registers.len() != count as usize {
            return Err(LinkError::Malformed(format!(
                "expected {} registers, got {}",
                count,
                registers.len()
            )));
        }

        Ok(registers)
    }
}
