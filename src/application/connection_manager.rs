// Connection manager - one lazily opened session per device address
use crate::application::device_link::{DeviceLink, DeviceSession};
use crate::application::errors::{AcquisitionError, LinkError};
use crate::domain::machine::MachineAddress;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Slot {
    address: MachineAddress,
    session: Option<Box<dyn DeviceSession>>,
    last_failure: Option<Instant>,
}

impl Slot {
    fn new(address: MachineAddress) -> Self {
        Self {
            address,
            session: None,
            last_failure: None,
        }
    }
}

/// Owns the per-address sessions. Each address has its own lock, so reads
/// against different devices can run concurrently.
pub struct ConnectionManager {
    link: Arc<dyn DeviceLink>,
    slots: RwLock<Vec<(MachineAddress, Arc<Mutex<Slot>>)>>,
    reconnect_cooldown: Duration,
}

impl ConnectionManager {
    pub fn new(link: Arc<dyn DeviceLink>, reconnect_cooldown: Duration) -> Self {
        Self {
            link,
            slots: RwLock::new(Vec::new()),
            reconnect_cooldown,
        }
    }

    /// Replace the tracked address set. Existing sessions are dropped.
    pub fn register(&self, addresses: &[MachineAddress]) {
        let slots = addresses
            .iter()
            .cloned()
            .map(|address| (address.clone(), Arc::new(Mutex::new(Slot::new(address)))))
            .collect();
        *self.slots.write() = slots;
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn address(&self, index: usize) -> Option<MachineAddress> {
        self.slots.read().get(index).map(|(address, _)| address.clone())
    }

    fn slot(&self, index: usize) -> Option<Arc<Mutex<Slot>>> {
        self.slots.read().get(index).map(|(_, slot)| slot.clone())
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        self.reconnect_cooldown
    }

    /// Ensure a live session exists for machine `index`.
    ///
    /// Returns `false` when the device could not be reached; never errors.
    /// After a failed attempt no new attempt is made until the reconnect
    /// cooldown has passed.
    pub async fn connect(&self, index: usize) -> bool {
        self.connect_after(index, self.reconnect_cooldown).await
    }

    /// Like `connect`, but waits `cooldown` after a failed attempt instead of
    /// the configured reconnect cooldown.
    pub async fn connect_after(&self, index: usize, cooldown: Duration) -> bool {
        let Some(slot) = self.slot(index) else {
            return false;
        };
        let mut slot = slot.lock().await;

        if slot.session.is_some() {
            return true;
        }

        if let Some(failed_at) = slot.last_failure {
            if failed_at.elapsed() < cooldown {
                tracing::debug!("Skipping reconnect to {}, cooling down", slot.address);
                return false;
            }
        }

        match self.link.open(&slot.address).await {
            Ok(session) => {
                tracing::info!("Connected to {}", slot.address);
                slot.session = Some(session);
                slot.last_failure = None;
                true
            }
            Err(e) => {
                tracing::warn!("Could not connect to {}: {}", slot.address, e);
                slot.last_failure = Some(Instant::now());
                false
            }
        }
    }

    /// Read holding registers over the existing session for machine `index`.
    ///
    /// A failed transaction drops the session so the next cycle reconnects.
    pub async fn read(
        &self,
        index: usize,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u16>, AcquisitionError> {
        let slot = self
            .slot(index)
            .ok_or(AcquisitionError::UnknownMachine(index))?;
        let mut slot = slot.lock().await;
        let address = slot.address.clone();

        let Some(session) = slot.session.as_mut() else {
            return Err(AcquisitionError::NotConnected { address });
        };

        let result = match session.read_holding_registers(offset, count).await {
            Ok(registers) if registers.len() == count as usize => Ok(registers),
            Ok(registers) => Err(LinkError::Malformed(format!(
                "expected {} registers, got {}",
                count,
                registers.len()
            ))),
            Err(e) => Err(e),
        };

        result.map_err(|source| {
            slot.session = None;
            AcquisitionError::Read { address, source }
        })
    }

    pub async fn is_connected(&self, index: usize) -> bool {
        match self.slot(index) {
            Some(slot) => slot.lock().await.session.is_some(),
            None => false,
        }
    }

    pub async fn disconnect(&self, index: usize) {
        if let Some(slot) = self.slot(index) {
            let mut slot = slot.lock().await;
            if slot.session.take().is_some() {
                tracing::debug!("Disconnected from {}", slot.address);
            }
        }
    }

    /// Release every session. Safe for addresses that never connected.
    pub async fn disconnect_all(&self) {
        for index in 0..self.len() {
            self.disconnect(index).await;
        }
        tracing::info!("Released all device connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulated_link::SimulatedLink;

    fn manager(link: &SimulatedLink, cooldown: Duration) -> ConnectionManager {
        let manager = ConnectionManager::new(Arc::new(link.clone()), cooldown);
        manager.register(&[
            MachineAddress::new("10.0.0.1", 502),
            MachineAddress::new("10.0.0.2", 502),
        ]);
        manager
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let link = SimulatedLink::scripted();
        let manager = manager(&link, Duration::from_secs(1));

        assert!(manager.connect(0).await);
        assert!(manager.connect(0).await);
        assert!(manager.connect(0).await);

        assert_eq!(link.open_count("10.0.0.1"), 1);
        assert!(manager.is_connected(0).await);
        assert!(!manager.is_connected(1).await);
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let link = SimulatedLink::scripted();
        let manager = manager(&link, Duration::from_secs(1));

        let result = manager.read(1, 0, 1).await;
        assert!(matches!(result, Err(AcquisitionError::NotConnected { .. })));

        let result = manager.read(5, 0, 1).await;
        assert!(matches!(result, Err(AcquisitionError::UnknownMachine(5))));
    }

    #[tokio::test]
    async fn test_failed_read_drops_session() {
        let link = SimulatedLink::scripted();
        let manager = manager(&link, Duration::from_secs(1));
        link.push_failure("10.0.0.1");

        assert!(manager.connect(0).await);
        let result = manager.read(0, 0, 1).await;
        assert!(matches!(result, Err(AcquisitionError::Read { .. })));
        assert!(!manager.is_connected(0).await);

        assert!(manager.connect(0).await);
        assert_eq!(manager.read(0, 0, 1).await.unwrap(), vec![1]);
        assert_eq!(link.open_count("10.0.0.1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_waits_for_cooldown() {
        let link = SimulatedLink::scripted();
        let manager = manager(&link, Duration::from_secs(1));
        link.set_reachable("10.0.0.2", false);

        assert!(!manager.connect(1).await);
        link.set_reachable("10.0.0.2", true);

        // still cooling down, no new attempt is made
        assert!(!manager.connect(1).await);
        assert_eq!(link.open_count("10.0.0.2"), 0);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(manager.connect(1).await);
        assert_eq!(link.open_count("10.0.0.2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_cooldown_holds_off_reconnect() {
        let link = SimulatedLink::scripted();
        let manager = manager(&link, Duration::from_secs(1));
        link.set_reachable("10.0.0.1", false);

        assert!(!manager.connect(0).await);
        link.set_reachable("10.0.0.1", true);
        tokio::time::advance(Duration::from_millis(1100)).await;

        assert!(!manager.connect_after(0, Duration::from_secs(5)).await);
        assert_eq!(link.open_count("10.0.0.1"), 0);

        assert!(manager.connect(0).await);
        assert_eq!(link.open_count("10.0.0.1"), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_with_mixed_slots() {
        let link = SimulatedLink::scripted();
        let manager = manager(&link, Duration::from_secs(1));

        assert!(manager.connect(0).await);
        manager.disconnect_all().await;
        manager.disconnect_all().await;

        assert!(!manager.is_connected(0).await);
        assert!(!manager.is_connected(1).await);

        manager.disconnect(7).await;
    }
}
