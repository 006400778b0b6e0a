// Shared fixtures for tests that drive the scheduler against simulated devices
use crate::application::connection_manager::ConnectionManager;
use crate::application::history_log::HistoryLog;
use crate::application::polling_scheduler::PollingScheduler;
use crate::application::snapshot_store::SnapshotStore;
use crate::infrastructure::config::{DeviceConfig, PollingConfig};
use crate::infrastructure::simulated_link::SimulatedLink;
use std::sync::Arc;

pub(crate) struct Harness {
    pub link: SimulatedLink,
    pub devices: DeviceConfig,
    pub polling: PollingConfig,
    pub connections: Arc<ConnectionManager>,
    pub store: Arc<SnapshotStore>,
    pub history: Arc<HistoryLog>,
    pub scheduler: Arc<PollingScheduler>,
}

impl Harness {
    /// A fresh, idle scheduler over the same link and store, using the current configs.
    pub fn rebuild(&self) -> Arc<PollingScheduler> {
        Arc::new(PollingScheduler::new(
            self.devices.clone(),
            self.polling.clone(),
            self.connections.clone(),
            self.store.clone(),
            self.history.clone(),
        ))
    }
}

/// Host of machine `index` in the test device range.
pub(crate) fn host(index: usize) -> String {
    format!("10.0.0.{}", index + 1)
}

pub(crate) fn harness(link: SimulatedLink, count: u16) -> Harness {
    let devices = DeviceConfig {
        prefix: "10.0.0.".to_string(),
        range_start: 1,
        range_end: count,
        ..Default::default()
    };
    let polling = PollingConfig::default();
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(link.clone()),
        polling.reconnect_cooldown(),
    ));
    let store = Arc::new(SnapshotStore::default());
    let history = Arc::new(HistoryLog::new(polling.history_limit));
    let scheduler = Arc::new(PollingScheduler::new(
        devices.clone(),
        polling.clone(),
        connections.clone(),
        store.clone(),
        history.clone(),
    ));

    Harness {
        link,
        devices,
        polling,
        connections,
        store,
        history,
        scheduler,
    }
}

pub(crate) async fn running_with(link: SimulatedLink, count: u16) -> Harness {
    let h = harness(link, count);
    h.scheduler.initialize().await.unwrap();
    h
}

/// Initialized scheduler over `count` scripted devices reporting `Operational`.
pub(crate) async fn running(count: u16) -> Harness {
    running_with(SimulatedLink::scripted(), count).await
}
