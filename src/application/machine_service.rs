// Machine service - read and refresh use cases for the presentation layer
use crate::application::errors::SchedulerError;
use crate::application::history_log::HistoryLog;
use crate::application::polling_scheduler::{CycleKind, PollingScheduler};
use crate::application::snapshot_store::SnapshotStore;
use crate::domain::history::StatusTransition;
use crate::domain::machine::{MachineSet, MachineSnapshot};
use std::sync::Arc;

#[derive(Clone)]
pub struct MachineService {
    scheduler: Arc<PollingScheduler>,
    store: Arc<SnapshotStore>,
    history: Arc<HistoryLog>,
}

impl MachineService {
    pub fn new(
        scheduler: Arc<PollingScheduler>,
        store: Arc<SnapshotStore>,
        history: Arc<HistoryLog>,
    ) -> Self {
        Self {
            scheduler,
            store,
            history,
        }
    }

    pub fn get_all_machines(&self) -> Arc<MachineSet> {
        self.store.read_all()
    }

    /// Latest snapshot of one machine. Also puts the machine on the detail-refresh cadence.
    pub fn get_machine_details(&self, index: usize) -> Option<MachineSnapshot> {
        let snapshot = self.store.read_one(index)?;
        self.scheduler.watch_details(index);
        Some(snapshot)
    }

    /// Run an extra full cycle now. Returns the published cycle number.
    pub async fn request_refresh(&self) -> Result<u64, SchedulerError> {
        self.scheduler.run_cycle(CycleKind::Manual).await
    }

    pub async fn request_detail_refresh(
        &self,
        index: usize,
    ) -> Result<MachineSnapshot, SchedulerError> {
        self.scheduler.refresh_machine(index).await?;
        self.store
            .read_one(index)
            .ok_or(SchedulerError::UnknownMachine(index))
    }

    pub fn machine_history(&self, index: usize) -> Option<Vec<StatusTransition>> {
        self.store.read_one(index)?;
        Some(self.history.recent(index))
    }
}
