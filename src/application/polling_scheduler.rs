// Polling scheduler - runs poll cycles and publishes machine sets
use crate::application::connection_manager::ConnectionManager;
use crate::application::errors::SchedulerError;
use crate::application::history_log::HistoryLog;
use crate::application::snapshot_store::SnapshotStore;
use crate::application::status_reader::StatusReader;
use crate::domain::accounting::advance;
use crate::domain::addressing::enumerate_addresses;
use crate::domain::history::StatusTransition;
use crate::domain::machine::MachineSet;
use crate::infrastructure::config::{DeviceConfig, PollingConfig};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Initializing,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Timer-driven cycle, credits one poll interval.
    Scheduled,
    /// Operator-requested cycle over every machine, credits no time.
    Manual,
    /// Out-of-band refresh of selected machines, credits no time.
    Detail,
}

/// Owns the authoritative `MachineSet` and is the only writer to the store.
pub struct PollingScheduler {
    devices: DeviceConfig,
    polling: PollingConfig,
    reader: StatusReader,
    store: Arc<SnapshotStore>,
    history: Arc<HistoryLog>,
    // Held for the whole cycle, so cycles never overlap
    machines: Mutex<MachineSet>,
    phase: watch::Sender<SchedulerPhase>,
    watched: parking_lot::Mutex<HashMap<usize, Instant>>,
}

impl PollingScheduler {
    pub fn new(
        devices: DeviceConfig,
        polling: PollingConfig,
        connections: Arc<ConnectionManager>,
        store: Arc<SnapshotStore>,
        history: Arc<HistoryLog>,
    ) -> Self {
        let reader = StatusReader::new(connections, devices.register_offset);
        let (phase, _) = watch::channel(SchedulerPhase::Idle);
        Self {
            devices,
            polling,
            reader,
            store,
            history,
            machines: Mutex::new(MachineSet::default()),
            phase,
            watched: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::info!("Scheduler {:?} -> {:?}", previous, phase);
        }
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        match self.phase() {
            SchedulerPhase::Running => Ok(()),
            phase => Err(SchedulerError::NotRunning(phase)),
        }
    }

    /// Enumerate the configured devices, seed a zeroed machine set and enter `Running`.
    ///
    /// Invalid configuration leaves the scheduler `Idle`.
    pub async fn initialize(&self) -> Result<(), SchedulerError> {
        if self.phase() != SchedulerPhase::Idle {
            return Err(SchedulerError::AlreadyStarted(self.phase()));
        }
        self.set_phase(SchedulerPhase::Initializing);

        if let Err(e) = self.devices.validate().and_then(|_| self.polling.validate()) {
            tracing::error!("Refusing to start polling: {}", e);
            self.set_phase(SchedulerPhase::Idle);
            return Err(e.into());
        }

        let addresses = enumerate_addresses(
            &self.devices.prefix,
            self.devices.range_start,
            self.devices.range_end,
            self.devices.port,
        );
        self.reader.connections().register(&addresses);

        let seeded = MachineSet::seed(addresses);
        tracing::info!(
            "Tracking {} machines ({}{}..={}{})",
            seeded.len(),
            self.devices.prefix,
            self.devices.range_start,
            self.devices.prefix,
            self.devices.range_end
        );

        *self.machines.lock().await = seeded.clone();
        self.store.publish(seeded);
        self.set_phase(SchedulerPhase::Running);
        Ok(())
    }

    /// Read every machine once and publish the result.
    pub async fn run_cycle(&self, kind: CycleKind) -> Result<u64, SchedulerError> {
        self.run_cycle_for(kind, None).await
    }

    /// Out-of-band refresh of a single machine.
    pub async fn refresh_machine(&self, index: usize) -> Result<u64, SchedulerError> {
        self.run_cycle_for(CycleKind::Detail, Some(&[index])).await
    }

    async fn run_cycle_for(
        &self,
        kind: CycleKind,
        targets: Option<&[usize]>,
    ) -> Result<u64, SchedulerError> {
        self.ensure_running()?;
        let mut machines = self.machines.lock().await;
        // a stop may have arrived while another cycle held the lock
        self.ensure_running()?;

        let selected: Vec<usize> = match targets {
            Some(targets) => {
                if let Some(&bad) = targets.iter().find(|&&i| i >= machines.len()) {
                    return Err(SchedulerError::UnknownMachine(bad));
                }
                targets.to_vec()
            }
            None => (0..machines.len()).collect(),
        };

        let elapsed_secs = match kind {
            CycleKind::Scheduled => self.polling.poll_interval_secs,
            CycleKind::Manual | CycleKind::Detail => 0,
        };
        // out-of-band cycles never retry a failed device faster than the poll cadence
        let out_of_band_cooldown = match kind {
            CycleKind::Scheduled => None,
            CycleKind::Manual | CycleKind::Detail => Some(self.polling.poll_interval()),
        };

        let results: Vec<_> = stream::iter(selected.iter().copied())
            .map(|index| async move {
                let status = match out_of_band_cooldown {
                    Some(cooldown) => self.reader.read_status_after(index, cooldown).await,
                    None => self.reader.read_status(index).await,
                };
                (index, status)
            })
            .buffer_unordered(self.polling.max_concurrent_reads)
            .collect()
            .await;

        let read_at = Utc::now();
        let mut next = MachineSet {
            cycle: machines.cycle + 1,
            machines: machines.machines.clone(),
        };
        let mut transitions = Vec::new();
        let mut reachable = 0;

        for (index, result) in results {
            let previous = &machines.machines[index];
            next.machines[index] = match result {
                Ok(state) => {
                    reachable += 1;
                    // the seeded state was never observed, so the first read is not a transition
                    if state != previous.state && previous.last_read.is_some() {
                        transitions.push(StatusTransition {
                            index,
                            from: previous.state,
                            to: state,
                            observed_at: read_at,
                            previous_dwell_secs: previous.dwell_secs,
                        });
                    }
                    advance(previous, state, elapsed_secs, read_at)
                }
                Err(e) => {
                    tracing::warn!("Machine {} kept stale in cycle {}: {}", index, next.cycle, e);
                    previous.stale()
                }
            };
        }

        let cycle = next.cycle;
        *machines = next.clone();
        for transition in transitions {
            self.history.record(transition);
        }
        self.store.publish(next);
        drop(machines);

        tracing::debug!(
            "{:?} cycle {} done, {}/{} machines reachable",
            kind,
            cycle,
            reachable,
            selected.len()
        );
        Ok(cycle)
    }

    /// Keep machine `index` on the detail-refresh cadence for two detail intervals.
    pub fn watch_details(&self, index: usize) {
        let until = Instant::now() + self.polling.detail_interval() * 2;
        self.watched.lock().insert(index, until);
    }

    fn watched_machines(&self) -> Vec<usize> {
        let now = Instant::now();
        let mut watched = self.watched.lock();
        watched.retain(|_, until| *until > now);
        let mut indices: Vec<usize> = watched.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Refresh the machines currently shown in a detail view. `None` when nobody is watching.
    pub async fn refresh_watched(&self) -> Result<Option<u64>, SchedulerError> {
        let targets = self.watched_machines();
        if targets.is_empty() {
            return Ok(None);
        }
        self.run_cycle_for(CycleKind::Detail, Some(&targets))
            .await
            .map(Some)
    }

    /// Release every device connection and enter `Stopped`.
    pub async fn shutdown(&self) {
        self.reader.connections().disconnect_all().await;
        self.set_phase(SchedulerPhase::Stopped);
    }

    /// Spawn the timer loop: poll cycles on the poll interval, detail refreshes
    /// on the independent detail interval.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let poll_every = self.polling.poll_interval();
        let detail_every = self.polling.detail_interval();

        let task = tokio::spawn(async move {
            let mut poll_timer = interval_at(Instant::now() + poll_every, poll_every);
            poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut detail_timer = interval_at(Instant::now() + detail_every, detail_every);
            detail_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = poll_timer.tick() => {
                        let result = scheduler.run_cycle(CycleKind::Scheduled).await;
                        log_skipped("Scheduled poll cycle", result);
                    }
                    _ = detail_timer.tick() => {
                        let result = scheduler.refresh_watched().await;
                        log_skipped("Detail refresh", result);
                    }
                }
            }
            tracing::debug!("Polling loop exited");
        });

        SchedulerHandle {
            scheduler: Arc::clone(self),
            stop_tx,
            task,
        }
    }
}

fn log_skipped<T>(what: &str, result: Result<T, SchedulerError>) {
    let Err(e) = result else {
        return;
    };
    if stopping(&e) {
        tracing::debug!("{} skipped: {}", what, e);
    } else {
        tracing::warn!("{} skipped: {}", what, e);
    }
}

/// A timer tick that lost the race against `stop()`.
fn stopping(e: &SchedulerError) -> bool {
    matches!(
        e,
        SchedulerError::NotRunning(SchedulerPhase::Draining | SchedulerPhase::Stopped)
    )
}

/// Handle for the background polling loop.
///
/// Dropping it ends the loop after the current cycle; call `stop()` to also
/// release device connections.
pub struct SchedulerHandle {
    scheduler: Arc<PollingScheduler>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Drain the loop within the configured time box, then tear down connections.
    pub async fn stop(self) {
        let Self {
            scheduler,
            stop_tx,
            mut task,
        } = self;

        scheduler.set_phase(SchedulerPhase::Draining);
        let _ = stop_tx.send(true);

        let drain = scheduler.polling.drain_timeout();
        match tokio::time::timeout(drain, &mut task).await {
            Ok(_) => tracing::debug!("Polling loop drained"),
            Err(_) => {
                tracing::warn!("Poll cycle still running after {:?}, abandoning it", drain);
                task.abort();
                let _ = task.await;
            }
        }

        scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{harness, host, running, running_with};
    use crate::domain::machine::{MachineSnapshot, OperatingState};
    use crate::infrastructure::config::ConfigError;
    use crate::infrastructure::simulated_link::SimulatedLink;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initialize_seeds_and_publishes() {
        let h = running(3).await;

        assert_eq!(h.scheduler.phase(), SchedulerPhase::Running);
        let set = h.store.read_all();
        assert_eq!(set.cycle, 0);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(2).unwrap().address.host, "10.0.0.3");
        assert!(set.machines.iter().all(|m| !m.connected && m.durations.total() == 0));
    }

    #[tokio::test]
    async fn test_empty_range_refuses_to_run() {
        let mut h = harness(SimulatedLink::scripted(), 3);
        h.devices.range_start = 9;
        h.devices.range_end = 2;
        let scheduler = h.rebuild();

        let result = scheduler.initialize().await;
        assert!(matches!(
            result,
            Err(SchedulerError::Config(ConfigError::EmptyRange { .. }))
        ));
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert!(matches!(
            scheduler.run_cycle(CycleKind::Scheduled).await,
            Err(SchedulerError::NotRunning(SchedulerPhase::Idle))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_cycle_accrues_interval() {
        let h = running(3).await;
        h.link.set_status(&host(0), 1);
        h.link.set_status(&host(1), 2);
        h.link.set_status(&host(2), 3);

        let cycle = h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        assert_eq!(cycle, 1);

        let set = h.store.read_all();
        assert_eq!(set.cycle, 1);
        assert_eq!(set.get(0).unwrap().durations.operational, 5);
        assert_eq!(set.get(1).unwrap().durations.quality_stop, 5);
        assert_eq!(set.get(2).unwrap().durations.logistic_stop, 5);
        assert!(set.machines.iter().all(|m| m.connected && m.dwell_secs == 5));
        assert!(set.machines.iter().all(|m| m.last_read.is_some()));
        // first observation after seeding is not a transition
        assert!(h.history.recent(1).is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_retains_previous_snapshot() {
        let h = running(3).await;
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        let before = h.store.read_one(1).unwrap();

        h.link.push_failure(&host(1));
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();

        let after = h.store.read_one(1).unwrap();
        assert_eq!(
            after,
            MachineSnapshot {
                connected: false,
                ..before.clone()
            }
        );
        assert_eq!(h.store.read_one(0).unwrap().durations.operational, 10);

        // the dropped session is re-opened on the next cycle
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        let recovered = h.store.read_one(1).unwrap();
        assert!(recovered.connected);
        assert_eq!(recovered.durations.operational, 10);
        assert_eq!(h.link.open_count(&host(1)), 2);
    }

    #[tokio::test]
    async fn test_unreachable_device_does_not_block_others() {
        let h = running(3).await;
        h.link.set_reachable(&host(2), false);

        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();

        let set = h.store.read_all();
        assert!(set.get(0).unwrap().connected);
        assert!(set.get(1).unwrap().connected);
        let offline = set.get(2).unwrap();
        assert!(!offline.connected);
        assert!(offline.last_read.is_none());
        assert_eq!(offline.durations.total(), 0);
    }

    #[tokio::test]
    async fn test_transition_is_recorded() {
        let h = running(1).await;
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();

        h.link.set_status(&host(0), 4);
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();

        let machine = h.store.read_one(0).unwrap();
        assert_eq!(machine.state, OperatingState::MaintenanceStop);
        assert_eq!(machine.dwell_secs, 5);
        assert_eq!(machine.durations.operational, 5);
        assert_eq!(machine.durations.maintenance_stop, 5);

        let history = h.history.recent(0);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, OperatingState::Operational);
        assert_eq!(history[0].to, OperatingState::MaintenanceStop);
        assert_eq!(history[0].previous_dwell_secs, 5);
    }

    #[tokio::test]
    async fn test_manual_refresh_credits_no_time() {
        let h = running(2).await;
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        let before = h.store.read_all();

        let cycle = h.scheduler.run_cycle(CycleKind::Manual).await.unwrap();
        assert_eq!(cycle, 2);

        let after = h.store.read_all();
        for (old, new) in before.machines.iter().zip(after.machines.iter()) {
            assert_eq!(old.durations, new.durations);
            assert_eq!(old.dwell_secs, new.dwell_secs);
            assert!(new.last_read >= old.last_read);
        }
    }

    #[tokio::test]
    async fn test_every_cycle_credits_exactly_one_interval() {
        let h = running_with(SimulatedLink::drifting(), 4).await;

        for cycle in 1..=20u64 {
            h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
            let set = h.store.read_all();
            assert_eq!(set.cycle, cycle);
            for machine in &set.machines {
                assert_eq!(machine.durations.total(), cycle * 5);
                assert!(machine.dwell_secs <= cycle * 5);
            }
        }
    }

    #[tokio::test]
    async fn test_overlapping_cycles_are_serialized() {
        let h = running(3).await;

        let (scheduled, manual) = tokio::join!(
            h.scheduler.run_cycle(CycleKind::Scheduled),
            h.scheduler.run_cycle(CycleKind::Manual)
        );

        let mut cycles = vec![scheduled.unwrap(), manual.unwrap()];
        cycles.sort_unstable();
        assert_eq!(cycles, vec![1, 2]);
        let set = h.store.read_all();
        assert!(set.machines.iter().all(|m| m.durations.total() == 5));
    }

    #[tokio::test]
    async fn test_refresh_machine_touches_only_target() {
        let h = running(2).await;
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        let untouched = h.store.read_one(0).unwrap();

        h.link.set_status(&host(1), 3);
        let cycle = h.scheduler.refresh_machine(1).await.unwrap();
        assert_eq!(cycle, 2);

        assert_eq!(h.store.read_one(0).unwrap(), untouched);
        let refreshed = h.store.read_one(1).unwrap();
        assert_eq!(refreshed.state, OperatingState::LogisticStop);
        assert_eq!(refreshed.dwell_secs, 0);
        assert_eq!(refreshed.durations.operational, 5);

        assert!(matches!(
            h.scheduler.refresh_machine(9).await,
            Err(SchedulerError::UnknownMachine(9))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watched_machines_expire() {
        let h = running(3).await;
        assert_eq!(h.scheduler.refresh_watched().await.unwrap(), None);

        h.scheduler.watch_details(2);
        assert_eq!(h.scheduler.refresh_watched().await.unwrap(), Some(1));
        assert!(h.store.read_one(2).unwrap().connected);
        assert!(!h.store.read_one(0).unwrap().connected);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(h.scheduler.refresh_watched().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_refresh_keeps_poll_cadence_for_failed_devices() {
        let h = running(2).await;
        h.link.set_reachable(&host(1), false);
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        h.link.set_reachable(&host(1), true);

        tokio::time::advance(Duration::from_millis(1100)).await;
        h.scheduler.run_cycle(CycleKind::Manual).await.unwrap();
        h.scheduler.refresh_machine(1).await.unwrap();
        assert_eq!(h.link.open_count(&host(1)), 0);
        assert!(!h.store.read_one(1).unwrap().connected);

        tokio::time::advance(Duration::from_secs(4)).await;
        h.scheduler.run_cycle(CycleKind::Manual).await.unwrap();
        assert_eq!(h.link.open_count(&host(1)), 1);
        assert!(h.store.read_one(1).unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_cycle_retries_after_reconnect_cooldown() {
        let h = running(1).await;
        h.link.set_reachable(&host(0), false);
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        h.link.set_reachable(&host(0), true);

        tokio::time::advance(Duration::from_millis(1100)).await;
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        assert_eq!(h.link.open_count(&host(0)), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_history_follows_cycle_order() {
        let h = running(1).await;
        h.scheduler.run_cycle(CycleKind::Scheduled).await.unwrap();
        for raw in [2, 3, 4, 1, 2, 3] {
            h.link.push_read(&host(0), raw);
        }

        let refreshes: Vec<_> = (0..6)
            .map(|_| {
                let scheduler = h.scheduler.clone();
                tokio::spawn(async move { scheduler.refresh_machine(0).await })
            })
            .collect();
        for refresh in refreshes {
            refresh.await.unwrap().unwrap();
        }

        let history = h.history.recent(0);
        let steps: Vec<(u16, u16)> = history.iter().map(|t| (t.from.raw(), t.to.raw())).collect();
        assert_eq!(steps, vec![(1, 2), (2, 3), (3, 4), (4, 1), (1, 2), (2, 3)]);
        assert!(history.windows(2).all(|w| w[0].observed_at <= w[1].observed_at));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_caps_reads_in_flight() {
        let mut h = harness(SimulatedLink::scripted(), 3);
        h.polling.max_concurrent_reads = 2;
        let scheduler = h.rebuild();
        scheduler.initialize().await.unwrap();
        h.link.push_hang(&host(0));
        h.link.push_hang(&host(1));

        let cycle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run_cycle(CycleKind::Scheduled).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.link.open_count(&host(0)), 1);
        assert_eq!(h.link.open_count(&host(1)), 1);
        assert_eq!(h.link.open_count(&host(2)), 0);
        cycle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_hung_cycle_after_drain_timeout() {
        let h = running(2).await;
        h.link.push_hang(&host(0));
        let handle = h.scheduler.start();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.store.read_all().cycle, 0);
        assert!(h.connections.is_connected(1).await);

        let began = Instant::now();
        handle.stop().await;
        let took = began.elapsed();

        let drain = h.polling.drain_timeout();
        assert!(took >= drain && took < drain + Duration::from_secs(1));
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Stopped);
        assert!(!h.connections.is_connected(0).await);
        assert!(!h.connections.is_connected(1).await);
    }

    #[test]
    fn test_ticks_during_shutdown_are_not_warnings() {
        assert!(stopping(&SchedulerError::NotRunning(SchedulerPhase::Draining)));
        assert!(stopping(&SchedulerError::NotRunning(SchedulerPhase::Stopped)));
        assert!(!stopping(&SchedulerError::NotRunning(SchedulerPhase::Idle)));
        assert!(!stopping(&SchedulerError::UnknownMachine(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_polls_and_stops() {
        let h = running(2).await;
        let handle = h.scheduler.start();

        tokio::time::sleep(Duration::from_secs(11)).await;

        let set = h.store.read_all();
        assert_eq!(set.cycle, 2);
        assert_eq!(set.get(0).unwrap().durations.operational, 10);

        handle.stop().await;
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Stopped);
        assert!(!h.connections.is_connected(0).await);
        assert!(matches!(
            h.scheduler.run_cycle(CycleKind::Manual).await,
            Err(SchedulerError::NotRunning(SchedulerPhase::Stopped))
        ));
    }
}
