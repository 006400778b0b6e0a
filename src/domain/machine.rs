// Machine domain model
use chrono::{DateTime, Utc};
use std::fmt;

/// Network endpoint of one machine's controller, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineAddress {
    pub host: String,
    pub port: u16,
}

impl MachineAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for MachineAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The four conditions a machine reports through its status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingState {
    Operational,
    QualityStop,
    LogisticStop,
    MaintenanceStop,
}

impl OperatingState {
    pub const ALL: [OperatingState; 4] = [
        OperatingState::Operational,
        OperatingState::QualityStop,
        OperatingState::LogisticStop,
        OperatingState::MaintenanceStop,
    ];

    /// Map a raw register value onto the closed state domain.
    /// Returns `None` for anything outside 1..=4.
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Operational),
            2 => Some(Self::QualityStop),
            3 => Some(Self::LogisticStop),
            4 => Some(Self::MaintenanceStop),
            _ => None,
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            Self::Operational => 1,
            Self::QualityStop => 2,
            Self::LogisticStop => 3,
            Self::MaintenanceStop => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Operational => "Operational",
            Self::QualityStop => "Quality stop",
            Self::LogisticStop => "Logistic stop",
            Self::MaintenanceStop => "Maintenance stop",
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accumulated seconds spent in each operating state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusDurations {
    pub operational: u64,
    pub quality_stop: u64,
    pub logistic_stop: u64,
    pub maintenance_stop: u64,
}

impl StatusDurations {
    pub fn get(&self, state: OperatingState) -> u64 {
        match state {
            OperatingState::Operational => self.operational,
            OperatingState::QualityStop => self.quality_stop,
            OperatingState::LogisticStop => self.logistic_stop,
            OperatingState::MaintenanceStop => self.maintenance_stop,
        }
    }

    fn slot_mut(&mut self, state: OperatingState) -> &mut u64 {
        match state {
            OperatingState::Operational => &mut self.operational,
            OperatingState::QualityStop => &mut self.quality_stop,
            OperatingState::LogisticStop => &mut self.logistic_stop,
            OperatingState::MaintenanceStop => &mut self.maintenance_stop,
        }
    }

    pub fn add(&mut self, state: OperatingState, secs: u64) {
        let slot = self.slot_mut(state);
        *slot = slot.saturating_add(secs);
    }

    pub fn total(&self) -> u64 {
        OperatingState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Published state of one machine. A new snapshot replaces the old one; snapshots are never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSnapshot {
    pub index: usize,
    pub address: MachineAddress,
    pub state: OperatingState,
    pub dwell_secs: u64,
    pub durations: StatusDurations,
    /// `None` until the first successful read.
    pub last_read: Option<DateTime<Utc>>,
    pub connected: bool,
}

impl MachineSnapshot {
    /// Zeroed snapshot used before the machine has been read.
    pub fn seed(index: usize, address: MachineAddress) -> Self {
        Self {
            index,
            address,
            state: OperatingState::Operational,
            dwell_secs: 0,
            durations: StatusDurations::default(),
            last_read: None,
            connected: false,
        }
    }

    /// 1-based identifier shown to operators.
    pub fn id(&self) -> usize {
        self.index + 1
    }

    pub fn name(&self) -> String {
        format!("Machine {}", self.id())
    }

    /// Copy of this snapshot flagged as unreachable, accumulated state untouched.
    pub fn stale(&self) -> Self {
        Self {
            connected: false,
            ..self.clone()
        }
    }
}

/// One snapshot per configured address, index-stable, tagged with the cycle that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineSet {
    pub cycle: u64,
    pub machines: Vec<MachineSnapshot>,
}

impl MachineSet {
    pub fn seed(addresses: Vec<MachineAddress>) -> Self {
        let machines = addresses
            .into_iter()
            .enumerate()
            .map(|(index, address)| MachineSnapshot::seed(index, address))
            .collect();
        Self { cycle: 0, machines }
    }

    pub fn get(&self, index: usize) -> Option<&MachineSnapshot> {
        self.machines.get(index)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
