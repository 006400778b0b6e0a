// In-memory device bank implementing DeviceLink
use crate::application::device_link::{DeviceLink, DeviceSession};
use crate::application::errors::LinkError;
use crate::domain::machine::{MachineAddress, OperatingState};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

/// Chance per read that a drifting device switches to another state.
const DRIFT_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    /// Devices hold their value until a test queues or sets another one.
    Scripted,
    /// Devices wander between states on their own.
    Drifting,
}

#[derive(Debug, Clone, Copy)]
enum ScriptedRead {
    Value(u16),
    Fail,
    /// The transaction never completes.
    Hang,
}

#[derive(Debug)]
struct SimDevice {
    reachable: bool,
    raw: u16,
    script: VecDeque<ScriptedRead>,
    opens: usize,
}

impl SimDevice {
    fn new(raw: u16) -> Self {
        Self {
            reachable: true,
            raw,
            script: VecDeque::new(),
            opens: 0,
        }
    }
}

#[derive(Clone)]
pub struct SimulatedLink {
    mode: SimulationMode,
    devices: Arc<Mutex<HashMap<String, SimDevice>>>,
}

impl SimulatedLink {
    pub fn scripted() -> Self {
        Self::with_mode(SimulationMode::Scripted)
    }

    pub fn drifting() -> Self {
        Self::with_mode(SimulationMode::Drifting)
    }

    fn with_mode(mode: SimulationMode) -> Self {
        Self {
            mode,
            devices: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn initial_raw(&self) -> u16 {
        match self.mode {
            SimulationMode::Scripted => OperatingState::Operational.raw(),
            SimulationMode::Drifting => rand::thread_rng().gen_range(1..=4),
        }
    }

    fn with_device<R>(&self, host: &str, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        let initial = self.initial_raw();
        let mut devices = self.devices.lock();
        let device = devices
            .entry(host.to_string())
            .or_insert_with(|| SimDevice::new(initial));
        f(device)
    }

    /// Take a device offline or bring it back. Open sessions fail on their next read.
    pub fn set_reachable(&self, host: &str, reachable: bool) {
        self.with_device(host, |d| d.reachable = reachable);
    }

    /// Set the value the device reports once its queued reads are used up.
    pub fn set_status(&self, host: &str, raw: u16) {
        self.with_device(host, |d| d.raw = raw);
    }

    /// Queue a raw value for the next read.
    pub fn push_read(&self, host: &str, raw: u16) {
        self.with_device(host, |d| d.script.push_back(ScriptedRead::Value(raw)));
    }

    /// Queue a failed transaction for the next read.
    pub fn push_failure(&self, host: &str) {
        self.with_device(host, |d| d.script.push_back(ScriptedRead::Fail));
    }

    /// Queue a read that never answers.
    pub fn push_hang(&self, host: &str) {
        self.with_device(host, |d| d.script.push_back(ScriptedRead::Hang));
    }

    /// Number of sessions opened to `host` so far.
    pub fn open_count(&self, host: &str) -> usize {
        self.devices.lock().get(host).map(|d| d.opens).unwrap_or(0)
    }
}

fn drift(raw: u16) -> u16 {
    let mut rng = rand::thread_rng();
    if !rng.gen_bool(DRIFT_PROBABILITY) {
        return raw;
    }
    let others: Vec<u16> = OperatingState::ALL
        .iter()
        .map(|s| s.raw())
        .filter(|r| *r != raw)
        .collect();
    others[rng.gen_range(0..others.len())]
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn open(&self, address: &MachineAddress) -> Result<Box<dyn DeviceSession>, LinkError> {
        let reachable = self.with_device(&address.host, |d| {
            if d.reachable {
                d.opens += 1;
            }
            d.reachable
        });

        if !reachable {
            return Err(LinkError::Refused(address.to_string()));
        }

        Ok(Box::new(SimSession {
            host: address.host.clone(),
            mode: self.mode,
            devices: self.devices.clone(),
        }))
    }
}

struct SimSession {
    host: String,
    mode: SimulationMode,
    devices: Arc<Mutex<HashMap<String, SimDevice>>>,
}

impl SimSession {
    /// Next register values, or `None` when the read should hang.
    fn next_read(&self, count: u16) -> Result<Option<Vec<u16>>, LinkError> {
        let mut devices = self.devices.lock();
        let device = devices.get_mut(&self.host).ok_or_else(|| {
            LinkError::Io(io::Error::new(io::ErrorKind::NotFound, "unknown device"))
        })?;

        if !device.reachable {
            return Err(LinkError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "device went offline",
            )));
        }

        match device.script.pop_front() {
            Some(ScriptedRead::Value(raw)) => device.raw = raw,
            Some(ScriptedRead::Fail) => {
                return Err(LinkError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "scripted read failure",
                )));
            }
            Some(ScriptedRead::Hang) => return Ok(None),
            None if self.mode == SimulationMode::Drifting => device.raw = drift(device.raw),
            None => {}
        }

        Ok(Some(vec![device.raw; count as usize]))
    }
}

#[async_trait]
impl DeviceSession for SimSession {
    async fn read_holding_registers(
        &mut self,
        _offset: u16,
        count: u16,
    ) -> Result<Vec<u16>, LinkError> {
        match self.next_read(count)? {
            Some(registers) => Ok(registers),
            None => std::future::pending().await,
        }
    }
}
