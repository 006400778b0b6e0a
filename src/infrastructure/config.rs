use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    /// Host prefix including its trailing separator, e.g. `172.16.8.`
    pub prefix: String,
    pub range_start: u16,
    pub range_end: u16,
    pub port: u16,
    pub unit_id: u8,
    pub register_offset: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            prefix: "172.16.8.".to_string(),
            range_start: 110,
            range_end: 130,
            port: 502,
            unit_id: 1,
            register_offset: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub poll_interval_secs: u64,
    pub detail_interval_secs: u64,
    pub io_timeout_ms: u64,
    pub reconnect_cooldown_ms: u64,
    pub drain_timeout_ms: u64,
    pub history_limit: usize,
    /// Upper bound on device reads in flight during one cycle.
    pub max_concurrent_reads: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            detail_interval_secs: 10,
            io_timeout_ms: 2000,
            reconnect_cooldown_ms: 1000,
            drain_timeout_ms: 5000,
            history_limit: 24,
            max_concurrent_reads: 32,
        }
    }
}

impl PollingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn detail_interval(&self) -> Duration {
        Duration::from_secs(self.detail_interval_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    #[default]
    Modbus,
    Simulated,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LinkConfig {
    pub kind: LinkKind,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Configuration problems that stop the service from starting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device range {start}..={end} is empty")]
    EmptyRange { start: u16, end: u16 },

    #[error("device address prefix is empty")]
    MissingPrefix,

    #[error("device port must be non-zero")]
    InvalidPort,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("max_concurrent_reads must be greater than zero")]
    NoConcurrentReads,

    #[error("reconnect cooldown ({cooldown_ms} ms) exceeds the poll interval ({poll_ms} ms)")]
    CooldownTooLong { cooldown_ms: u64, poll_ms: u64 },
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.range_start > self.range_end {
            return Err(ConfigError::EmptyRange {
                start: self.range_start,
                end: self.range_end,
            });
        }
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::MissingPrefix);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("poll_interval_secs"));
        }
        if self.detail_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("detail_interval_secs"));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("io_timeout_ms"));
        }
        if self.max_concurrent_reads == 0 {
            return Err(ConfigError::NoConcurrentReads);
        }
        let poll_ms = self.poll_interval_secs.saturating_mul(1000);
        if self.reconnect_cooldown_ms > poll_ms {
            return Err(ConfigError::CooldownTooLong {
                cooldown_ms: self.reconnect_cooldown_ms,
                poll_ms,
            });
        }
        Ok(())
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.devices.validate()?;
        self.polling.validate()
    }
}

/// Load `config/monitor.*` (optional) overlaid with `MONITOR__SECTION__KEY` variables.
pub fn load_monitor_config() -> anyhow::Result<MonitorConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/monitor").required(false))
        .add_source(config::Environment::with_prefix("MONITOR").separator("__"))
        .build()?;

    let monitor: MonitorConfig = settings.try_deserialize()?;
    monitor.validate()?;
    Ok(monitor)
}
