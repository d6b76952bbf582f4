//! Configuration management.
//!
//! Settings are loaded from a TOML file via the `config` crate:
//!
//! ```toml
//! log_level = "info"
//!
//! [connection]
//! kind = "tcp"
//! address = "192.168.2.121:5025"
//! timeout_ms = 2000
//!
//! # or, for a serial front panel:
//! # kind = "serial"
//! # device = "/dev/ttyUSB0"
//! # baud_rate = 115200
//!
//! [polling]
//! interval_ms = 20
//! # max_wait_ms = 600000   # optional bound on sweep completion
//!
//! # tables = "tables/fw_3_2.toml"   # optional vocabulary extension
//! ```

use crate::adapters::Transport;
use crate::error::{SmuError, SmuResult};
use config::Config;
use serde::Deserialize;
use std::time::Duration;

/// Top-level application settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Log filter, e.g. `"info"` or `"smu_daq=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How to reach the instrument.
    pub connection: ConnectionSettings,

    /// Sweep-completion polling behavior.
    #[serde(default)]
    pub polling: PollSettings,

    /// Optional path to a classification-table extension file.
    #[serde(default)]
    pub tables: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Transport endpoint selection.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    /// `"tcp"` or `"serial"`.
    pub kind: String,

    /// TCP endpoint, `host:port`.
    #[serde(default)]
    pub address: Option<String>,

    /// Serial device path.
    #[serde(default)]
    pub device: Option<String>,

    /// Serial baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read timeout for queries.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout_ms() -> u64 {
    2000
}

/// Sweep-completion polling behavior.
///
/// `max_wait_ms` bounds the total time spent polling for sweep
/// completion; left unset, polling continues until the instrument
/// reports done (the historical behavior).
#[derive(Debug, Deserialize, Clone)]
pub struct PollSettings {
    /// Delay between status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Optional overall bound on the completion wait.
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    20
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval_ms: default_poll_interval_ms(),
            max_wait_ms: None,
        }
    }
}

impl PollSettings {
    /// Delay between polls.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Overall completion bound, if configured.
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &str) -> SmuResult<Self> {
        let s = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        Ok(s.try_deserialize()?)
    }
}

impl ConnectionSettings {
    /// Construct the configured transport.
    pub fn build_transport(&self) -> SmuResult<Box<dyn Transport>> {
        let timeout = Duration::from_millis(self.timeout_ms);
        match self.kind.as_str() {
            "tcp" => {
                let address = self.address.clone().ok_or_else(|| {
                    SmuError::Instrument("connection.address is required for kind = \"tcp\"".into())
                })?;
                Ok(Box::new(
                    crate::adapters::TcpTransport::new(address).with_timeout(timeout),
                ))
            }
            "serial" => self.build_serial(timeout),
            other => Err(SmuError::Instrument(format!(
                "unknown connection kind '{}'",
                other
            ))),
        }
    }

    #[cfg(feature = "instrument_serial")]
    fn build_serial(&self, timeout: Duration) -> SmuResult<Box<dyn Transport>> {
        let device = self.device.clone().ok_or_else(|| {
            SmuError::Instrument("connection.device is required for kind = \"serial\"".into())
        })?;
        Ok(Box::new(
            crate::adapters::serial::SerialTransport::new(device, self.baud_rate)
                .with_timeout(timeout),
        ))
    }

    #[cfg(not(feature = "instrument_serial"))]
    fn build_serial(&self, _timeout: Duration) -> SmuResult<Box<dyn Transport>> {
        Err(SmuError::SerialFeatureDisabled)
    }
}
