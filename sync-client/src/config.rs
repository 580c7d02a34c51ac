//! Configuration loading for misync.
//!
//! Configuration is loaded from a TOML file (default: `misync.toml`). Every
//! field has a default, so an empty file is a valid configuration.

use misync_core::Liveness;
use misync_types::Address;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Master configuration.
    #[serde(default)]
    pub master: MasterConfig,
    /// Device configuration, needed only to run a module.
    pub device: Option<DeviceConfig>,
    /// External sinks attached to the master.
    #[serde(default)]
    pub sinks: SinksConfig,
    /// UDP link configuration.
    #[serde(default)]
    pub udp: UdpConfig,
}

/// Master configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    /// Module list like `"Heater:he:44 Sensor:se:45:0.0.0.1"`.
    #[serde(default)]
    pub modules: String,
    /// Prefix of the master's own variables.
    #[serde(default)]
    pub prefix: String,
    /// Interval between full transfers in milliseconds (default: 10000).
    #[serde(default = "default_transfer_interval_ms")]
    pub transfer_interval_ms: u64,
    /// Pause between update rounds in milliseconds (default: 10).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Contract retry interval for active modules in milliseconds (default: 1000).
    #[serde(default = "default_contract_interval_active_ms")]
    pub contract_interval_active_ms: u64,
    /// Contract retry interval for inactive modules in milliseconds (default: 20000).
    #[serde(default = "default_contract_interval_inactive_ms")]
    pub contract_interval_inactive_ms: u64,
    /// How long to wait for a reply in milliseconds (default: 5000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long to wait for an active module's ack in milliseconds (default: 5000).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// How long to wait for an inactive module's ack in milliseconds (default: 5).
    #[serde(default = "default_reduced_send_timeout_ms")]
    pub reduced_send_timeout_ms: u64,
    /// Failed sends before a module counts as inactive (default: 5).
    #[serde(default = "default_max_failures")]
    pub max_failures: u8,
    /// Silence in seconds before a module counts as inactive (default: 120).
    #[serde(default = "default_inactive_after_secs")]
    pub inactive_after_secs: u64,
    /// Interval between scheduled time broadcasts in seconds (default: 60).
    #[serde(default = "default_time_sync_interval_secs")]
    pub time_sync_interval_secs: u64,
}

/// Device (module) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Module name, at most 8 characters are kept.
    pub name: String,
    /// Settings contract like `"Target:f4 Mode:u1"`.
    #[serde(default)]
    pub settings: String,
    /// Inputs contract.
    #[serde(default)]
    pub inputs: String,
    /// Outputs contract.
    #[serde(default)]
    pub outputs: String,
    /// How long each update listens for packets in milliseconds (default: 1).
    #[serde(default = "default_receive_window_ms")]
    pub receive_window_ms: u64,
    /// How long to wait for the master's ack in milliseconds (default: 5000).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Pause between update rounds in milliseconds (default: 10).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// File keeping a settings snapshot across restarts (optional).
    pub snapshot: Option<PathBuf>,
    /// Size of the snapshot file in bytes (default: 256).
    #[serde(default = "default_snapshot_size")]
    pub snapshot_size: usize,
    /// Minimum seconds between snapshot writes (default: 600).
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

/// External sinks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SinksConfig {
    /// JSON file sink (optional).
    pub json: Option<JsonSinkConfig>,
    /// Log sink (optional).
    pub log: Option<LogSinkConfig>,
}

/// JSON file sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonSinkConfig {
    /// File settings are read from and values written to.
    pub path: PathBuf,
}

/// Log sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSinkConfig {
    /// Log settings as well as outputs (default: false).
    #[serde(default)]
    pub settings: bool,
}

/// UDP link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UdpConfig {
    /// Own link address (default: 1).
    #[serde(default = "default_link_address")]
    pub address: Address,
    /// Bind address for the socket (default: 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// UDP port (default: 7100).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Known peers.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// One peer reachable over UDP.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Link address of the peer.
    pub address: Address,
    /// Socket address like `127.0.0.1:7101`.
    pub socket: String,
}

// Default value functions
fn default_transfer_interval_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_contract_interval_active_ms() -> u64 {
    1_000
}

fn default_contract_interval_inactive_ms() -> u64 {
    20_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_reduced_send_timeout_ms() -> u64 {
    5
}

fn default_max_failures() -> u8 {
    5
}

fn default_inactive_after_secs() -> u64 {
    120
}

fn default_time_sync_interval_secs() -> u64 {
    60
}

fn default_receive_window_ms() -> u64 {
    1
}

fn default_snapshot_size() -> usize {
    256
}

fn default_save_interval_secs() -> u64 {
    600 // 10 minutes
}

fn default_link_address() -> Address {
    Address::local(1)
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7100
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            modules: String::new(),
            prefix: String::new(),
            transfer_interval_ms: default_transfer_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            contract_interval_active_ms: default_contract_interval_active_ms(),
            contract_interval_inactive_ms: default_contract_interval_inactive_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            reduced_send_timeout_ms: default_reduced_send_timeout_ms(),
            max_failures: default_max_failures(),
            inactive_after_secs: default_inactive_after_secs(),
            time_sync_interval_secs: default_time_sync_interval_secs(),
        }
    }
}

impl MasterConfig {
    /// Interval between full transfers.
    pub fn transfer_interval(&self) -> Duration {
        Duration::from_millis(self.transfer_interval_ms)
    }

    /// Pause between update rounds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Contract retry interval for a module in the given state.
    pub fn contract_interval(&self, active: bool) -> Duration {
        Duration::from_millis(if active {
            self.contract_interval_active_ms
        } else {
            self.contract_interval_inactive_ms
        })
    }

    /// Reply deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Ack deadline for a module in the given state.
    pub fn send_timeout(&self, active: bool) -> Duration {
        Duration::from_millis(if active {
            self.send_timeout_ms
        } else {
            self.reduced_send_timeout_ms
        })
    }

    /// Thresholds for module liveness.
    pub fn liveness(&self) -> Liveness {
        Liveness {
            max_failures: self.max_failures,
            max_silence: Duration::from_secs(self.inactive_after_secs),
        }
    }

    /// Interval between scheduled time broadcasts.
    pub fn time_sync_interval(&self) -> Duration {
        Duration::from_secs(self.time_sync_interval_secs)
    }
}

impl DeviceConfig {
    /// Device with the given contracts and default timing.
    pub fn new(name: &str, settings: &str, inputs: &str, outputs: &str) -> Self {
        Self {
            name: name.to_string(),
            settings: settings.to_string(),
            inputs: inputs.to_string(),
            outputs: outputs.to_string(),
            receive_window_ms: default_receive_window_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            snapshot: None,
            snapshot_size: default_snapshot_size(),
            save_interval_secs: default_save_interval_secs(),
        }
    }

    /// How long each update listens for packets.
    pub fn receive_window(&self) -> Duration {
        Duration::from_millis(self.receive_window_ms)
    }

    /// Ack deadline for messages to the master.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Pause between update rounds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Minimum time between snapshot writes.
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            address: default_link_address(),
            bind: default_bind(),
            port: default_port(),
            peers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}
