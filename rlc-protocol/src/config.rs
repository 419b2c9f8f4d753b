//! AM entity configuration
//!
//! Every per-connection buffer pair is parameterized by one [`AmConfig`].
//! Values can come from a TOML file or from `AmConfig::default()`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Tunables for one acknowledged-mode connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmConfig {
    /// Fragment payload size in bytes
    #[serde(default = "default_fragment_unit")]
    pub fragment_unit: usize,
    /// Transmission window capacity in fragments
    #[serde(default = "default_window_size")]
    pub tx_window_size: usize,
    /// Reception window capacity in fragments
    #[serde(default = "default_window_size")]
    pub rx_window_size: usize,
    /// Maximum retransmissions per fragment before its SDU is dropped
    #[serde(default = "default_max_retx")]
    pub max_retx: u32,
    /// Retransmission timeout for data fragments, milliseconds
    #[serde(default = "default_pdu_rtx_timeout")]
    pub pdu_rtx_timeout_ms: u64,
    /// Retransmission timeout for MRW commands, milliseconds
    #[serde(default = "default_ctrl_rtx_timeout")]
    pub ctrl_rtx_timeout_ms: u64,
    /// Poll interval while the transmission queue drains, milliseconds
    #[serde(default = "default_buffer_status_timeout")]
    pub buffer_status_timeout_ms: u64,
    /// Minimum spacing between transmitted status reports, milliseconds
    #[serde(default = "default_ack_report_interval")]
    pub ack_report_interval_ms: u64,
    /// Periodic status-report timer, milliseconds
    #[serde(default = "default_status_report_interval")]
    pub status_report_interval_ms: u64,
}

fn default_fragment_unit() -> usize {
    40
}

fn default_window_size() -> usize {
    16
}

fn default_max_retx() -> u32 {
    3
}

fn default_pdu_rtx_timeout() -> u64 {
    25
}

fn default_ctrl_rtx_timeout() -> u64 {
    25
}

fn default_buffer_status_timeout() -> u64 {
    10
}

fn default_ack_report_interval() -> u64 {
    5
}

fn default_status_report_interval() -> u64 {
    20
}

impl Default for AmConfig {
    fn default() -> Self {
        AmConfig {
            fragment_unit: default_fragment_unit(),
            tx_window_size: default_window_size(),
            rx_window_size: default_window_size(),
            max_retx: default_max_retx(),
            pdu_rtx_timeout_ms: default_pdu_rtx_timeout(),
            ctrl_rtx_timeout_ms: default_ctrl_rtx_timeout(),
            buffer_status_timeout_ms: default_buffer_status_timeout(),
            ack_report_interval_ms: default_ack_report_interval(),
            status_report_interval_ms: default_status_report_interval(),
        }
    }
}

impl AmConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: AmConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fragment_unit == 0 {
            return Err(ConfigError::Invalid("fragment_unit must be > 0".into()));
        }
        if self.tx_window_size == 0 || self.rx_window_size == 0 {
            return Err(ConfigError::Invalid("window sizes must be > 0".into()));
        }
        Ok(())
    }

    pub fn pdu_rtx_timeout(&self) -> Duration {
        Duration::from_millis(self.pdu_rtx_timeout_ms)
    }

    pub fn ctrl_rtx_timeout(&self) -> Duration {
        Duration::from_millis(self.ctrl_rtx_timeout_ms)
    }

    pub fn buffer_status_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_status_timeout_ms)
    }

    pub fn ack_report_interval(&self) -> Duration {
        Duration::from_millis(self.ack_report_interval_ms)
    }

    pub fn status_report_interval(&self) -> Duration {
        Duration::from_millis(self.status_report_interval_ms)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
