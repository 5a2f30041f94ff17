//! Runtime configuration
//!
//! Every field has a serde default so a partial TOML file (or none at all)
//! yields a working setup for the sample controller.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, path::Path, time::Duration};

/// Bits of the heartbeat register owned by the rotating counter.
pub const HEARTBEAT_COUNTER_MASK: u16 = 0x000F;

/// A contiguous block of registers `[start, start + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRange {
    pub start: u16,
    pub count: u16,
}

impl RegisterRange {
    pub const fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    /// Last address covered by the range (inclusive)
    pub fn last(&self) -> u16 {
        self.start + self.count.saturating_sub(1)
    }

    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        let start = self.start;
        (0..self.count).map(move |offset| start + offset)
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.count == 0 {
            return Err(anyhow!("{what} starting at {} is empty", self.start));
        }
        if u32::from(self.start) + u32::from(self.count) > u32::from(u16::MAX) + 1 {
            return Err(anyhow!(
                "{what} {}+{} runs past the end of the register space",
                self.start,
                self.count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_register")]
    pub register: u16,
    /// Bits belonging to other producers; preserved on every write.
    #[serde(default = "default_reserved_mask")]
    pub reserved_mask: u16,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_heartbeat_backoff_ms")]
    pub backoff_ms: u64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            register: default_heartbeat_register(),
            reserved_mask: default_reserved_mask(),
            interval_ms: default_heartbeat_interval_ms(),
            backoff_ms: default_heartbeat_backoff_ms(),
        }
    }
}

/// Register monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_modbus_host")]
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sweep_timeout_ms")]
    pub sweep_timeout_ms: u64,
    #[serde(default = "default_sweep_ranges")]
    pub sweep_ranges: Vec<RegisterRange>,
    /// Addresses that are swept but never reported as changes.
    #[serde(default = "default_excluded")]
    pub excluded: BTreeSet<u16>,
    #[serde(default = "default_reset_range")]
    pub reset_range: RegisterRange,
    #[serde(default = "default_initial_monitored")]
    pub initial_monitored: Vec<u16>,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_ranges.is_empty() {
            return Err(anyhow!("at least one sweep range is required"));
        }
        for range in &self.sweep_ranges {
            range.validate("sweep range")?;
        }
        self.reset_range.validate("reset range")?;
        if self.heartbeat.reserved_mask & HEARTBEAT_COUNTER_MASK != 0 {
            return Err(anyhow!(
                "heartbeat reserved mask 0x{:04X} overlaps the counter bits 0x{:04X}",
                self.heartbeat.reserved_mask,
                HEARTBEAT_COUNTER_MASK
            ));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: default_modbus_host(),
            port: default_modbus_port(),
            unit_id: default_unit_id(),
            request_timeout_ms: default_request_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            sweep_timeout_ms: default_sweep_timeout_ms(),
            sweep_ranges: default_sweep_ranges(),
            excluded: default_excluded(),
            reset_range: default_reset_range(),
            initial_monitored: default_initial_monitored(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Socket server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Upper bound for a structured message still waiting for bracket balance.
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_socket_port(),
            read_chunk: default_read_chunk(),
            max_buffered: default_max_buffered(),
        }
    }
}

/// Socket client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_host")]
    pub host: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_socket_port(),
            read_chunk: default_read_chunk(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse configuration")?;
        config.monitor.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

fn default_modbus_host() -> String {
    "192.168.1.7".to_string()
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_sweep_timeout_ms() -> u64 {
    500
}

fn default_sweep_ranges() -> Vec<RegisterRange> {
    vec![RegisterRange::new(128, 125), RegisterRange::new(253, 3)]
}

fn default_excluded() -> BTreeSet<u16> {
    BTreeSet::from([128, 161, 211])
}

fn default_reset_range() -> RegisterRange {
    RegisterRange::new(128, 128)
}

fn default_initial_monitored() -> Vec<u16> {
    vec![202, 138]
}

fn default_heartbeat_register() -> u16 {
    128
}

fn default_reserved_mask() -> u16 {
    0xFFF0
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_heartbeat_backoff_ms() -> u64 {
    1000
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_socket_port() -> u16 {
    12345
}

fn default_read_chunk() -> usize {
    4096
}

fn default_max_buffered() -> usize {
    64 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.monitor.port, 502);
        assert_eq!(config.monitor.excluded, BTreeSet::from([128, 161, 211]));
        assert_eq!(config.monitor.reset_range.last(), 255);
        assert_eq!(config.server.port, 12345);
    }

    #[test]
    fn test_partial_override() {
        let text = r#"
            [monitor]
            host = "10.0.0.5"
            excluded = [128]
            sweep_ranges = [{ start = 0, count = 10 }]

            [monitor.heartbeat]
            register = 211
        "#;
        let config = AppConfig::from_toml_str(text).unwrap();
        assert_eq!(config.monitor.host, "10.0.0.5");
        assert_eq!(config.monitor.excluded, BTreeSet::from([128]));
        assert_eq!(config.monitor.sweep_ranges, vec![RegisterRange::new(0, 10)]);
        assert_eq!(config.monitor.heartbeat.register, 211);
        assert_eq!(config.monitor.heartbeat.reserved_mask, 0xFFF0);
        assert_eq!(config.monitor.poll_interval_ms, 500);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = AppConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(AppConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_mask_overlapping_counter() {
        let text = "[monitor.heartbeat]\nreserved_mask = 0xFFFF\n";
        let err = AppConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_rejects_overflowing_range() {
        let text = "[monitor]\nsweep_ranges = [{ start = 65530, count = 10 }]\n";
        assert!(AppConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_range_helpers() {
        let range = RegisterRange::new(253, 3);
        assert_eq!(range.addresses().collect::<Vec<_>>(), vec![253, 254, 255]);
        assert_eq!(range.last(), 255);
    }
}
