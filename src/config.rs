//! Link configuration loaded from YAML

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::DriverSettings;
use crate::metrics::MetricsSettings;
use crate::types::Position;
use crate::wire::HeaderLayout;
use crate::{LinkError, Result};

/// Which base header the incoming stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamLayout {
    /// Frames relayed by the modem (38-byte header)
    #[default]
    Inbound,
    /// Frames as written by a transmitter (50-byte header)
    Outbound,
}

impl From<StreamLayout> for HeaderLayout {
    fn from(layout: StreamLayout) -> Self {
        match layout {
            StreamLayout::Inbound => HeaderLayout::INBOUND,
            StreamLayout::Outbound => HeaderLayout::OUTBOUND,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Modem address as `host:port`
    pub device_addr: String,
    pub layout: StreamLayout,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Bytes requested per socket read
    pub read_buffer_size: usize,
    pub metrics_interval_ms: u64,
    pub ping_interval_ms: u64,
    /// Samples kept in the rolling history
    pub history_len: usize,
    /// Cap PDR at 100%
    pub pdr_clamp: bool,
    /// Measure throughput on this interface instead of the modem socket
    pub interface: Option<String>,
    /// Receiver position until the GPS collaborator reports one
    pub initial_position: Position,
    pub log: LogConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_addr: "192.168.1.11:47347".to_string(),
            layout: StreamLayout::Inbound,
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 3_000,
            backoff_base_ms: 50,
            backoff_max_ms: 5_000,
            read_buffer_size: 12 * 1024,
            metrics_interval_ms: 1_000,
            ping_interval_ms: 1_000,
            history_len: 60,
            pdr_clamp: false,
            interface: None,
            initial_position: Position::new(37.570286992195, 126.98361037914),
            log: LogConfig::default(),
        }
    }
}

/// Log book settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    /// Root directory; a dated subdirectory is created per day
    pub dir: PathBuf,
    pub prefix: String,
    pub rotate_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("."),
            prefix: "OBU_01_RX".to_string(),
            rotate_secs: 60,
        }
    }
}

impl LogConfig {
    pub fn rotate_interval(&self) -> Duration {
        Duration::from_secs(self.rotate_secs)
    }
}

impl LinkConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| LinkError::config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| LinkError::config(format!("cannot read {}: {}", path.display(), e)))?;
        debug!("Loaded config from {} ({} bytes)", path.display(), yaml.len());
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| LinkError::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("metrics_interval_ms", self.metrics_interval_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("log.rotate_secs", self.log.rotate_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(LinkError::config(format!("{} must be greater than zero", name)));
        }
        if self.read_buffer_size == 0 {
            return Err(LinkError::config("read_buffer_size must be greater than zero"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(LinkError::config("backoff_max_ms is smaller than backoff_base_ms"));
        }
        if !self.initial_position.is_valid() {
            return Err(LinkError::config("initial_position is out of range"));
        }
        Ok(())
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            layout: self.layout.into(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            read_buffer_size: self.read_buffer_size,
            ..DriverSettings::default()
        }
    }

    pub fn metrics_settings(&self) -> MetricsSettings {
        MetricsSettings {
            interval: Duration::from_millis(self.metrics_interval_ms),
            history_len: self.history_len,
            pdr_clamp: self.pdr_clamp,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = LinkConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.read_buffer_size, 12288);
        assert_eq!(config.log.rotate_secs, 60);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let yaml = r#"
device_addr: "10.0.0.2:47347"
layout: outbound
pdr_clamp: true
interface: wlan0
log:
  prefix: BENCH
"#;
        let config = LinkConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.device_addr, "10.0.0.2:47347");
        assert_eq!(config.layout, StreamLayout::Outbound);
        assert!(config.pdr_clamp);
        assert_eq!(config.interface.as_deref(), Some("wlan0"));
        assert_eq!(config.log.prefix, "BENCH");
        assert!(config.log.enabled);
        assert_eq!(config.driver_settings().layout, HeaderLayout::OUTBOUND);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = LinkConfig::from_yaml_str("metrics_interval_ms: 0").unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));
        assert!(err.to_string().contains("metrics_interval_ms"));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = LinkConfig::from_yaml_str("history_len: [").unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));
    }

    #[test]
    fn yaml_round_trip() {
        let config = LinkConfig { history_len: 10, ..LinkConfig::default() };
        let yaml = config.to_yaml().unwrap();
        assert_eq!(LinkConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.yaml");
        std::fs::write(&path, "ping_interval_ms: 250\n").unwrap();
        let config = LinkConfig::from_file(&path).unwrap();
        assert_eq!(config.ping_interval(), Duration::from_millis(250));

        assert!(LinkConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
