//! Connection configuration
//!
//! Settings are plain serde structs so they can live in a JSON file next to
//! whatever application drives the device. Durations are stored as
//! milliseconds.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, SUPPORTED_VERSIONS};

/// Deadlines and pacing delays used by the transmission engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Time allowed for one chunk to be acknowledged with "CT"
    #[serde(with = "millis")]
    pub chunk_timeout: Duration,
    /// Pause before resending a chunk the firmware answered with "FF"
    #[serde(with = "millis")]
    pub fragment_retry_delay: Duration,
    /// Time allowed for the first response bytes after a message
    #[serde(with = "millis")]
    pub response_timeout: Duration,
    /// Pause before reading each additional response line
    #[serde(with = "millis")]
    pub line_idle: Duration,
    /// Management handshake: wait for the first byte
    #[serde(with = "millis")]
    pub manage_first_timeout: Duration,
    /// Management handshake: wait for the ACK/NAK terminator
    #[serde(with = "millis")]
    pub manage_second_timeout: Duration,
    /// Sleep between polls of the receive buffer
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_millis(2000),
            fragment_retry_delay: Duration::from_millis(100),
            response_timeout: Duration::from_millis(5000),
            line_idle: Duration::from_millis(50),
            manage_first_timeout: Duration::from_millis(1000),
            manage_second_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial device path (e.g. "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout applied to the serial port, in milliseconds
    pub timeout_ms: u64,
    /// Protocol version placed in outgoing headers
    pub version: u8,
    /// Engine deadlines
    pub timings: Timings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            version: highest_supported_version(),
            timings: Timings::default(),
        }
    }
}

impl ConnectionConfig {
    /// Default configuration for the given device path
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Override the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Override the engine timings
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Load a configuration from a JSON file; absent fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Serial per-read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check that the configuration can be used to open a device
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.port_name.trim().is_empty() {
            return Err(ProtocolError::Configuration(
                "serial device path not configured".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ProtocolError::Configuration("baud rate must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// The newest protocol version this host speaks
pub fn highest_supported_version() -> u8 {
    SUPPORTED_VERSIONS.iter().copied().max().unwrap_or(0)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 250_000);
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.version, 0x00);
        assert_eq!(config.timings.chunk_timeout, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_port_is_configuration_error() {
        let config = ConnectionConfig::default();
        assert!(matches!(config.validate(), Err(ProtocolError::Configuration(_))));

        let zero_baud = ConnectionConfig::new("/dev/ttyACM0").with_baud_rate(0);
        assert!(matches!(zero_baud.validate(), Err(ProtocolError::Configuration(_))));
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port_name": "/dev/ttyACM1", "baud_rate": 115200, "timings": {{ "chunk_timeout": 500 }} }}"#
        )
        .unwrap();

        let config = ConnectionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.port_name, "/dev/ttyACM1");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.timings.chunk_timeout, Duration::from_millis(500));
        assert_eq!(config.timings.response_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ConnectionConfig::from_json_file(file.path()),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn test_json_roundtrip_uses_millis() {
        let config = ConnectionConfig::new("COM3");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timings"]["fragment_retry_delay"], 100);
        let back: ConnectionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
