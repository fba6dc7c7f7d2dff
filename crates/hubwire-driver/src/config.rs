use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

pub use crate::queue::FOREVER;

/// How long a foreground caller waits for a command reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a foreground caller waits for slow operations such as a flash erase.
pub const LONG_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Physical ports on a Build HAT.
pub const DEFAULT_PORT_COUNT: u8 = 4;

/// Largest port count accepted by [`DriverConfig::validate`].
pub const MAX_PORT_COUNT: u8 = 32;

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Wait for a single command reply.
    #[serde(with = "millis")]
    pub reply_timeout: Duration,
    /// Wait for slow replies (firmware store, checksum, validation).
    #[serde(with = "millis")]
    pub long_operation_timeout: Duration,
    /// Overall bound on waiting for motion feedback. `None` waits until the
    /// motion completes, stalls, is discarded, or the driver shuts down.
    #[serde(with = "opt_millis")]
    pub feedback_deadline: Option<Duration>,
    /// Ids below this are physical ports; the rest are virtual pairs.
    pub port_count: u8,
    pub i2c: I2cConfig,
    pub serial: SerialConfig,
}

/// I2C bus and wake line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct I2cConfig {
    pub device: PathBuf,
    pub address: u16,
    pub wake_gpio: u32,
    pub sysfs_root: PathBuf,
}

/// Serial console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: PathBuf,
    pub baud: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            reply_timeout: REPLY_TIMEOUT,
            long_operation_timeout: LONG_OPERATION_TIMEOUT,
            feedback_deadline: None,
            port_count: DEFAULT_PORT_COUNT,
            i2c: I2cConfig::default(),
            serial: SerialConfig::default(),
        }
    }
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/i2c-1"),
            address: 0x12,
            wake_gpio: 5,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/serial0"),
            baud: 115_200,
        }
    }
}

impl DriverConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reply_timeout.is_zero() {
            return Err(DriverError::Config("reply_timeout must be non-zero".into()));
        }
        if self.long_operation_timeout.is_zero() {
            return Err(DriverError::Config(
                "long_operation_timeout must be non-zero".into(),
            ));
        }
        if self.feedback_deadline.is_some_and(|d| d.is_zero()) {
            return Err(DriverError::Config(
                "feedback_deadline must be non-zero when set".into(),
            ));
        }
        if !(1..=MAX_PORT_COUNT).contains(&self.port_count) {
            return Err(DriverError::Config(format!(
                "port_count must be in 1..={MAX_PORT_COUNT}, got {}",
                self.port_count
            )));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hardware() {
        let config = DriverConfig::default();
        assert_eq!(config.reply_timeout, Duration::from_secs(1));
        assert_eq!(config.long_operation_timeout, Duration::from_secs(10));
        assert_eq!(config.port_count, 4);
        assert_eq!(config.i2c.address, 0x12);
        assert_eq!(config.serial.baud, 115_200);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            DriverConfig::from_json_str(r#"{"reply_timeout": 250, "i2c": {"wake_gpio": 6}}"#)
                .unwrap();
        assert_eq!(config.reply_timeout, Duration::from_millis(250));
        assert_eq!(config.i2c.wake_gpio, 6);
        assert_eq!(config.i2c.address, 0x12);
        assert_eq!(config.feedback_deadline, None);
    }

    #[test]
    fn json_round_trip_uses_milliseconds() {
        let config = DriverConfig {
            feedback_deadline: Some(Duration::from_secs(5)),
            ..DriverConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["reply_timeout"], 1000);
        assert_eq!(json["feedback_deadline"], 5000);
    }

    #[test]
    fn rejects_zero_timeouts_and_bad_port_counts() {
        assert!(DriverConfig::from_json_str(r#"{"reply_timeout": 0}"#).is_err());
        assert!(DriverConfig::from_json_str(r#"{"port_count": 0}"#).is_err());
        assert!(DriverConfig::from_json_str(r#"{"port_count": 33}"#).is_err());
        assert!(DriverConfig::from_json_str(r#"{"feedback_deadline": 0}"#).is_err());
    }

    #[test]
    fn malformed_json_is_json_error() {
        let err = DriverConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, DriverError::Json(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = DriverConfig::load("/nonexistent/hubwire.json").unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }
}
