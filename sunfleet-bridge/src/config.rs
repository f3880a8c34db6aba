//! Configuration for the SunFleet bridge.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use sunfleet_common::config::{LoggingConfig, ZenohConfig};
use sunfleet_common::serialization::Format;
use sunfleet_core::FleetConfig;
use sunfleet_sunspec::{PointKind, SunSpecField};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Gateway and devices
    pub fleet: FleetConfig,

    /// Points to watch and publish
    #[serde(default)]
    pub points: Vec<PointConfig>,

    /// Seconds between poll cycles (default: 12)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Key expression prefix (default: "sunfleet")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Payload encoding of published samples
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_poll_interval() -> u64 {
    12
}

fn default_key_prefix() -> String {
    sunfleet_common::KEY_PREFIX.to_string()
}

/// One published point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    /// Metric name, unique per device (used in key expressions)
    pub name: String,

    /// Owning device name
    pub device: String,

    /// SunSpec model id
    pub model: u16,

    /// Model occurrence (default: 0)
    #[serde(default)]
    pub instance: u16,

    /// Register offset within the model block
    pub offset: u16,

    /// Point type, e.g. "uint16", "int32", "string16"
    #[serde(rename = "type")]
    pub kind: PointKind,

    /// Accept writes on `<prefix>/<device>/<name>/set`
    #[serde(default)]
    pub writable: bool,

    /// Unit of measurement (for metadata)
    #[serde(default)]
    pub unit: Option<String>,

    /// Offset of the `sunssf` register scaling this point, in the same
    /// model block
    #[serde(default)]
    pub scale_offset: Option<u16>,

    /// Fixed power-of-ten scale factor, for points without a `sunssf` register
    #[serde(default)]
    pub scale: Option<i16>,

    /// Enum symbol names by raw value, e.g. `{ "2": "SELF_SUPPLY" }`
    #[serde(default)]
    pub symbols: BTreeMap<String, String>,
}

impl PointConfig {
    pub fn field(&self) -> SunSpecField {
        SunSpecField::new(self.model, self.instance, self.offset, self.kind)
    }

    /// The `sunssf` register scaling this point, if any.
    pub fn scale_field(&self) -> Option<SunSpecField> {
        self.scale_offset
            .map(|offset| SunSpecField::new(self.model, self.instance, offset, PointKind::Sunssf))
    }

    fn validate(&self) -> Result<(), String> {
        if self.scale.is_some() && self.scale_offset.is_some() {
            return Err("set either scale or scale_offset, not both".into());
        }
        if (self.scale.is_some() || self.scale_offset.is_some()) && !self.kind.is_scalable() {
            return Err(format!("{} values cannot be scaled", self.kind));
        }
        if !self.symbols.is_empty() && !self.kind.is_enum() {
            return Err(format!("symbols need an enum type, not {}", self.kind));
        }
        if let Some(raw) = self.symbols.keys().find(|raw| raw.parse::<u64>().is_err()) {
            return Err(format!("symbol value '{}' is not an unsigned integer", raw));
        }
        Ok(())
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }

        if !is_key_safe(&self.key_prefix, true) {
            return Err(ConfigError::Validation(format!(
                "Invalid key_prefix '{}'",
                self.key_prefix
            )));
        }

        let endpoints = self
            .fleet
            .endpoints()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        let devices: HashSet<&str> = endpoints.iter().map(|e| e.name.as_str()).collect();

        for endpoint in &endpoints {
            if !is_key_safe(&endpoint.name, false) {
                return Err(ConfigError::Validation(format!(
                    "Device name '{}' cannot be used in a key expression",
                    endpoint.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for point in &self.points {
            if point.name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Point on device '{}': name cannot be empty",
                    point.device
                )));
            }

            if !is_key_safe(&point.name, false) {
                return Err(ConfigError::Validation(format!(
                    "Point '{}': name cannot be used in a key expression",
                    point.name
                )));
            }

            if !devices.contains(point.device.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Point '{}': unknown device '{}'",
                    point.name, point.device
                )));
            }

            point.validate().map_err(|e| {
                ConfigError::Validation(format!("Point '{}' on '{}': {}", point.name, point.device, e))
            })?;

            if !seen.insert((point.device.as_str(), point.name.as_str())) {
                return Err(ConfigError::Validation(format!(
                    "Point '{}' is configured twice on device '{}'",
                    point.name, point.device
                )));
            }
        }

        Ok(())
    }

    /// Points accepting writes.
    pub fn writable_points(&self) -> impl Iterator<Item = &PointConfig> {
        self.points.iter().filter(|p| p.writable)
    }
}

/// Whether `s` can be a key expression chunk (or, with `nested`, several).
fn is_key_safe(s: &str, nested: bool) -> bool {
    fn chunk_ok(chunk: &str) -> bool {
        !chunk.is_empty() && !chunk.contains(['*', '$', '?', '#', '@'])
    }

    if nested {
        s.split('/').all(chunk_ok)
    } else {
        !s.contains('/') && chunk_ok(s)
    }
}
