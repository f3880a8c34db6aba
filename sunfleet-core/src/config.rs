//! Fleet configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Highest valid Modbus unit id.
pub const MAX_UNIT_ID: u8 = 247;

/// Devices sharing one gateway, plus retry and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Gateway host (IP or hostname)
    #[serde(default = "default_host")]
    pub host: String,

    /// Gateway TCP port (default: 502)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Individually named devices; at least one is required
    #[serde(default)]
    pub primary: Vec<DeviceConfig>,

    /// Named groups of auxiliary devices; at least one is required
    #[serde(default)]
    pub groups: Vec<DeviceGroupConfig>,

    /// Connection attempts before giving up until the next operation
    #[serde(default = "default_attempts")]
    pub connect_attempts: u32,

    /// Scan attempts per device during init
    #[serde(default = "default_attempts")]
    pub scan_attempts: u32,

    /// Read attempts per point per poll cycle
    #[serde(default = "default_attempts")]
    pub read_attempts: u32,

    /// Worker pool size (default: twice the device count)
    #[serde(default)]
    pub max_workers: Option<usize>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    502
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_attempts() -> u32 {
    3
}

/// A single named device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device name
    pub name: String,

    /// Modbus unit/slave id (1-247)
    pub unit_id: u8,

    /// Host override for devices not behind the shared gateway
    #[serde(default)]
    pub host: Option<String>,

    /// Port override
    #[serde(default)]
    pub port: Option<u16>,
}

/// A named group of devices of the same kind.
///
/// Members are named `<group>_<unit_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroupConfig {
    /// Group name
    pub name: String,

    /// Unit ids of the members
    pub unit_ids: Vec<u8>,
}

/// Where and how to reach one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
    /// Owning group, for auxiliary devices
    pub group: Option<String>,
}

impl DeviceEndpoint {
    /// `host:port` string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Retry budgets applied by the connection manager, scanner and scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub connect_attempts: u32,
    pub scan_attempts: u32,
    pub read_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_attempts: default_attempts(),
            scan_attempts: default_attempts(),
            read_attempts: default_attempts(),
        }
    }
}

impl FleetConfig {
    /// A config on `host:port` with no devices yet.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_timeout_ms(),
            primary: Vec::new(),
            groups: Vec::new(),
            connect_attempts: default_attempts(),
            scan_attempts: default_attempts(),
            read_attempts: default_attempts(),
            max_workers: None,
        }
    }

    /// Add a primary device.
    pub fn with_device(mut self, name: impl Into<String>, unit_id: u8) -> Self {
        self.primary.push(DeviceConfig {
            name: name.into(),
            unit_id,
            host: None,
            port: None,
        });
        self
    }

    /// Add a group of auxiliary devices.
    pub fn with_group(mut self, name: impl Into<String>, unit_ids: Vec<u8>) -> Self {
        self.groups.push(DeviceGroupConfig {
            name: name.into(),
            unit_ids,
        });
        self
    }

    /// Retry budgets from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            connect_attempts: self.connect_attempts,
            scan_attempts: self.scan_attempts,
            read_attempts: self.read_attempts,
        }
    }

    /// Worker pool size for `device_count` devices.
    pub fn worker_count(&self, device_count: usize) -> usize {
        self.max_workers.unwrap_or(device_count * 2).max(1)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.endpoints().map(|_| ())
    }

    /// Validate and resolve every device to its endpoint, primaries first.
    pub fn endpoints(&self) -> Result<Vec<DeviceEndpoint>> {
        if self.host.is_empty() {
            return Err(FleetError::config("host cannot be empty"));
        }
        if self.primary.is_empty() {
            return Err(FleetError::config(
                "At least one primary device must be configured",
            ));
        }
        if self.groups.is_empty() {
            return Err(FleetError::config(
                "At least one device group must be configured",
            ));
        }
        for (what, attempts) in [
            ("connect_attempts", self.connect_attempts),
            ("scan_attempts", self.scan_attempts),
            ("read_attempts", self.read_attempts),
        ] {
            if attempts == 0 {
                return Err(FleetError::config(format!("{} must be at least 1", what)));
            }
        }
        if self.max_workers == Some(0) {
            return Err(FleetError::config("max_workers must be at least 1"));
        }

        let timeout = Duration::from_millis(self.timeout_ms);
        let mut names = HashSet::new();
        let mut endpoints = Vec::new();

        for device in &self.primary {
            if device.name.is_empty() {
                return Err(FleetError::config("Device name cannot be empty"));
            }
            check_unit_id(&device.name, device.unit_id)?;
            if !names.insert(device.name.clone()) {
                return Err(FleetError::DuplicateDevice(device.name.clone()));
            }
            endpoints.push(DeviceEndpoint {
                name: device.name.clone(),
                host: device.host.clone().unwrap_or_else(|| self.host.clone()),
                port: device.port.unwrap_or(self.port),
                unit_id: device.unit_id,
                timeout,
                group: None,
            });
        }

        for group in &self.groups {
            if group.name.is_empty() {
                return Err(FleetError::config("Group name cannot be empty"));
            }
            if group.unit_ids.is_empty() {
                return Err(FleetError::config(format!(
                    "Group '{}': unit_ids must be set and not empty",
                    group.name
                )));
            }
            for &unit_id in &group.unit_ids {
                let name = format!("{}_{}", group.name, unit_id);
                check_unit_id(&name, unit_id)?;
                if !names.insert(name.clone()) {
                    return Err(FleetError::DuplicateDevice(name));
                }
                endpoints.push(DeviceEndpoint {
                    name,
                    host: self.host.clone(),
                    port: self.port,
                    unit_id,
                    timeout,
                    group: Some(group.name.clone()),
                });
            }
        }

        Ok(endpoints)
    }
}

fn check_unit_id(name: &str, unit_id: u8) -> Result<()> {
    if unit_id == 0 || unit_id > MAX_UNIT_ID {
        return Err(FleetError::config(format!(
            "Device '{}': unit_id must be 1-{}",
            name, MAX_UNIT_ID
        )));
    }
    Ok(())
}
