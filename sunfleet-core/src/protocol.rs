//! The register-protocol capability consumed by the fleet.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Identity block read from a device after a successful scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Manufacturer (`Mn`).
    pub manufacturer: String,
    /// Model (`Md`).
    pub model: String,
    /// Options (`Opt`).
    #[serde(default)]
    pub options: String,
    /// Firmware version (`Vr`).
    pub version: String,
    /// Serial number (`SN`).
    pub serial_number: String,
}

impl Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} - {} ({})",
            self.manufacturer, self.model, self.serial_number, self.version
        )
    }
}

/// A connection to one register-oriented device.
///
/// Implementations own the wire protocol. Every method may block on the
/// network and is expected to bound itself with its own timeout.
#[async_trait]
pub trait ProtocolClient: Send + 'static {
    /// Identifies one register/field within the device layout.
    type Field: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;

    /// A decoded register value. Opaque to the fleet.
    type Value: Clone + Debug + Send + Sync + 'static;

    /// Open the underlying connection.
    async fn connect(&mut self) -> Result<(), ProtocolError>;

    /// Whether a connection is currently open.
    fn is_connected(&self) -> bool;

    /// Discover the register layout. With `eager`, also load every register.
    async fn scan(&mut self, eager: bool) -> Result<(), ProtocolError>;

    /// Read the device identity block.
    async fn read_identity(&mut self) -> Result<DeviceIdentity, ProtocolError>;

    /// Read the current value of one field.
    async fn read_point(&mut self, field: &Self::Field) -> Result<Self::Value, ProtocolError>;

    /// Write a new value to one field.
    async fn write_point(
        &mut self,
        field: &Self::Field,
        value: &Self::Value,
    ) -> Result<(), ProtocolError>;

    /// Close the connection. Closing a closed client is not an error.
    async fn close(&mut self) -> Result<(), ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let identity = DeviceIdentity {
            manufacturer: "Generac".into(),
            model: "REbus Beacon".into(),
            options: String::new(),
            version: "CES-1.1.2.B66".into(),
            serial_number: "0001001206E8".into(),
        };
        assert_eq!(
            identity.to_string(),
            "Generac REbus Beacon - 0001001206E8 (CES-1.1.2.B66)"
        );
    }
}
