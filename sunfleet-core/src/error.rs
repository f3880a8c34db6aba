//! Error types for the fleet core.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`FleetError`].
pub type Result<T> = std::result::Result<T, FleetError>;

/// Transport-level failures reported by a [`ProtocolClient`](crate::ProtocolClient).
///
/// These never cross the fleet boundary from `init`, `poll` or `close`;
/// they are retried, logged and contained.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// Socket or framing failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request did not complete in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// An operation needing a connection was attempted without one.
    #[error("Not connected")]
    NotConnected,

    /// The device answered with a protocol exception.
    #[error("Device exception: {0}")]
    Exception(String),

    /// The device layout has not been discovered yet.
    #[error("Device has not been scanned")]
    NotScanned,

    /// The field does not exist in the discovered layout.
    #[error("Unknown point: {0}")]
    UnknownPoint(String),

    /// Register contents could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A value could not be encoded for the field.
    #[error("Encode error: {0}")]
    Encode(String),
}

/// Errors surfaced by the [`Fleet`](crate::Fleet) to its caller.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Invalid fleet configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two devices resolved to the same name.
    #[error("Device {0} is already configured")]
    DuplicateDevice(String),

    /// A point referenced a device that is not part of the fleet.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// The point has no registered callback.
    #[error("Point {0} is not watched")]
    NotWatched(String),

    /// A single-shot read failed.
    #[error("Failed to read {point}: {source}")]
    Read {
        point: String,
        #[source]
        source: ProtocolError,
    },

    /// A write failed.
    #[error("Failed to write {point}: {source}")]
    Write {
        point: String,
        #[source]
        source: ProtocolError,
    },
}

impl FleetError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error indicates a consumer bug rather than a device problem.
    pub fn is_logic_error(&self) -> bool {
        matches!(self, Self::NotWatched(_) | Self::UnknownDevice(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            FleetError::DuplicateDevice("inverter".into()).to_string(),
            "Device inverter is already configured"
        );
        assert_eq!(
            ProtocolError::Timeout(Duration::from_secs(5)).to_string(),
            "Request timed out after 5s"
        );

        let err = FleetError::Read {
            point: "battery.802[0]+8".into(),
            source: ProtocolError::NotConnected,
        };
        assert_eq!(err.to_string(), "Failed to read battery.802[0]+8: Not connected");
    }

    #[test]
    fn test_logic_errors() {
        assert!(FleetError::NotWatched("x".into()).is_logic_error());
        assert!(FleetError::UnknownDevice("x".into()).is_logic_error());
        assert!(!FleetError::config("bad").is_logic_error());
    }
}
