//! SunFleet core.
//!
//! Coordinates a fleet of register devices behind a [`ProtocolClient`]:
//!
//! - [`device`] / [`connection`] - device handles and bounded (re)connects
//! - [`scanner`] - one-time layout and identity discovery
//! - [`registry`] - point watches, one callback per point
//! - [`scheduler`] - concurrent, bounded polling of every watched point
//! - [`Fleet`] - the facade tying them together
//!
//! Protocol framing lives in the client implementation; the meaning of a
//! register (units, scaling, enumerations) belongs to the callbacks.

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod fleet;
pub mod point;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod scheduler;

pub use config::{DeviceConfig, DeviceEndpoint, DeviceGroupConfig, FleetConfig, RetryPolicy};
pub use device::DeviceHandle;
pub use error::{FleetError, ProtocolError, Result};
pub use fleet::{Fleet, InitSummary};
pub use point::{Point, PointSample};
pub use protocol::{DeviceIdentity, ProtocolClient};
pub use registry::{PointCallback, WatchEntry, WatchRegistry};
pub use scheduler::PollSummary;
