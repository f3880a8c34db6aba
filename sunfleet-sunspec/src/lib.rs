//! SunSpec over Modbus TCP for SunFleet.
//!
//! [`SunSpecClient`] implements [`sunfleet_core::ProtocolClient`]: it finds
//! the SunSpec marker, walks the model chain, reads the common model as the
//! device identity and reads/writes individual points by
//! [`SunSpecField`].

pub mod client;
pub mod field;
pub mod layout;
pub mod value;

pub use client::SunSpecClient;
pub use field::{ParseKindError, PointKind, SunSpecField};
pub use layout::{Layout, ModelHeader, RegisterSource};
pub use value::SunSpecValue;
