//! Zenoh bridge for a SunSpec device fleet.
//!
//! Scans every configured device once, then polls the configured points on
//! a fixed interval and publishes each sample to Zenoh. Writable points
//! accept commands.
//!
//! # Key Expressions
//!
//! ```text
//! sunfleet/<device>/<point>        published samples
//! sunfleet/<device>/<point>/set    write commands (writable points only)
//! sunfleet/@/status                bridge status
//! ```

pub mod bridge;
pub mod config;
