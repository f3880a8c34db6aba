//! The sample record published for every watched point.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One point reading as it goes out on the wire.
///
/// `source` and `metric` are the two key chunks under the prefix; `labels`
/// carry metadata such as the register address and unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    /// Read time, Unix epoch milliseconds.
    pub timestamp: i64,
    pub source: String,
    pub metric: String,
    pub value: TelemetryValue,
    /// Cleared when the latest read failed and `value` is carried over.
    #[serde(default = "fresh_by_default")]
    pub fresh: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

fn fresh_by_default() -> bool {
    true
}

impl TelemetryPoint {
    /// A fresh reading stamped now.
    pub fn new(source: impl Into<String>, metric: impl Into<String>, value: TelemetryValue) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            source: source.into(),
            metric: metric.into(),
            value,
            fresh: true,
            labels: HashMap::new(),
        }
    }

    pub fn at(self, timestamp: i64) -> Self {
        Self { timestamp, ..self }
    }

    pub fn with_fresh(self, fresh: bool) -> Self {
        Self { fresh, ..self }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Decoded register content, serialized as a bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    /// Never read, or flagged not implemented by the device.
    Null,
}

impl TelemetryValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TelemetryValue::Null)
    }
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        TelemetryValue::Unsigned(v)
    }
}

impl From<i64> for TelemetryValue {
    fn from(v: i64) -> Self {
        TelemetryValue::Signed(v)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Float(v)
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::Text(v)
    }
}
