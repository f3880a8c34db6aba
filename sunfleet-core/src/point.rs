//! Point handles and the samples delivered to callbacks.

use std::fmt::Display;
use std::time::SystemTime;

/// One register/field of one device.
///
/// Obtain points through [`Fleet::point`](crate::Fleet::point) so the
/// device name is known to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Point<F> {
    device: String,
    field: F,
}

impl<F> Point<F> {
    pub(crate) fn new(device: impl Into<String>, field: F) -> Self {
        Self {
            device: device.into(),
            field,
        }
    }

    /// Name of the owning device.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Protocol-level field identifier.
    pub fn field(&self) -> &F {
        &self.field
    }
}

impl<F: Display> Display for Point<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.device, self.field)
    }
}

/// What a watch callback sees after a read.
#[derive(Debug)]
pub struct PointSample<'a, F, V> {
    /// The point that was read.
    pub point: &'a Point<F>,
    /// Last successfully read value, if any read has ever succeeded.
    pub value: Option<&'a V>,
    /// Whether this read succeeded. When false, `value` is from an earlier read.
    pub fresh: bool,
    /// When `value` was read.
    pub read_at: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_display_and_identity() {
        let a = Point::new("battery", "SoC");
        let b = Point::new("battery", "SoC");
        let c = Point::new("inverter", "SoC");

        assert_eq!(a.to_string(), "battery.SoC");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(c.device(), "inverter");
        assert_eq!(*c.field(), "SoC");
    }
}
