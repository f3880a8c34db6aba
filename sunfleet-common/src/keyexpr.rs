//! Key expression layout.
//!
//! ```text
//! <prefix>/<device>/<point>        sample of one watched point
//! <prefix>/<device>/<point>/set    write request for a writable point
//! <prefix>/<device>/@/info         identity of one device
//! <prefix>/@/status                bridge liveness
//! ```
//!
//! The prefix may span several chunks (`home/solar`).

/// Prefix used when none is configured.
pub const KEY_PREFIX: &str = "sunfleet";

const SET: &str = "set";
const STATUS: &str = "@/status";
const INFO: &str = "@/info";

/// Key expressions under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

/// Device and point chunks of a parsed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointKey<'a> {
    pub device: &'a str,
    pub point: &'a str,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// ```
    /// use sunfleet_common::KeySpace;
    ///
    /// assert_eq!(KeySpace::default().point("battery", "soc"), "sunfleet/battery/soc");
    /// ```
    pub fn point(&self, device: &str, point: &str) -> String {
        format!("{}/{device}/{point}", self.prefix)
    }

    /// ```
    /// use sunfleet_common::KeySpace;
    ///
    /// let keys = KeySpace::new("home/solar");
    /// assert_eq!(keys.command("battery", "soc_reserve_min"), "home/solar/battery/soc_reserve_min/set");
    /// ```
    pub fn command(&self, device: &str, point: &str) -> String {
        format!("{}/{device}/{point}/{SET}", self.prefix)
    }

    /// Matches every command key.
    pub fn commands(&self) -> String {
        format!("{}/*/*/{SET}", self.prefix)
    }

    /// Matches every sample of one device.
    pub fn device(&self, device: &str) -> String {
        format!("{}/{device}/*", self.prefix)
    }

    /// Identity of one device, published after the scan.
    pub fn info(&self, device: &str) -> String {
        format!("{}/{device}/{INFO}", self.prefix)
    }

    pub fn status(&self) -> String {
        format!("{}/{STATUS}", self.prefix)
    }

    /// Target of a `<prefix>/<device>/<point>/set` key.
    pub fn parse_command<'a>(&self, key: &'a str) -> Option<PointKey<'a>> {
        let target = self.relative(key)?.strip_suffix(SET)?.strip_suffix('/')?;
        split_point(target)
    }

    /// Chunks of a `<prefix>/<device>/<point>` sample key.
    pub fn parse_point<'a>(&self, key: &'a str) -> Option<PointKey<'a>> {
        split_point(self.relative(key)?)
    }

    fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?.strip_prefix('/')
    }
}

fn split_point(rest: &str) -> Option<PointKey<'_>> {
    let (device, point) = rest.split_once('/')?;
    let valid = |chunk: &str| !chunk.is_empty() && !chunk.contains('/') && !chunk.starts_with('@');
    (valid(device) && valid(point)).then_some(PointKey { device, point })
}
