//! In-memory protocol client for fleet tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sunfleet_core::{
    DeviceEndpoint, DeviceIdentity, Fleet, FleetConfig, PointSample, ProtocolClient, ProtocolError,
};

/// Scriptable behaviour and call log of one simulated device.
#[derive(Default)]
pub struct MockDevice {
    calls: Mutex<Vec<String>>,
    refuse_connections: AtomicBool,
    scan_failures: AtomicU32,
    failing_points: Mutex<HashSet<String>>,
    values: Mutex<HashMap<String, i64>>,
    read_delay: Mutex<Duration>,
}

impl MockDevice {
    /// Make every connection attempt fail.
    pub fn refuse_connections(&self) {
        self.refuse_connections.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` scans fail.
    pub fn fail_scans(&self, count: u32) {
        self.scan_failures.store(count, Ordering::SeqCst);
    }

    /// Make every read of `field` fail until [`recover`](Self::recover).
    pub fn fail_reads(&self, field: &str) {
        self.failing_points.lock().unwrap().insert(field.to_string());
    }

    pub fn recover(&self, field: &str) {
        self.failing_points.lock().unwrap().remove(field);
    }

    pub fn set_value(&self, field: &str, value: i64) {
        self.values.lock().unwrap().insert(field.to_string(), value);
    }

    pub fn value(&self, field: &str) -> Option<i64> {
        self.values.lock().unwrap().get(field).copied()
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// Every call made on this device, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

/// The simulated devices of one test, created on first use by name.
#[derive(Clone, Default)]
pub struct Mocks {
    devices: Arc<Mutex<HashMap<String, Arc<MockDevice>>>>,
    active_reads: Arc<AtomicUsize>,
    peak_reads: Arc<AtomicUsize>,
}

impl Mocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self, name: &str) -> Arc<MockDevice> {
        self.devices
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn client(&self, endpoint: &DeviceEndpoint) -> MockClient {
        MockClient {
            name: endpoint.name.clone(),
            device: self.device(&endpoint.name),
            active_reads: self.active_reads.clone(),
            peak_reads: self.peak_reads.clone(),
            connected: false,
            scanned: false,
        }
    }

    /// Highest number of reads in flight at once, across all devices.
    pub fn peak_reads(&self) -> usize {
        self.peak_reads.load(Ordering::SeqCst)
    }

    pub fn fleet(&self, config: &FleetConfig) -> Fleet<MockClient> {
        Fleet::new(config, |endpoint| self.client(endpoint)).expect("valid fleet config")
    }
}

pub struct MockClient {
    name: String,
    device: Arc<MockDevice>,
    active_reads: Arc<AtomicUsize>,
    peak_reads: Arc<AtomicUsize>,
    connected: bool,
    scanned: bool,
}

#[async_trait]
impl ProtocolClient for MockClient {
    type Field = String;
    type Value = i64;

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.device.record("connect");
        if self.device.refuse_connections.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("connection refused".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn scan(&mut self, eager: bool) -> Result<(), ProtocolError> {
        self.device.record(format!("scan:{}", eager));
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }
        let remaining = self.device.scan_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.device.scan_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProtocolError::Timeout(Duration::from_millis(10)));
        }
        self.scanned = true;
        Ok(())
    }

    async fn read_identity(&mut self) -> Result<DeviceIdentity, ProtocolError> {
        self.device.record("identity");
        if !self.scanned {
            return Err(ProtocolError::NotScanned);
        }
        Ok(DeviceIdentity {
            manufacturer: "Mock".into(),
            model: "Simulator".into(),
            options: String::new(),
            version: "1.0".into(),
            serial_number: self.name.clone(),
        })
    }

    async fn read_point(&mut self, field: &String) -> Result<i64, ProtocolError> {
        self.device.record(format!("read:{}", field));
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }

        let now = self.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_reads.fetch_max(now, Ordering::SeqCst);
        let delay = *self.device.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active_reads.fetch_sub(1, Ordering::SeqCst);

        if self.device.failing_points.lock().unwrap().contains(field) {
            return Err(ProtocolError::Exception("illegal data address".into()));
        }
        Ok(self.device.value(field).unwrap_or_default())
    }

    async fn write_point(&mut self, field: &String, value: &i64) -> Result<(), ProtocolError> {
        self.device.record(format!("write:{}={}", field, value));
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }
        self.device.set_value(field, *value);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.device.record("close");
        self.connected = false;
        Ok(())
    }
}

/// What a callback observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub point: String,
    pub value: Option<i64>,
    pub fresh: bool,
}

/// Shared log of callback invocations.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback appending every sample to this log.
    pub fn callback(&self) -> impl FnMut(&PointSample<'_, String, i64>) + Send + 'static {
        let seen = self.seen.clone();
        move |sample: &PointSample<'_, String, i64>| {
            seen.lock().unwrap().push(Seen {
                point: sample.point.to_string(),
                value: sample.value.copied(),
                fresh: sample.fresh,
            });
        }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    /// Points seen, in invocation order.
    pub fn points(&self) -> Vec<String> {
        self.seen().into_iter().map(|s| s.point).collect()
    }

    /// Points of one device seen, in invocation order.
    pub fn points_of(&self, device: &str) -> Vec<String> {
        let prefix = format!("{}.", device);
        self.points()
            .into_iter()
            .filter(|p| p.starts_with(&prefix))
            .collect()
    }
}

/// Two primaries and one auxiliary group, with short retry budgets.
pub fn fleet_config() -> FleetConfig {
    let mut config = FleetConfig::new("127.0.0.1", 502)
        .with_device("inverter", 8)
        .with_device("battery", 2)
        .with_group("pv_link", vec![3]);
    config.connect_attempts = 2;
    config.scan_attempts = 3;
    config.read_attempts = 3;
    config
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sunfleet_core=debug")
        .with_test_writer()
        .try_init();
}
