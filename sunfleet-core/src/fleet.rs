//! The fleet controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{DeviceEndpoint, FleetConfig, RetryPolicy};
use crate::connection;
use crate::device::{DeviceHandle, SharedDevice};
use crate::error::{FleetError, Result};
use crate::point::{Point, PointSample};
use crate::protocol::{DeviceIdentity, ProtocolClient};
use crate::registry::{PointCallback, WatchRegistry};
use crate::scanner;
use crate::scheduler::{self, PollSummary};

/// Result of [`Fleet::init`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitSummary {
    /// Devices whose scan succeeded.
    pub scanned: Vec<String>,
    /// Devices left unscanned after exhausting their attempts.
    pub unscanned: Vec<String>,
}

/// Owns every device of the fleet and the watches on their points.
///
/// Register watches first (`&mut self`), then share the fleet (e.g. behind
/// an `Arc`) and drive it with [`poll`](Self::poll),
/// [`poll_one`](Self::poll_one) and [`write_point`](Self::write_point).
///
/// # Example
///
/// ```ignore
/// let mut fleet = Fleet::new(&config, SunSpecClient::new)?;
/// fleet.init().await;
///
/// let soc = fleet.point("battery", SunSpecField::uint16(802, 0, 8))?;
/// fleet.watch_point(soc, |sample| println!("{:?}", sample.value))?;
///
/// loop {
///     fleet.poll().await;
///     tokio::time::sleep(period).await;
/// }
/// ```
pub struct Fleet<C: ProtocolClient> {
    devices: HashMap<String, SharedDevice<C>>,
    order: Vec<String>,
    registry: WatchRegistry<C::Field, C::Value>,
    policy: RetryPolicy,
    workers: Arc<Semaphore>,
    cycle: Mutex<()>,
}

impl<C: ProtocolClient> Fleet<C> {
    /// Validate `config` and create one client per device with `connector`.
    ///
    /// Nothing is connected yet; call [`init`](Self::init).
    pub fn new<F>(config: &FleetConfig, mut connector: F) -> Result<Self>
    where
        F: FnMut(&DeviceEndpoint) -> C,
    {
        let endpoints = config.endpoints()?;
        let workers = config.worker_count(endpoints.len());

        let mut devices = HashMap::with_capacity(endpoints.len());
        let mut order = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            info!(
                device = %endpoint.name,
                address = %endpoint.address(),
                unit_id = endpoint.unit_id,
                "Configured device"
            );
            let client = connector(&endpoint);
            let name = endpoint.name.clone();
            let handle = DeviceHandle::new(endpoint, client).into_shared();
            let previous = devices.insert(name.clone(), handle);
            debug_assert!(previous.is_none(), "endpoints() yields unique names");
            order.push(name);
        }

        Ok(Self {
            devices,
            order,
            registry: WatchRegistry::new(),
            policy: config.retry_policy(),
            workers: Arc::new(Semaphore::new(workers)),
            cycle: Mutex::new(()),
        })
    }

    /// Connect and scan every device concurrently.
    ///
    /// Never fails. Devices that could not be scanned stay in the fleet;
    /// reads on them keep failing and being logged.
    pub async fn init(&self) -> InitSummary {
        let start = Instant::now();
        let policy = self.policy;

        let jobs = self
            .order
            .iter()
            .map(|name| {
                let device = self.devices[name].clone();
                (name.clone(), async move {
                    let mut guard = device.lock().await;
                    scanner::scan(&mut *guard, &policy).await.is_some()
                })
            })
            .collect();

        let mut summary = InitSummary::default();
        for (name, result) in scheduler::fan_out(jobs, &self.workers).await {
            match result {
                Ok(true) => summary.scanned.push(name),
                Ok(false) => summary.unscanned.push(name),
                Err(e) => {
                    error!(device = %name, error = %e, "Failed to scan");
                    summary.unscanned.push(name);
                }
            }
        }

        info!(
            scanned = summary.scanned.len(),
            unscanned = summary.unscanned.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fleet initialized"
        );
        summary
    }

    /// Resolve a point handle for a field of a configured device.
    pub fn point(&self, device: &str, field: C::Field) -> Result<Point<C::Field>> {
        if !self.devices.contains_key(device) {
            return Err(FleetError::UnknownDevice(device.to_string()));
        }
        Ok(Point::new(device, field))
    }

    /// Watch a point, replacing any callback it already has.
    pub fn watch_point<F>(&mut self, point: Point<C::Field>, callback: F) -> Result<()>
    where
        F: FnMut(&PointSample<'_, C::Field, C::Value>) + Send + 'static,
    {
        self.check_device(point.device())?;
        self.registry.watch(point, Box::new(callback));
        Ok(())
    }

    /// Watch several points at once.
    pub fn watch_points<I>(&mut self, points: I) -> Result<()>
    where
        I: IntoIterator<Item = (Point<C::Field>, PointCallback<C::Field, C::Value>)>,
    {
        for (point, callback) in points {
            self.check_device(point.device())?;
            self.registry.watch(point, callback);
        }
        Ok(())
    }

    /// Read every watched point once, all devices in parallel.
    ///
    /// Cycles never overlap: a second caller waits for the running cycle.
    /// Dropping the returned future cancels the device reads still in
    /// flight, so nothing outlives the cycle.
    pub async fn poll(&self) -> PollSummary {
        let _cycle = self.cycle.lock().await;
        scheduler::poll_all(&self.devices, &self.registry, self.policy, &self.workers).await
    }

    /// Re-read one watched point now and run its callback.
    ///
    /// Fails with [`FleetError::NotWatched`], before touching the network,
    /// if the point has no callback. The read is attempted once.
    pub async fn poll_one(&self, point: &Point<C::Field>) -> Result<()> {
        let entry = self.registry.lookup(point)?;
        let device = self.device(point.device())?;
        scheduler::poll_point(device, &entry, self.policy).await
    }

    /// Write a value to a point. Not retried; the error goes to the caller.
    pub async fn write_point(&self, point: &Point<C::Field>, value: &C::Value) -> Result<()> {
        let device = self.device(point.device())?;
        let mut guard = device.lock().await;
        let device = &mut *guard;

        connection::connect(device, self.policy.connect_attempts).await;

        info!(point = %point, value = ?value, "Writing");
        device
            .client_mut()
            .write_point(point.field(), value)
            .await
            .map_err(|source| FleetError::Write {
                point: point.to_string(),
                source,
            })
    }

    /// Identity found by the scan, if the device has been scanned.
    pub async fn identity(&self, device: &str) -> Option<DeviceIdentity> {
        let device = self.devices.get(device)?;
        device.lock().await.identity().cloned()
    }

    /// Configured device names, primaries first.
    pub fn device_names(&self) -> &[String] {
        &self.order
    }

    /// The watch registry.
    pub fn registry(&self) -> &WatchRegistry<C::Field, C::Value> {
        &self.registry
    }

    /// Close every device. Best effort; never fails.
    pub async fn close(&self) {
        info!("Closing all devices");
        for name in &self.order {
            let mut device = self.devices[name].lock().await;
            match device.client_mut().close().await {
                Ok(()) => debug!(device = %name, "Closed"),
                Err(e) => warn!(device = %name, error = %e, "Error closing device"),
            }
        }
    }

    fn device(&self, name: &str) -> Result<&SharedDevice<C>> {
        self.devices
            .get(name)
            .ok_or_else(|| FleetError::UnknownDevice(name.to_string()))
    }

    fn check_device(&self, name: &str) -> Result<()> {
        self.device(name).map(|_| ())
    }
}
