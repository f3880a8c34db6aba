//! Concurrent poll scheduling.
//!
//! One task per device, all devices in parallel, bounded by a shared
//! semaphore. Points of one device are read sequentially in registration
//! order because a device connection carries one request at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::connection;
use crate::device::{DeviceHandle, SharedDevice};
use crate::error::{FleetError, Result};
use crate::point::Point;
use crate::protocol::ProtocolClient;
use crate::registry::{WatchEntry, WatchRegistry};

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Devices with at least one watched point.
    pub devices: usize,
    /// Points whose read succeeded.
    pub points_read: usize,
    /// Points whose read failed or whose device was unreachable.
    pub points_failed: usize,
    /// Devices that could not be connected or whose task panicked.
    pub devices_failed: usize,
    /// Wall-clock duration of the cycle.
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct DeviceOutcome {
    connected: bool,
    read: usize,
    failed: usize,
}

/// Run every job on its own task, at most `workers` permits at a time, and
/// wait for all of them.
///
/// Results come back in submission order, each tagged with its name. A
/// panicking job yields its `JoinError` instead of propagating. Dropping the
/// returned future aborts every job still running.
pub(crate) async fn fan_out<T, Fut>(
    jobs: Vec<(String, Fut)>,
    workers: &Arc<Semaphore>,
) -> Vec<(String, std::result::Result<T, JoinError>)>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let mut tasks = AbortOnDrop(Vec::with_capacity(jobs.len()));
    for (name, job) in jobs {
        let workers = workers.clone();
        let handle = tokio::spawn(async move {
            let _permit = workers.acquire_owned().await.ok();
            job.await
        });
        tasks.0.push((name, handle));
    }

    let mut results = Vec::with_capacity(tasks.0.len());
    for (name, handle) in tasks.0.iter_mut() {
        results.push((name.clone(), handle.await));
    }
    results
}

/// Spawned jobs of one fan-out, aborted when the owner goes away.
struct AbortOnDrop<T>(Vec<(String, JoinHandle<T>)>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

/// Read every watched point on every device once.
///
/// Never fails: unreachable devices, failed reads and panicking callbacks
/// are logged and counted in the summary.
pub async fn poll_all<C: ProtocolClient>(
    devices: &HashMap<String, SharedDevice<C>>,
    registry: &WatchRegistry<C::Field, C::Value>,
    policy: RetryPolicy,
    workers: &Arc<Semaphore>,
) -> PollSummary {
    let start = Instant::now();
    debug!(points = registry.len(), "Polling points");

    let mut jobs = Vec::new();
    for (name, entries) in registry.devices() {
        let Some(device) = devices.get(name) else {
            warn!(device = %name, "Watched device is not part of the fleet");
            continue;
        };
        let device = device.clone();
        let entries = entries.to_vec();
        jobs.push((
            name.to_string(),
            async move { read_device(device, entries, policy).await },
        ));
    }

    let mut summary = PollSummary {
        devices: jobs.len(),
        ..Default::default()
    };

    for (name, result) in fan_out(jobs, workers).await {
        match result {
            Ok(outcome) => {
                summary.points_read += outcome.read;
                summary.points_failed += outcome.failed;
                if !outcome.connected {
                    summary.devices_failed += 1;
                }
            }
            Err(e) => {
                error!(device = %name, error = %e, "Failed to read device");
                summary.devices_failed += 1;
            }
        }
    }

    summary.elapsed = start.elapsed();
    debug!(
        devices = summary.devices,
        read = summary.points_read,
        failed = summary.points_failed,
        elapsed_ms = summary.elapsed.as_secs_f64() * 1000.0,
        "Polled points"
    );
    summary
}

/// Read one device's watched points in order, running each callback right
/// after its read.
async fn read_device<C: ProtocolClient>(
    device: SharedDevice<C>,
    entries: Vec<Arc<WatchEntry<C::Field, C::Value>>>,
    policy: RetryPolicy,
) -> DeviceOutcome {
    let mut guard = device.lock().await;
    let device = &mut *guard;

    if !connection::connect(device, policy.connect_attempts).await {
        warn!(
            device = %device.name(),
            points = entries.len(),
            "Device unreachable, skipping its points this cycle"
        );
        return DeviceOutcome {
            connected: false,
            read: 0,
            failed: entries.len(),
        };
    }

    let mut outcome = DeviceOutcome {
        connected: true,
        ..Default::default()
    };
    for entry in &entries {
        // A failed point must not hold back its siblings.
        let value = read_with_retry(device, entry.point(), &policy).await;
        if value.is_some() {
            outcome.read += 1;
        } else {
            outcome.failed += 1;
        }
        entry.deliver(value);
    }
    outcome
}

async fn read_with_retry<C: ProtocolClient>(
    device: &mut DeviceHandle<C>,
    point: &Point<C::Field>,
    policy: &RetryPolicy,
) -> Option<C::Value> {
    for attempt in 1..=policy.read_attempts {
        match device.client_mut().read_point(point.field()).await {
            Ok(value) => {
                debug!(point = %point, value = ?value, "Read");
                return Some(value);
            }
            Err(e) => {
                warn!(
                    device = %device.name(),
                    point = %point,
                    attempt,
                    max_attempts = policy.read_attempts,
                    error = %e,
                    "Error reading"
                );
                connection::force_reconnect(device, policy.connect_attempts).await;
            }
        }
    }
    None
}

/// Read a single watched point once and run its callback.
///
/// Used right after a write; the read is not retried and its error is
/// returned to the caller instead of being delivered as a stale sample.
pub async fn poll_point<C: ProtocolClient>(
    device: &SharedDevice<C>,
    entry: &WatchEntry<C::Field, C::Value>,
    policy: RetryPolicy,
) -> Result<()> {
    let mut guard = device.lock().await;
    let device = &mut *guard;

    connection::connect(device, policy.connect_attempts).await;

    match device.client_mut().read_point(entry.point().field()).await {
        Ok(value) => {
            debug!(point = %entry.point(), value = ?value, "Re-read");
            entry.deliver(Some(value));
            Ok(())
        }
        Err(source) => {
            warn!(point = %entry.point(), error = %source, "Error re-reading");
            Err(FleetError::Read {
                point: entry.point().to_string(),
                source,
            })
        }
    }
}
