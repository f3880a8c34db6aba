//! One-time discovery of a device's register layout and identity.

use tracing::{error, info, warn};

use crate::config::RetryPolicy;
use crate::connection;
use crate::device::DeviceHandle;
use crate::error::ProtocolError;
use crate::protocol::{DeviceIdentity, ProtocolClient};

/// Scan a device, retrying with a forced reconnect after each failure.
///
/// The layout is discovered lazily (no eager register load), then the
/// identity block is read to confirm the scan. On success the identity is
/// stored on the handle and returned. After `policy.scan_attempts`
/// failures the error is logged and `None` is returned; the device stays
/// usable but unscanned.
pub async fn scan<C: ProtocolClient>(
    device: &mut DeviceHandle<C>,
    policy: &RetryPolicy,
) -> Option<DeviceIdentity> {
    connection::connect(device, policy.connect_attempts).await;

    let mut last_error = None;
    for attempt in 1..=policy.scan_attempts {
        match scan_once(device).await {
            Ok(identity) => {
                info!(
                    device = %device.name(),
                    manufacturer = %identity.manufacturer,
                    model = %identity.model,
                    serial = %identity.serial_number,
                    version = %identity.version,
                    "Scanned"
                );
                device.set_identity(identity.clone());
                return Some(identity);
            }
            Err(e) => {
                warn!(
                    device = %device.name(),
                    attempt,
                    max_attempts = policy.scan_attempts,
                    error = %e,
                    "Error scanning"
                );
                last_error = Some(e);
                connection::force_reconnect(device, policy.connect_attempts).await;
            }
        }
    }

    if let Some(e) = last_error {
        error!(device = %device.name(), error = %e, "Giving up scanning device");
    }
    None
}

async fn scan_once<C: ProtocolClient>(
    device: &mut DeviceHandle<C>,
) -> Result<DeviceIdentity, ProtocolError> {
    let client = device.client_mut();
    client.scan(false).await?;
    client.read_identity().await
}
