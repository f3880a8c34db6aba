//! Bounded connect and reconnect.
//!
//! Connection failures are never fatal: they are logged and the caller
//! carries on. The next operation on the device finds it disconnected and
//! tries again.

use tracing::{debug, info, warn};

use crate::device::DeviceHandle;
use crate::protocol::ProtocolClient;

/// Ensure the device is connected, trying up to `max_attempts` times.
///
/// Returns immediately if already connected. Returns whether the device
/// ended up connected.
pub async fn connect<C: ProtocolClient>(device: &mut DeviceHandle<C>, max_attempts: u32) -> bool {
    if device.is_connected() {
        return true;
    }
    establish(device, max_attempts).await
}

/// Drop the current connection and open a new one, even if the client
/// believes it is still connected.
pub async fn force_reconnect<C: ProtocolClient>(
    device: &mut DeviceHandle<C>,
    max_attempts: u32,
) -> bool {
    if let Err(e) = device.client_mut().close().await {
        debug!(device = %device.name(), error = %e, "Error closing stale connection");
    }
    establish(device, max_attempts).await
}

async fn establish<C: ProtocolClient>(device: &mut DeviceHandle<C>, max_attempts: u32) -> bool {
    for attempt in 1..=max_attempts {
        match device.client_mut().connect().await {
            Ok(()) => {
                info!(
                    device = %device.name(),
                    address = %device.endpoint().address(),
                    unit_id = device.endpoint().unit_id,
                    "Connected"
                );
                return true;
            }
            Err(e) => {
                warn!(
                    device = %device.name(),
                    attempt,
                    max_attempts,
                    error = %e,
                    "Error connecting"
                );
            }
        }
    }
    false
}
