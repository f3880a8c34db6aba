//! Ownership wrapper around one protocol client.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::DeviceEndpoint;
use crate::protocol::{DeviceIdentity, ProtocolClient};

/// A device handle shared between the fleet and its read tasks.
pub type SharedDevice<C> = Arc<Mutex<DeviceHandle<C>>>;

/// One device of the fleet: its endpoint, its client and what the scan found.
pub struct DeviceHandle<C: ProtocolClient> {
    endpoint: DeviceEndpoint,
    client: C,
    identity: Option<DeviceIdentity>,
}

impl<C: ProtocolClient> DeviceHandle<C> {
    /// Wrap a (not yet connected) client.
    pub fn new(endpoint: DeviceEndpoint, client: C) -> Self {
        Self {
            endpoint,
            client,
            identity: None,
        }
    }

    /// Device name, unique within the fleet.
    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Identity recorded by the last successful scan.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn is_scanned(&self) -> bool {
        self.identity.is_some()
    }

    pub(crate) fn set_identity(&mut self, identity: DeviceIdentity) {
        self.identity = Some(identity);
    }

    pub(crate) fn into_shared(self) -> SharedDevice<C> {
        Arc::new(Mutex::new(self))
    }
}

impl<C: ProtocolClient> std::fmt::Debug for DeviceHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("identity", &self.identity)
            .finish()
    }
}
