//! SunSpec client over Modbus TCP.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sunfleet_core::{DeviceEndpoint, DeviceIdentity, ProtocolClient, ProtocolError};
use tokio::time::error::Elapsed;
use tokio_modbus::client::{Context, Reader, Writer, tcp};
use tokio_modbus::prelude::Slave;
use tracing::debug;

use crate::field::SunSpecField;
use crate::layout::{self, Layout, RegisterSource};
use crate::value::{self, SunSpecValue};

/// One SunSpec device behind a Modbus TCP gateway.
///
/// The Modbus context is dropped on any transport failure or timeout, so
/// [`is_connected`](ProtocolClient::is_connected) turns false and the
/// fleet reconnects before the next request.
pub struct SunSpecClient {
    endpoint: DeviceEndpoint,
    ctx: Option<Context>,
    layout: Option<Layout>,
    /// Model blocks loaded by an eager scan, keyed by (model id, instance).
    blocks: HashMap<(u16, u16), Vec<u16>>,
}

impl SunSpecClient {
    pub fn new(endpoint: &DeviceEndpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            ctx: None,
            layout: None,
            blocks: HashMap::new(),
        }
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    /// Model chain found by the last scan.
    pub fn layout(&self) -> Option<&Layout> {
        self.layout.as_ref()
    }

    /// Value of `field` as loaded by the last eager scan, without a request.
    pub fn cached(&self, field: &SunSpecField) -> Option<SunSpecValue> {
        let block = self.blocks.get(&(field.model, field.instance))?;
        let start = usize::from(field.offset);
        let regs = block.get(start..start + usize::from(field.len()))?;
        value::decode(field.kind, regs).ok()
    }

    fn timeout(&self) -> Duration {
        self.endpoint.timeout
    }

    fn context(&mut self) -> Result<&mut Context, ProtocolError> {
        self.ctx.as_mut().ok_or(ProtocolError::NotConnected)
    }

    /// Map a timed Modbus response, dropping the context on transport failure.
    fn settle<T>(
        &mut self,
        response: Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T, ProtocolError> {
        match response {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(code))) => Err(ProtocolError::Exception(format!("{:?}", code))),
            Ok(Err(e)) => {
                self.ctx = None;
                Err(ProtocolError::Transport(e.to_string()))
            }
            Err(_) => {
                self.ctx = None;
                Err(ProtocolError::Timeout(self.timeout()))
            }
        }
    }

    fn located(&self, field: &SunSpecField) -> Result<u16, ProtocolError> {
        self.layout
            .as_ref()
            .ok_or(ProtocolError::NotScanned)?
            .address(field)
    }

    async fn load_blocks(&mut self) -> Result<(), ProtocolError> {
        let models = match &self.layout {
            Some(layout) => layout.models.clone(),
            None => return Err(ProtocolError::NotScanned),
        };
        self.blocks.clear();
        for model in models {
            let regs = layout::read_block(self, model.data_start(), model.len).await?;
            self.blocks.insert((model.id, model.instance), regs);
        }
        Ok(())
    }
}

#[async_trait]
impl RegisterSource for SunSpecClient {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, ProtocolError> {
        let timeout = self.timeout();
        let ctx = self.context()?;
        let response = tokio::time::timeout(timeout, ctx.read_holding_registers(address, count)).await;
        self.settle(response)
    }
}

#[async_trait]
impl ProtocolClient for SunSpecClient {
    type Field = SunSpecField;
    type Value = SunSpecValue;

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.ctx = None;
        let timeout = self.timeout();
        let address = self.endpoint.address();

        let socket_addr = tokio::time::timeout(timeout, tokio::net::lookup_host(&address))
            .await
            .map_err(|_| ProtocolError::Timeout(timeout))?
            .map_err(|e| ProtocolError::Transport(format!("Invalid address {}: {}", address, e)))?
            .next()
            .ok_or_else(|| ProtocolError::Transport(format!("No address for {}", address)))?;

        let ctx = tokio::time::timeout(
            timeout,
            tcp::connect_slave(socket_addr, Slave(self.endpoint.unit_id)),
        )
        .await
        .map_err(|_| ProtocolError::Timeout(timeout))?
        .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        debug!(device = %self.endpoint.name, address = %socket_addr, "Modbus context open");
        self.ctx = Some(ctx);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn scan(&mut self, eager: bool) -> Result<(), ProtocolError> {
        let found = layout::discover(self).await?;
        debug!(
            device = %self.endpoint.name,
            base = found.base,
            models = found.models.len(),
            "Discovered SunSpec layout"
        );
        self.layout = Some(found);
        if eager {
            self.load_blocks().await?;
        }
        Ok(())
    }

    async fn read_identity(&mut self) -> Result<DeviceIdentity, ProtocolError> {
        let found = self.layout.clone().ok_or(ProtocolError::NotScanned)?;
        layout::read_identity(self, &found).await
    }

    async fn read_point(&mut self, field: &SunSpecField) -> Result<SunSpecValue, ProtocolError> {
        let address = self.located(field)?;
        let regs = layout::read_block(self, address, field.len()).await?;
        value::decode(field.kind, &regs)
    }

    async fn write_point(
        &mut self,
        field: &SunSpecField,
        value: &SunSpecValue,
    ) -> Result<(), ProtocolError> {
        let address = self.located(field)?;
        let regs = value::encode(field.kind, value)?;
        let timeout = self.timeout();
        let ctx = self.context()?;
        let response =
            tokio::time::timeout(timeout, ctx.write_multiple_registers(address, &regs)).await;
        self.settle(response)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        // Dropping the context closes the socket.
        self.ctx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PointKind;

    fn endpoint() -> DeviceEndpoint {
        DeviceEndpoint {
            name: "battery".into(),
            host: "127.0.0.1".into(),
            port: 1,
            unit_id: 2,
            timeout: Duration::from_millis(200),
            group: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requests_without_connection() {
        let mut client = SunSpecClient::new(&endpoint());

        assert!(!client.is_connected());
        assert!(matches!(
            client.scan(false).await,
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(
            client.read_identity().await,
            Err(ProtocolError::NotScanned)
        ));
        assert!(matches!(
            client.read_point(&SunSpecField::uint16(802, 0, 8)).await,
            Err(ProtocolError::NotScanned)
        ));
        assert!(client.close().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_refused() {
        let mut client = SunSpecClient::new(&endpoint());

        let err = client.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Transport(_) | ProtocolError::Timeout(_)
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_cached_values() {
        let mut client = SunSpecClient::new(&endpoint());
        client.blocks.insert((802, 0), vec![0, 0, 0, 0, 0, 0, 0, 0, 870, 0xFFFF]);

        assert_eq!(
            client.cached(&SunSpecField::uint16(802, 0, 8)),
            Some(SunSpecValue::Unsigned(870))
        );
        assert_eq!(
            client.cached(&SunSpecField::uint16(802, 0, 9)),
            Some(SunSpecValue::NotImplemented)
        );
        assert_eq!(
            client.cached(&SunSpecField::new(802, 0, 9, PointKind::Uint32)),
            None
        );
        assert_eq!(client.cached(&SunSpecField::uint16(124, 0, 0)), None);
    }
}
