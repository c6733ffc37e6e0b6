use std::time::Duration;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::types::{Device, Handle, ServiceInfo, TransportEvent};
use crate::error::TransportError;

pub mod connection;
pub mod constants;
pub mod types;

/// The BLE stack the session drives. Every method is only ever called from the session worker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Listen for advertisements for `duration` and report what was seen.
    async fn discover(&self, duration: Duration) -> Result<Vec<Device>, TransportError>;

    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Enumerate services of the connected peripheral, assigning fresh handles to every characteristic.
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError>;

    async fn read(&self, handle: Handle) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, handle: Handle, payload: &[u8], with_response: bool) -> Result<(), TransportError>;

    async fn subscribe(&self, handle: Handle) -> Result<(), TransportError>;

    async fn unsubscribe(&self, handle: Handle) -> Result<(), TransportError>;

    /// Notifications and link loss for the current connection. Ends when the connection does.
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError>;
}
