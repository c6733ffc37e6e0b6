use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::Transport;
use crate::device::types::{Capability, CapabilitySet, CharacteristicInfo, Device, Handle, ServiceInfo, TransportEvent};
use crate::error::TransportError;
use crate::sim::status_feed::status_feed_task;

/// Handles of consecutive connections start this far apart.
const HANDLE_STRIDE: Handle = 0x100;

pub const SIM_SERVICE: &str = "0000fff0-0000-1000-8000-00805f9b34fb";
pub const SIM_STATUS_CHARACTERISTIC: &str = "0000fff1-0000-1000-8000-00805f9b34fb";
pub const SIM_ECHO_CHARACTERISTIC: &str = "0000fff2-0000-1000-8000-00805f9b34fb";
pub const SIM_COMMAND_CHARACTERISTIC: &str = "0000fff3-0000-1000-8000-00805f9b34fb";

#[derive(Debug, Clone)]
struct SimService {
    uuid: String,
    characteristics: Vec<(String, CapabilitySet)>,
}

#[derive(Default)]
struct SimState {
    connected: Option<String>,
    connections: u16,
    handles: HashMap<Handle, String>,
    values: HashMap<String, Vec<u8>>,
    subscribed: HashSet<Handle>,
    listeners: Vec<UnboundedSender<TransportEvent>>,
    feeds: HashMap<Handle, CancellationToken>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    scanned: bool,
    // applied before service discovery, reads and writes
    operation_delay: Option<Duration>,
}

/// In-process peripheral that behaves like a real transport: handles change on every connection,
/// written values are echoed back on read, and notifications or link loss can be injected.
#[derive(Clone)]
pub struct SimTransport {
    devices: Vec<Device>,
    services: Vec<SimService>,
    fail_connect: bool,
    fail_unsubscribe: bool,
    require_scan: bool,
    connect_delay: Option<Duration>,
    feed_interval: Option<Duration>,
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    pub fn new(devices: Vec<Device>) -> Self {
        SimTransport {
            devices,
            services: Vec::new(),
            fail_connect: false,
            fail_unsubscribe: false,
            require_scan: false,
            connect_delay: None,
            feed_interval: None,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// A single status board peripheral that streams status frames while subscribed.
    pub fn demo() -> Self {
        let read_notify: CapabilitySet = [Capability::Read, Capability::Notify].into_iter().collect();
        let read_write: CapabilitySet = [Capability::Read, Capability::Write].into_iter().collect();

        SimTransport::new(vec![
            Device::new("SIM:00:00:00:00:01", Some(String::from("Sim Status Board")), Some(-48)),
            Device::new("SIM:00:00:00:00:02", None, Some(-80)),
        ])
            .with_service(SIM_SERVICE, vec![
                (SIM_STATUS_CHARACTERISTIC, read_notify),
                (SIM_ECHO_CHARACTERISTIC, read_write),
                (SIM_COMMAND_CHARACTERISTIC, CapabilitySet::empty().with(Capability::WriteWithoutResponse)),
            ])
            .with_feed(Duration::from_millis(200))
    }

    pub fn with_service(mut self, uuid: &str, characteristics: Vec<(&str, CapabilitySet)>) -> Self {
        self.services.push(SimService {
            uuid: uuid.to_string(),
            characteristics: characteristics.into_iter().map(|(uuid, caps)| (uuid.to_string(), caps)).collect(),
        });
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_unsubscribe_failure(mut self) -> Self {
        self.fail_unsubscribe = true;
        self
    }

    /// Only addresses reported by a scan can be connected to, like a real adapter.
    pub fn with_scan_required(mut self) -> Self {
        self.require_scan = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Emit a status frame every `interval` on each subscribed characteristic.
    pub fn with_feed(mut self, interval: Duration) -> Self {
        self.feed_interval = Some(interval);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // a panic while holding the lock only happens inside a failing test
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stall service discovery, reads and writes by `delay` until set back to `None`.
    pub fn set_operation_delay(&self, delay: Option<Duration>) {
        self.lock().operation_delay = delay;
    }

    async fn stall(&self) {
        let delay = self.lock().operation_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }
    }

    fn uuid_for(&self, handle: Handle) -> Result<String, TransportError> {
        let state = self.lock();
        if state.connected.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.handles.get(&handle).cloned().ok_or(TransportError::UnknownHandle(handle))
    }

    /// Current handle of `uuid`, if the characteristic was discovered on this connection.
    pub fn handle_of(&self, uuid: &str) -> Option<Handle> {
        let state = self.lock();
        state.handles.iter().find(|(_, u)| u.as_str() == uuid).map(|(handle, _)| *handle)
    }

    pub fn emit(&self, event: TransportEvent) {
        let mut state = self.lock();
        state.listeners.retain(|listener| listener.unbounded_send(event.clone()).is_ok());
    }

    pub fn notify_handle(&self, handle: Handle, payload: Vec<u8>) {
        self.emit(TransportEvent::Notification { handle, payload });
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self) {
        {
            let mut state = self.lock();
            state.connected = None;
            state.subscribed.clear();
            for (_, cancel) in state.feeds.drain() {
                cancel.cancel();
            }
        }
        self.emit(TransportEvent::Disconnected);
    }

    pub fn set_value(&self, uuid: &str, value: Vec<u8>) {
        self.lock().values.insert(uuid.to_string(), value);
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscribed.len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.lock().unsubscribe_calls
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn discover(&self, duration: Duration) -> Result<Vec<Device>, TransportError> {
        sleep(duration.min(Duration::from_millis(10))).await;
        self.lock().scanned = true;
        Ok(self.devices.clone())
    }

    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        if let Some(delay) = self.connect_delay {
            sleep(delay).await;
        }
        if self.fail_connect {
            return Err(TransportError::Other(String::from("simulated connection failure")));
        }
        let known = self.devices.iter().any(|device| device.address == address);
        if !known || (self.require_scan && !self.lock().scanned) {
            return Err(TransportError::UnknownDevice(address.to_string()));
        }

        let mut state = self.lock();
        state.connected = Some(address.to_string());
        state.connections += 1;
        state.handles.clear();
        state.subscribed.clear();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connected = None;
        state.subscribed.clear();
        state.listeners.clear();
        for (_, cancel) in state.feeds.drain() {
            cancel.cancel();
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        self.stall().await;
        let mut state = self.lock();
        if state.connected.is_none() {
            return Err(TransportError::NotConnected);
        }

        let mut next = state.connections.wrapping_mul(HANDLE_STRIDE).wrapping_add(1);
        state.handles.clear();

        let mut services = Vec::new();
        for service in &self.services {
            let mut characteristics = Vec::new();
            for (uuid, capabilities) in &service.characteristics {
                state.handles.insert(next, uuid.clone());
                characteristics.push(CharacteristicInfo { uuid: uuid.clone(), handle: next, capabilities: *capabilities });
                next = next.wrapping_add(1);
            }
            services.push(ServiceInfo { uuid: service.uuid.clone(), characteristics });
        }
        Ok(services)
    }

    async fn read(&self, handle: Handle) -> Result<Vec<u8>, TransportError> {
        self.stall().await;
        let uuid = self.uuid_for(handle)?;
        Ok(self.lock().values.get(&uuid).cloned().unwrap_or_default())
    }

    async fn write(&self, handle: Handle, payload: &[u8], with_response: bool) -> Result<(), TransportError> {
        self.stall().await;
        let uuid = self.uuid_for(handle)?;
        debug!("Simulated write to {} (response: {})", uuid, with_response);
        self.lock().values.insert(uuid, payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, handle: Handle) -> Result<(), TransportError> {
        self.uuid_for(handle)?;
        let mut state = self.lock();
        state.subscribe_calls += 1;
        state.subscribed.insert(handle);

        if let Some(interval) = self.feed_interval {
            if !state.feeds.contains_key(&handle) {
                let cancel = CancellationToken::new();
                state.feeds.insert(handle, cancel.clone());
                status_feed_task(cancel, self.clone(), handle, interval);
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, handle: Handle) -> Result<(), TransportError> {
        self.uuid_for(handle)?;
        let mut state = self.lock();
        state.unsubscribe_calls += 1;
        if self.fail_unsubscribe {
            return Err(TransportError::Other(String::from("simulated unsubscribe failure")));
        }
        state.subscribed.remove(&handle);
        if let Some(cancel) = state.feeds.remove(&handle) {
            cancel.cancel();
        }
        Ok(())
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        let (tx, rx) = unbounded();
        self.lock().listeners.push(tx);
        Ok(rx.boxed())
    }
}
