use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use futures::stream::BoxStream;
use futures::StreamExt;
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::Timeouts;
use crate::device::Transport;
use crate::device::types::{Handle, TransportEvent};
use crate::error::{ConnectError, DiscoveryError, NotifyError, ReadError, TransportError, WriteError};
use crate::events::{EventSink, SessionEvent};
use crate::notify::history::payload_line;
use crate::pipeline::ValuePipeline;
use crate::session::index::{canonical_uuid, CharacteristicDescriptor, CharacteristicIndex, SharedIndex};
use crate::session::state::{ConnectionInfo, DiscoveryOutcome, SessionState, SharedState};

pub type SessionRef = Arc<Mutex<Session>>;

/// Run `fut`, giving up after `deadline`.
async fn within<F: Future>(deadline: Duration, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = sleep(deadline) => None,
        result = fut => Some(result),
    }
}

/// The one connection a session may have, its characteristic index and its subscriptions.
///
/// Lives on the worker; the control thread reaches it only through submitted operations and reads
/// the published [`SharedIndex`] and [`SharedState`].
pub struct Session {
    transport: Arc<dyn Transport>,
    index: SharedIndex,
    state: SharedState,
    pipeline: Arc<ValuePipeline>,
    events: EventSink,
    timeouts: Timeouts,
    cancel: CancellationToken,
    // uuid => handle the subscription was issued with
    subscriptions: IndexMap<String, Handle>,
    focused: Option<String>,
    // bumped on every connection attempt so a stale link-loss signal is ignored
    generation: u64,
    pump: Option<CancellationToken>,
    this: Weak<Mutex<Session>>,
}

impl Session {
    pub fn new_shared(
        transport: Arc<dyn Transport>,
        index: SharedIndex,
        state: SharedState,
        pipeline: Arc<ValuePipeline>,
        events: EventSink,
        timeouts: Timeouts,
        cancel: CancellationToken,
    ) -> SessionRef {
        Arc::new_cyclic(|this| Mutex::new(Session {
            transport,
            index,
            state,
            pipeline,
            events,
            timeouts,
            cancel,
            subscriptions: IndexMap::new(),
            focused: None,
            generation: 0,
            pump: None,
            this: this.clone(),
        }))
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Characteristic whose subscription was most recently switched on, while that subscription lasts.
    pub fn focused(&self) -> Option<String> {
        self.focused.clone()
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    fn log_line(&self, uuid: Option<&str>, text: String) {
        self.pipeline.router().record_line(uuid, text);
    }

    fn lookup(&self, uuid: &str) -> Option<CharacteristicDescriptor> {
        self.index.snapshot().get(uuid).cloned()
    }

    pub async fn connect(&mut self, address: &str) -> Result<ConnectionInfo, ConnectError> {
        if !matches!(self.state.get(), SessionState::Idle { .. }) {
            info!("Already connected; disconnecting before connecting to {}", address);
            self.disconnect().await;
        }

        self.generation += 1;
        self.index.clear();
        self.state.set(SessionState::Connecting { address: address.to_string() });
        info!("Connecting to {}...", address);

        let failure = match within(self.timeouts.connect, self.open_link(address)).await {
            Some(Ok(())) => None,
            Some(Err(err)) => Some(ConnectError::Transport(err)),
            None => Some(ConnectError::Timeout),
        };
        if let Some(err) = failure {
            if matches!(err, ConnectError::Timeout) {
                self.abandon_link().await;
            }
            return Err(self.connect_failed(address, err));
        }

        // before discovery, so a link lost while discovering is not missed. The pump needs the
        // session lock to act on it, which it gets once this connect has finished.
        match self.transport.events().await {
            Ok(stream) => self.start_pump(stream),
            Err(err) => warn!("No event stream for {}; notifications and link loss will go unnoticed: {}", address, err),
        }

        info!("Connected; Discovering services...");
        let (index, discovery) = match self.discover().await {
            Ok(index) => {
                let services = index.service_count();
                (index, DiscoveryOutcome::Indexed { services })
            },
            Err(DiscoveryError::NoServices) => {
                self.log_line(None, String::from("No GATT services found."));
                (CharacteristicIndex::empty(), DiscoveryOutcome::NoServices)
            },
            Err(err) => {
                self.abandon_link().await;
                return Err(self.connect_failed(address, ConnectError::Discovery(err)));
            },
        };

        let characteristics = index.descriptors();
        self.index.publish(index);

        self.state.set(SessionState::Connected { address: address.to_string() });
        info!("Peripheral {} ready ({} characteristics)", address, characteristics.len());
        self.events.publish(SessionEvent::Connected { address: address.to_string() });
        self.events.publish(SessionEvent::CharacteristicsIndexed(characteristics.clone()));

        Ok(ConnectionInfo { address: address.to_string(), discovery, characteristics })
    }

    /// Connect, scanning once first when the transport has not seen `address` yet.
    async fn open_link(&self, address: &str) -> Result<(), TransportError> {
        match self.transport.connect(address).await {
            Err(TransportError::UnknownDevice(_)) => {
                info!("{} not seen yet; scanning for {:?} before retrying", address, self.timeouts.scan);
                self.transport.discover(self.timeouts.scan).await?;
                self.transport.connect(address).await
            },
            result => result,
        }
    }

    fn connect_failed(&mut self, address: &str, err: ConnectError) -> ConnectError {
        warn!("Connecting to {} failed: {}", address, err);
        self.stop_pump();
        self.log_line(None, format!("Connect failed: {}", err));
        self.index.clear();
        self.state.set(SessionState::Idle { last_error: Some(err.to_string()) });
        err
    }

    // best-effort teardown of a half-established link
    async fn abandon_link(&self) {
        match within(self.timeouts.operation, self.transport.disconnect()).await {
            Some(Ok(())) => {},
            Some(Err(err)) => debug!("Dropping half-open connection failed: {}", err),
            None => debug!("Dropping half-open connection took too long"),
        }
    }

    async fn discover(&self) -> Result<CharacteristicIndex, DiscoveryError> {
        let services = match within(self.timeouts.operation, self.transport.discover_services()).await {
            None => return Err(DiscoveryError::Timeout),
            Some(Err(err)) => return Err(DiscoveryError::Transport(err)),
            Some(Ok(services)) => services,
        };

        if services.is_empty() {
            return Err(DiscoveryError::NoServices);
        }

        for service in &services {
            self.log_line(None, format!("[Service] {}", canonical_uuid(&service.uuid)));
            for characteristic in &service.characteristics {
                self.log_line(None, format!(
                    "  [Char] {} (handle: {}, props: {})",
                    canonical_uuid(&characteristic.uuid),
                    characteristic.handle,
                    characteristic.capabilities,
                ));
            }
        }

        Ok(CharacteristicIndex::build(&services))
    }

    fn start_pump(&mut self, mut stream: BoxStream<'static, TransportEvent>) {
        self.stop_pump();

        let cancel = self.cancel.child_token();
        self.pump = Some(cancel.clone());
        let generation = self.generation;
        let pipeline = self.pipeline.clone();
        let session = self.this.clone();

        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    event = stream.next() => match event {
                        Some(TransportEvent::Notification { handle, payload }) => {
                            pipeline.handle_notification(handle, payload);
                        },
                        Some(TransportEvent::Disconnected) | None => {
                            if let Some(session) = session.upgrade() {
                                session.lock().await.handle_link_loss(generation);
                            }
                            break 'mainloop;
                        },
                    },
                }
            }
            debug!("Event pump for connection {} stopped", generation);
        });
    }

    fn stop_pump(&mut self) {
        if let Some(cancel) = self.pump.take() {
            cancel.cancel();
        }
    }

    /// The transport reported the link gone. Runs the same teardown as a requested disconnect,
    /// minus talking to the peripheral.
    pub fn handle_link_loss(&mut self, generation: u64) {
        if generation != self.generation || !self.state.get().is_connected() {
            debug!("Ignoring link loss of an earlier connection");
            return;
        }

        warn!("Connection lost");
        self.log_line(None, String::from("Connection lost"));
        self.stop_pump();
        self.teardown();
    }

    /// Unsubscribe (best effort), drop the link (best effort) and end up idle.
    pub async fn disconnect(&mut self) {
        let address = match self.state.get().address() {
            Some(address) => address.to_string(),
            None => return,
        };

        info!("Disconnecting from {}", address);
        self.state.set(SessionState::Disconnecting { address });
        self.stop_pump();

        let subscriptions = std::mem::take(&mut self.subscriptions);
        for (uuid, handle) in subscriptions {
            match within(self.timeouts.operation, self.transport.unsubscribe(handle)).await {
                Some(Ok(())) => debug!("Unsubscribed {} before disconnecting", uuid),
                Some(Err(err)) => warn!("Failed to unsubscribe {} during disconnect: {}", uuid, err),
                None => warn!("Unsubscribing {} during disconnect took too long", uuid),
            }
        }

        match within(self.timeouts.operation, self.transport.disconnect()).await {
            Some(Ok(())) => {},
            Some(Err(err)) => warn!("Disconnect reported an error: {}", err),
            None => warn!("Disconnect took too long"),
        }

        self.teardown();
    }

    fn teardown(&mut self) {
        self.subscriptions.clear();
        self.focused = None;
        self.index.clear();
        self.state.set(SessionState::Idle { last_error: None });
        info!("Disconnected");
        self.events.publish(SessionEvent::Disconnected);
    }

    pub async fn read(&mut self, uuid: &str) -> Result<Vec<u8>, ReadError> {
        let descriptor = self.lookup(uuid).ok_or_else(|| ReadError::UnknownCharacteristic(uuid.to_string()))?;
        let uuid = descriptor.uuid.as_str();
        if !descriptor.capabilities.can_read() {
            return Err(ReadError::NotReadable(uuid.to_string()));
        }

        match within(self.timeouts.operation, self.transport.read(descriptor.handle)).await {
            None => {
                self.log_line(Some(uuid), format!("[READ {}] Failed: timed out", uuid));
                Err(ReadError::Timeout)
            },
            Some(Err(err)) => {
                self.log_line(Some(uuid), format!("[READ {}] Failed: {}", uuid, err));
                Err(ReadError::Transport(err))
            },
            Some(Ok(data)) => {
                self.pipeline.router().record_read(uuid, &data);
                Ok(data)
            },
        }
    }

    /// Writes with response unless the characteristic only offers write-without-response.
    pub async fn write(&mut self, uuid: &str, payload: &[u8]) -> Result<(), WriteError> {
        let descriptor = self.lookup(uuid).ok_or_else(|| WriteError::UnknownCharacteristic(uuid.to_string()))?;
        let uuid = descriptor.uuid.as_str();
        if !descriptor.capabilities.can_write() {
            return Err(WriteError::NotWritable(uuid.to_string()));
        }

        let with_response = descriptor.capabilities.prefers_response();
        match within(self.timeouts.operation, self.transport.write(descriptor.handle, payload, with_response)).await {
            None => {
                self.log_line(Some(uuid), format!("[WRITE {}] Failed: timed out", uuid));
                Err(WriteError::Timeout)
            },
            Some(Err(err)) => {
                self.log_line(Some(uuid), format!("[WRITE {}] Failed: {}", uuid, err));
                Err(WriteError::Transport(err))
            },
            Some(Ok(())) => {
                self.log_line(Some(uuid), payload_line("WRITE", uuid, payload));
                Ok(())
            },
        }
    }

    async fn transport_call<F>(&self, fut: F) -> Result<(), TransportError>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        within(self.timeouts.operation, fut).await.unwrap_or(Err(TransportError::Timeout))
    }

    /// Subscriptions are issued by handle. Enabling an active subscription re-issues it, so there is
    /// never more than one per characteristic; disabling an inactive one does nothing.
    pub async fn set_notify(&mut self, uuid: &str, enabled: bool) -> Result<(), NotifyError> {
        let descriptor = self.lookup(uuid).ok_or_else(|| NotifyError::UnknownCharacteristic(uuid.to_string()))?;
        let uuid = descriptor.uuid.clone();

        if !enabled {
            let handle = match self.subscriptions.shift_remove(&uuid) {
                Some(handle) => handle,
                None => return Ok(()),
            };
            if self.focused.as_deref() == Some(uuid.as_str()) {
                self.focused = None;
            }

            return match self.transport_call(self.transport.unsubscribe(handle)).await {
                Ok(()) => {
                    self.log_line(Some(&uuid), format!("[NOTIFY {}] Unsubscribed", uuid));
                    Ok(())
                },
                Err(err) => {
                    self.log_line(Some(&uuid), format!("[NOTIFY {}] Failed to unsubscribe: {}", uuid, err));
                    Err(NotifyError::Transport(err))
                },
            };
        }

        if !descriptor.capabilities.can_subscribe() {
            return Err(NotifyError::NotNotifiable(uuid));
        }

        if let Some(previous) = self.subscriptions.shift_remove(&uuid) {
            if let Err(err) = self.transport_call(self.transport.unsubscribe(previous)).await {
                warn!("Failed to drop the previous subscription of {}: {}", uuid, err);
            }
        }

        match self.transport_call(self.transport.subscribe(descriptor.handle)).await {
            Ok(()) => {
                self.subscriptions.insert(uuid.clone(), descriptor.handle);
                self.focused = Some(uuid.clone());
                self.log_line(Some(&uuid), format!("[NOTIFY {}] Subscribed using handle {}", uuid, descriptor.handle));
                Ok(())
            },
            Err(err) => {
                self.log_line(Some(&uuid), format!("[NOTIFY {}] Failed to subscribe: {}", uuid, err));
                Err(NotifyError::Transport(err))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::device::types::{Capability, CapabilitySet, Device};
    use crate::events::{event_channel, EventReceiver};
    use crate::notify::NotificationRouter;
    use crate::series::LiveSeriesBuffer;
    use crate::sim::peripheral::{SIM_SERVICE, SIM_STATUS_CHARACTERISTIC};
    use crate::sim::SimTransport;

    const ADDRESS: &str = "SIM:01";

    fn session(sim: &SimTransport) -> (SessionRef, EventReceiver) {
        let (events, receiver) = event_channel(64);
        let index = SharedIndex::new();
        let router = Arc::new(NotificationRouter::new(index.clone(), None, 50, events.clone()));
        let series = LiveSeriesBuffer::new(100, Duration::from_millis(100));
        let pipeline = Arc::new(ValuePipeline::new(router, series, events.clone()));
        let session = Session::new_shared(
            Arc::new(sim.clone()),
            index,
            SharedState::default(),
            pipeline,
            events,
            Config::default().timeouts(),
            CancellationToken::new(),
        );
        (session, receiver)
    }

    fn sim() -> SimTransport {
        let caps: CapabilitySet = [Capability::Read, Capability::Notify].into_iter().collect();
        SimTransport::new(vec![Device::new(ADDRESS, None, None)])
            .with_service(SIM_SERVICE, vec![(SIM_STATUS_CHARACTERISTIC, caps)])
    }

    #[tokio::test]
    async fn within_gives_up_after_the_deadline() {
        assert_eq!(within(Duration::from_secs(1), async { 5 }).await, Some(5));
        assert_eq!(within(Duration::from_millis(5), sleep(Duration::from_secs(5))).await, None);
    }

    #[tokio::test]
    async fn link_loss_of_an_earlier_connection_is_ignored() {
        let sim = sim();
        let (session, mut receiver) = session(&sim);
        let mut session = session.lock().await;

        session.connect(ADDRESS).await.unwrap();
        session.connect(ADDRESS).await.unwrap();
        receiver.drain();

        session.handle_link_loss(1);
        assert!(session.state().is_connected());

        session.handle_link_loss(2);
        assert_eq!(session.state(), SessionState::Idle { last_error: None });
        let disconnects = receiver.drain().into_iter().filter(|event| matches!(event, SessionEvent::Disconnected)).count();
        assert_eq!(disconnects, 1);

        // already idle
        session.handle_link_loss(2);
        assert!(receiver.drain().iter().all(|event| !matches!(event, SessionEvent::Disconnected)));
    }

    #[tokio::test]
    async fn link_loss_during_discovery_is_not_missed() {
        let sim = sim();
        sim.set_operation_delay(Some(Duration::from_millis(200)));
        let (session, mut receiver) = session(&sim);

        let connecting = {
            let session = session.clone();
            spawn(async move { session.lock().await.connect(ADDRESS).await })
        };
        sleep(Duration::from_millis(50)).await;
        // the adapter reports the loss while services are still being enumerated
        sim.emit(TransportEvent::Disconnected);
        connecting.await.unwrap().unwrap();

        let settled = within(Duration::from_secs(2), async {
            while session.lock().await.state().is_connected() {
                sleep(Duration::from_millis(5)).await;
            }
        }).await;
        assert_eq!(settled, Some(()));
        assert_eq!(session.lock().await.state(), SessionState::Idle { last_error: None });

        let events = receiver.drain();
        let connected = events.iter().position(|event| matches!(event, SessionEvent::Connected { .. }));
        let disconnected = events.iter().position(|event| matches!(event, SessionEvent::Disconnected));
        assert!(connected.unwrap() < disconnected.unwrap());
    }

    #[tokio::test]
    async fn unseen_address_is_scanned_for_before_connecting() {
        let sim = sim().with_scan_required();
        let (session, _receiver) = session(&sim);
        let mut session = session.lock().await;

        session.connect(ADDRESS).await.unwrap();
        assert!(sim.is_connected());
        assert!(matches!(
            session.connect("SIM:FF").await,
            Err(ConnectError::Transport(TransportError::UnknownDevice(_)))
        ));
    }

    #[tokio::test]
    async fn subscriptions_are_issued_by_handle_and_dropped_on_disconnect() {
        let sim = sim();
        let (session, _receiver) = session(&sim);
        let mut session = session.lock().await;

        session.connect(ADDRESS).await.unwrap();
        session.set_notify(&SIM_STATUS_CHARACTERISTIC.to_ascii_uppercase(), true).await.unwrap();
        assert_eq!(session.active_subscriptions(), vec![SIM_STATUS_CHARACTERISTIC.to_string()]);
        assert_eq!(session.focused().as_deref(), Some(SIM_STATUS_CHARACTERISTIC));
        assert_eq!(sim.active_subscriptions(), 1);

        session.disconnect().await;
        assert!(session.active_subscriptions().is_empty());
        assert_eq!(session.focused(), None);
        assert_eq!(sim.unsubscribe_calls(), 1);
        assert!(!sim.is_connected());
    }
}
