use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use log::{info, warn};

use crate::bridge::{AsyncBridge, BridgeHandle};
use crate::config::{Config, Timeouts};
use crate::device::Transport;
use crate::device::types::Device;
use crate::error::{ConnectError, NotifyError, ReadError, TransportError, WriteError};
use crate::events::{event_channel, EventReceiver};
use crate::formula::FormulaDefinition;
use crate::notify::NotificationRouter;
use crate::pipeline::ValuePipeline;
use crate::registry::{DeviceRegistry, FilterMode};
use crate::series::LiveSeriesBuffer;
use crate::session::index::{CharacteristicDescriptor, SharedIndex};
use crate::session::manager::{Session, SessionRef};
use crate::session::state::{ConnectionInfo, SessionState, SharedState};

/// All-zero payload of `size` bytes, the starting point for a hand-edited write.
pub fn zeroed_payload(size: usize) -> Vec<u8> {
    vec![0; size]
}

/// The control thread's view of a session.
///
/// Every `submit_*` method returns immediately with a [`BridgeHandle`]; the plain forms block
/// until the worker answers. The deadlines of the individual transport calls are enforced on the
/// worker, so blocking forms never wait on a hung radio forever.
pub struct SessionController {
    bridge: AsyncBridge,
    session: SessionRef,
    transport: Arc<dyn Transport>,
    registry: Arc<Mutex<DeviceRegistry>>,
    index: SharedIndex,
    state: SharedState,
    pipeline: Arc<ValuePipeline>,
    timeouts: Timeouts,
}

impl SessionController {
    pub fn start(transport: Arc<dyn Transport>, config: &Config) -> io::Result<(Self, EventReceiver)> {
        let bridge = AsyncBridge::start("gatt-session")?;
        let (events, receiver) = event_channel(config.event_capacity);
        let timeouts = config.timeouts();

        let index = SharedIndex::new();
        let state = SharedState::default();
        let router = Arc::new(NotificationRouter::new(
            index.clone(),
            config.status_characteristic.clone(),
            config.log_history,
            events.clone(),
        ));
        let series = LiveSeriesBuffer::new(config.series_capacity, config.redraw_interval());
        let pipeline = Arc::new(ValuePipeline::new(router, series, events.clone()));

        let session = Session::new_shared(
            transport.clone(),
            index.clone(),
            state.clone(),
            pipeline.clone(),
            events,
            timeouts,
            bridge.cancel_token(),
        );

        {
            let pipeline = pipeline.clone();
            let cancel = bridge.cancel_token();
            let period = config.redraw_interval();
            // the flusher lives on the worker runtime; dropping its join handle detaches it
            let _ = bridge.submit(async move {
                pipeline.spawn_flusher(cancel, period);
            });
        }

        Ok((
            SessionController {
                bridge,
                session,
                transport,
                registry: Arc::new(Mutex::new(DeviceRegistry::new())),
                index,
                state,
                pipeline,
                timeouts,
            },
            receiver,
        ))
    }

    fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        match self.registry.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn submit_scan(&self) -> BridgeHandle<Result<Vec<Device>, TransportError>> {
        let transport = self.transport.clone();
        let registry = self.registry.clone();
        let duration = self.timeouts.scan;

        self.bridge.submit(async move {
            info!("Scanning for {:?}...", duration);
            let devices = transport.discover(duration).await?;
            info!("Found {} device(s)", devices.len());

            let mut registry = match registry.lock() {
                Ok(registry) => registry,
                Err(poisoned) => poisoned.into_inner(),
            };
            registry.record_scan(devices.clone());
            Ok::<_, TransportError>(devices)
        })
    }

    /// Discover nearby devices and replace the registry with the result.
    pub fn scan(&self) -> Result<Vec<Device>, TransportError> {
        self.submit_scan().wait(None)?
    }

    pub fn devices(&self, filter_mode: FilterMode) -> Vec<Device> {
        self.registry().view(filter_mode)
    }

    pub fn submit_connect(&self, address: &str) -> BridgeHandle<Result<ConnectionInfo, ConnectError>> {
        let session = self.session.clone();
        let address = address.to_string();
        self.bridge.submit(async move {
            session.lock().await.connect(&address).await
        })
    }

    pub fn connect(&self, address: &str) -> Result<ConnectionInfo, ConnectError> {
        self.submit_connect(address).wait(None)?
    }

    pub fn submit_disconnect(&self) -> BridgeHandle<()> {
        let session = self.session.clone();
        self.bridge.submit(async move {
            session.lock().await.disconnect().await
        })
    }

    pub fn disconnect(&self) {
        if let Err(err) = self.submit_disconnect().wait(None) {
            warn!("Disconnect was not carried out: {}", err);
        }
    }

    pub fn submit_read(&self, uuid: &str) -> BridgeHandle<Result<Vec<u8>, ReadError>> {
        let session = self.session.clone();
        let uuid = uuid.to_string();
        self.bridge.submit(async move {
            session.lock().await.read(&uuid).await
        })
    }

    pub fn read(&self, uuid: &str) -> Result<Vec<u8>, ReadError> {
        self.submit_read(uuid).wait(None)?
    }

    pub fn submit_write(&self, uuid: &str, payload: Vec<u8>) -> BridgeHandle<Result<(), WriteError>> {
        let session = self.session.clone();
        let uuid = uuid.to_string();
        self.bridge.submit(async move {
            session.lock().await.write(&uuid, &payload).await
        })
    }

    pub fn write(&self, uuid: &str, payload: Vec<u8>) -> Result<(), WriteError> {
        self.submit_write(uuid, payload).wait(None)?
    }

    pub fn submit_set_notify(&self, uuid: &str, enabled: bool) -> BridgeHandle<Result<(), NotifyError>> {
        let session = self.session.clone();
        let uuid = uuid.to_string();
        self.bridge.submit(async move {
            session.lock().await.set_notify(&uuid, enabled).await
        })
    }

    pub fn set_notify(&self, uuid: &str, enabled: bool) -> Result<(), NotifyError> {
        self.submit_set_notify(uuid, enabled).wait(None)?
    }

    /// Characteristic the user last subscribed to, if that subscription is still active.
    pub fn focused(&self) -> Option<String> {
        let session = self.session.clone();
        self.bridge
            .submit(async move { session.lock().await.focused() })
            .wait(Some(self.timeouts.operation))
            .ok()
            .flatten()
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        let session = self.session.clone();
        self.bridge
            .submit(async move { session.lock().await.active_subscriptions() })
            .wait(Some(self.timeouts.operation))
            .unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Characteristics of the current connection, in discovery order.
    pub fn characteristics(&self) -> Vec<CharacteristicDescriptor> {
        self.index.snapshot().descriptors()
    }

    /// Install the formula set of `uuid`. Returns the formula names another characteristic
    /// already uses; those share one live series.
    pub fn set_formulas(&self, uuid: &str, definitions: Vec<FormulaDefinition>) -> Vec<String> {
        self.pipeline.set_formulas(uuid, definitions)
    }

    pub fn add_series(&self, name: &str) {
        self.pipeline.add_series(name);
    }

    pub fn remove_series(&self, name: &str) -> bool {
        self.pipeline.remove_series(name)
    }

    /// Log lines kept for `uuid`, or the session-wide lines for `None`.
    pub fn log_lines(&self, uuid: Option<&str>) -> Vec<String> {
        self.pipeline.router().log_lines(uuid)
    }

    /// Disconnect (bounded by the shutdown grace) and stop the worker.
    /// Returns `false` when the worker had to be abandoned.
    pub fn close(&self) -> bool {
        if self.bridge.is_closing() {
            return true;
        }

        if let Err(err) = self.submit_disconnect().wait(Some(self.timeouts.shutdown)) {
            warn!("Could not disconnect before closing: {}", err);
        }
        self.bridge.shutdown(self.timeouts.shutdown)
    }
}
