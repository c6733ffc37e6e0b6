use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future::ready;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::OnceCell;
use tokio::time::sleep;
use uuid::Uuid;

use crate::device::Transport;
use crate::device::constants::LOOKUP_SCAN_DURATION;
use crate::device::types::{Capability, CapabilitySet, CharacteristicInfo, Device, Handle, ServiceInfo, TransportEvent};
use crate::error::TransportError;

struct ConnectedPeripheral {
    adapter: Adapter,
    peripheral: Peripheral,
    by_handle: HashMap<Handle, Characteristic>,
    // shared with the event stream, which may be opened before discovery fills it
    by_uuid: Arc<RwLock<HashMap<Uuid, Handle>>>,
}

#[derive(Default)]
struct BtleState {
    // address => (adapter that saw it, peripheral), from the most recent scan
    seen: HashMap<String, (Adapter, Peripheral)>,
    connected: Option<ConnectedPeripheral>,
}

/// [`Transport`] backed by the host's bluetooth adapters through btleplug.
///
/// btleplug identifies characteristics by UUID, so handles are assigned here from a counter that
/// never repeats for the lifetime of the transport. A handle from an earlier connection therefore
/// never resolves against a later one.
pub struct BtleTransport {
    manager: OnceCell<Manager>,
    state: Mutex<BtleState>,
    next_handle: AtomicU16,
}

impl Default for BtleTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn capabilities_of(properties: CharPropFlags) -> CapabilitySet {
    let mut set = CapabilitySet::empty();
    if properties.contains(CharPropFlags::READ) { set = set.with(Capability::Read); }
    if properties.contains(CharPropFlags::WRITE) { set = set.with(Capability::Write); }
    if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) { set = set.with(Capability::WriteWithoutResponse); }
    if properties.contains(CharPropFlags::NOTIFY) { set = set.with(Capability::Notify); }
    if properties.contains(CharPropFlags::INDICATE) { set = set.with(Capability::Indicate); }
    set
}

impl BtleTransport {
    pub fn new() -> Self {
        BtleTransport {
            manager: OnceCell::new(),
            state: Mutex::new(BtleState::default()),
            next_handle: AtomicU16::new(1),
        }
    }

    async fn manager(&self) -> Result<&Manager, TransportError> {
        self.manager.get_or_try_init(|| async { Manager::new().await.map_err(TransportError::from) }).await
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BtleState>, TransportError> {
        self.state.lock().map_err(|_| TransportError::Other(String::from("btleplug transport state poisoned")))
    }

    fn connected_peripheral(&self) -> Result<Peripheral, TransportError> {
        let state = self.lock()?;
        state.connected.as_ref().map(|c| c.peripheral.clone()).ok_or(TransportError::NotConnected)
    }

    fn characteristic(&self, handle: Handle) -> Result<(Peripheral, Characteristic), TransportError> {
        let state = self.lock()?;
        let connected = state.connected.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = connected.by_handle.get(&handle).ok_or(TransportError::UnknownHandle(handle))?;
        Ok((connected.peripheral.clone(), characteristic.clone()))
    }

    fn remembered(&self, address: &str) -> Result<Option<(Adapter, Peripheral)>, TransportError> {
        let state = self.lock()?;
        Ok(state.seen.iter().find(|(seen, _)| same_address(seen, address)).map(|(_, found)| found.clone()))
    }

    // peripherals the adapters already know about, e.g. bonded or seen by another application
    async fn known_to_adapters(&self, address: &str) -> Result<Option<(Adapter, Peripheral)>, TransportError> {
        for adapter in self.manager().await?.adapters().await? {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                if let Ok(Some(properties)) = peripheral.properties().await {
                    if same_address(&properties.address.to_string(), address) {
                        return Ok(Some((adapter.clone(), peripheral)));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn locate(&self, address: &str) -> Result<(Adapter, Peripheral), TransportError> {
        if let Some(found) = self.remembered(address)? {
            return Ok(found);
        }
        if let Some(found) = self.known_to_adapters(address).await? {
            return Ok(found);
        }

        info!("Peripheral {} was not seen before; scanning for it...", address);
        self.discover(Duration::from_millis(LOOKUP_SCAN_DURATION)).await?;
        self.remembered(address)?.ok_or_else(|| TransportError::UnknownDevice(address.to_string()))
    }

    fn allocate_handle(&self) -> Handle {
        // 0 is never handed out
        loop {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn discover(&self, duration: Duration) -> Result<Vec<Device>, TransportError> {
        let adapters = self.manager().await?.adapters().await?;

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(ScanFilter::default()).await?;
        }

        sleep(duration).await;

        let mut devices = Vec::new();
        let mut seen = HashMap::new();

        for adapter in &adapters {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }

            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                match peripheral.properties().await {
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                    },
                    Ok(None) => {
                        debug!("Peripheral has no properties");
                    },
                    Ok(Some(properties)) => {
                        let address = properties.address.to_string();
                        if seen.contains_key(&address) {
                            continue;
                        }

                        devices.push(Device::new(address.clone(), properties.local_name, properties.rssi));
                        seen.insert(address, (adapter.clone(), peripheral));
                    },
                }
            }
        }

        self.lock()?.seen = seen;
        Ok(devices)
    }

    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let (adapter, peripheral) = self.locate(address).await?;

        info!("Connecting to peripheral {}...", address);
        peripheral.connect().await?;

        self.lock()?.connected = Some(ConnectedPeripheral {
            adapter,
            peripheral,
            by_handle: HashMap::new(),
            by_uuid: Arc::new(RwLock::new(HashMap::new())),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let connected = self.lock()?.connected.take();
        match connected {
            Some(connected) => {
                connected.peripheral.disconnect().await?;
                Ok(())
            },
            None => Ok(()),
        }
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        let peripheral = self.connected_peripheral()?;
        peripheral.discover_services().await?;

        let mut by_handle = HashMap::new();
        let mut by_uuid = HashMap::new();
        let mut services = Vec::new();

        for service in peripheral.services() {
            let mut characteristics = Vec::new();
            for characteristic in &service.characteristics {
                let handle = self.allocate_handle();
                characteristics.push(CharacteristicInfo {
                    uuid: characteristic.uuid.to_string(),
                    handle,
                    capabilities: capabilities_of(characteristic.properties),
                });
                by_uuid.insert(characteristic.uuid, handle);
                by_handle.insert(handle, characteristic.clone());
            }
            services.push(ServiceInfo { uuid: service.uuid.to_string(), characteristics });
        }

        let mut state = self.lock()?;
        let connected = state.connected.as_mut().ok_or(TransportError::NotConnected)?;
        connected.by_handle = by_handle;
        match connected.by_uuid.write() {
            Ok(mut shared) => *shared = by_uuid,
            Err(poisoned) => *poisoned.into_inner() = by_uuid,
        }
        Ok(services)
    }

    async fn read(&self, handle: Handle) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) = self.characteristic(handle)?;
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn write(&self, handle: Handle, payload: &[u8], with_response: bool) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(handle)?;
        let write_type = if with_response { WriteType::WithResponse } else { WriteType::WithoutResponse };
        Ok(peripheral.write(&characteristic, payload, write_type).await?)
    }

    async fn subscribe(&self, handle: Handle) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(handle)?;
        Ok(peripheral.subscribe(&characteristic).await?)
    }

    async fn unsubscribe(&self, handle: Handle) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(handle)?;
        Ok(peripheral.unsubscribe(&characteristic).await?)
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        let (adapter, peripheral, by_uuid) = {
            let state = self.lock()?;
            let connected = state.connected.as_ref().ok_or(TransportError::NotConnected)?;
            (connected.adapter.clone(), connected.peripheral.clone(), connected.by_uuid.clone())
        };

        let notifications = peripheral.notifications().await?.filter_map(move |notification| {
            let handle = match by_uuid.read() {
                Ok(map) => map.get(&notification.uuid).copied(),
                Err(poisoned) => poisoned.into_inner().get(&notification.uuid).copied(),
            };
            let event = match handle {
                Some(handle) => Some(TransportEvent::Notification { handle, payload: notification.value }),
                None => {
                    debug!("Notification for undiscovered characteristic {}", notification.uuid);
                    None
                },
            };
            ready(event)
        });

        let peripheral_id = peripheral.id();
        let link_loss = adapter.events().await?.filter_map(move |event| {
            ready(match event {
                CentralEvent::DeviceDisconnected(id) if id == peripheral_id => Some(TransportEvent::Disconnected),
                _ => None,
            })
        });

        Ok(stream::select(notifications, link_loss).boxed())
    }
}
