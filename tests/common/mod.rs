#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use gatt_browser::config::Config;
use gatt_browser::device::types::{Capability, CapabilitySet, Device};
use gatt_browser::events::{EventReceiver, SessionEvent};
use gatt_browser::session::SessionController;
use gatt_browser::sim::peripheral::{SIM_COMMAND_CHARACTERISTIC, SIM_ECHO_CHARACTERISTIC, SIM_SERVICE, SIM_STATUS_CHARACTERISTIC};
use gatt_browser::sim::SimTransport;

pub const ADDRESS: &str = "SIM:AA:BB:CC:DD:01";
pub const STATUS: &str = SIM_STATUS_CHARACTERISTIC;
pub const ECHO: &str = SIM_ECHO_CHARACTERISTIC;
pub const COMMAND: &str = SIM_COMMAND_CHARACTERISTIC;

pub const EVENT_WAIT: Duration = Duration::from_secs(2);

pub fn test_config() -> Config {
    Config {
        scan_timeout_ms: 20,
        connect_timeout_ms: 300,
        operation_timeout_ms: 300,
        shutdown_grace_ms: 1000,
        redraw_interval_ms: 20,
        ..Config::default()
    }
}

pub fn devices() -> Vec<Device> {
    vec![
        Device::new(ADDRESS, Some(String::from("Status Board")), Some(-42)),
        Device::new("SIM:AA:BB:CC:DD:02", None, Some(-90)),
    ]
}

/// A peripheral with one service: a readable/notifying status characteristic, a read/write echo
/// characteristic and a write-without-response command characteristic.
pub fn status_board() -> SimTransport {
    let read_notify: CapabilitySet = [Capability::Read, Capability::Notify].into_iter().collect();
    let read_write: CapabilitySet = [Capability::Read, Capability::Write].into_iter().collect();

    SimTransport::new(devices()).with_service(SIM_SERVICE, vec![
        (STATUS, read_notify),
        (ECHO, read_write),
        (COMMAND, CapabilitySet::empty().with(Capability::WriteWithoutResponse)),
    ])
}

pub fn start(sim: &SimTransport) -> (SessionController, EventReceiver) {
    start_with(sim, &test_config())
}

pub fn start_with(sim: &SimTransport, config: &Config) -> (SessionController, EventReceiver) {
    SessionController::start(Arc::new(sim.clone()), config).unwrap()
}

pub fn count_disconnected(events: &[SessionEvent]) -> usize {
    events.iter().filter(|event| matches!(event, SessionEvent::Disconnected)).count()
}

/// Status frame with the given codes and otherwise incrementing readings.
pub fn status_payload(status: u8, error: u8) -> Vec<u8> {
    let mut payload = vec![status, error];
    payload.extend([0, 10, 0, 20, 0, 30, 0, 40]);
    payload.extend((0..24).map(|i| i as u8));
    payload
}
