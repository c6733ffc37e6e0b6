use std::sync::Mutex;
use log::{debug, warn};

use crate::device::types::Handle;
use crate::events::{EventSink, SessionEvent, ValueSource};
use crate::notify::history::{payload_line, CharacteristicLog};
use crate::notify::status::StatusFrame;
use crate::session::index::{canonical_uuid, SharedIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Resolved { uuid: String, payload: Vec<u8>, status: Option<StatusFrame> },
    /// The handle is not part of the current index, e.g. a late notification from a previous connection.
    Unresolved { handle: Handle },
}

/// Turns raw `(handle, payload)` notifications into characteristic-level events.
///
/// Every lookup goes against the index snapshot current at the time of the call. A notification
/// racing an index rebuild either misses (old snapshot) or resolves (new snapshot).
pub struct NotificationRouter {
    index: SharedIndex,
    status_characteristic: Option<String>,
    log: Mutex<CharacteristicLog>,
    events: EventSink,
}

impl NotificationRouter {
    /// With no `status_characteristic` every characteristic is eligible for status decoding.
    pub fn new(index: SharedIndex, status_characteristic: Option<String>, log_history: usize, events: EventSink) -> Self {
        NotificationRouter {
            index,
            status_characteristic: status_characteristic.as_deref().map(canonical_uuid),
            log: Mutex::new(CharacteristicLog::new(log_history)),
            events,
        }
    }

    pub fn route(&self, handle: Handle, payload: Vec<u8>) -> Routed {
        let snapshot = self.index.snapshot();

        let uuid = match snapshot.resolve(handle) {
            Some(uuid) => uuid.to_string(),
            None => {
                warn!("Notification for unknown handle {} ({} bytes)", handle, payload.len());
                let subject = format!("unknown handle {}", handle);
                self.record_line(None, payload_line("NOTIF", &subject, &payload));
                return Routed::Unresolved { handle };
            },
        };

        debug!("Notification for {} ({} bytes)", uuid, payload.len());
        self.record_line(Some(&uuid), payload_line("NOTIF", &uuid, &payload));
        let status = self.decode(&uuid, &payload, ValueSource::Notify);

        Routed::Resolved { uuid, payload, status }
    }

    /// Log a completed read and decode it like a notification.
    pub fn record_read(&self, uuid: &str, payload: &[u8]) -> Option<StatusFrame> {
        self.record_line(Some(uuid), payload_line("READ", uuid, payload));
        self.decode(uuid, payload, ValueSource::Read)
    }

    pub fn record_line(&self, uuid: Option<&str>, text: String) {
        match self.log.lock() {
            Ok(mut log) => log.append(uuid, text.clone()),
            Err(poisoned) => poisoned.into_inner().append(uuid, text.clone()),
        }
        self.events.publish(SessionEvent::LogLine { uuid: uuid.map(str::to_string), text });
    }

    pub fn log_lines(&self, uuid: Option<&str>) -> Vec<String> {
        match self.log.lock() {
            Ok(log) => log.lines(uuid),
            Err(poisoned) => poisoned.into_inner().lines(uuid),
        }
    }

    fn decode(&self, uuid: &str, payload: &[u8], source: ValueSource) -> Option<StatusFrame> {
        if let Some(status_uuid) = &self.status_characteristic {
            if status_uuid != uuid {
                return None;
            }
        }

        let frame = StatusFrame::decode(payload)?;
        self.events.publish(SessionEvent::ValueDecoded { uuid: uuid.to_string(), source, fields: frame.clone() });
        Some(frame)
    }
}
