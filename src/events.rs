use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::channel::mpsc::{channel, unbounded, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::warn;
use tokio::runtime::Builder;
use tokio::time::sleep;

use crate::error::EvalError;
use crate::formula::FormulaValue;
use crate::notify::status::StatusFrame;
use crate::series::SeriesSnapshot;
use crate::session::index::CharacteristicDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Read,
    Notify,
}

/// Everything the session reports to its consumer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected { address: String },
    Disconnected,
    CharacteristicsIndexed(Vec<CharacteristicDescriptor>),
    /// `uuid` is `None` for lines that belong to no known characteristic.
    LogLine { uuid: Option<String>, text: String },
    ValueDecoded { uuid: String, source: ValueSource, fields: StatusFrame },
    FormulaEvaluated { uuid: String, name: String, result: Result<FormulaValue, EvalError> },
    SeriesUpdated(Vec<SeriesSnapshot>),
}

impl SessionEvent {
    fn is_lifecycle(&self) -> bool {
        matches!(self, SessionEvent::Connected { .. } | SessionEvent::Disconnected | SessionEvent::CharacteristicsIndexed(_))
    }
}

/// Producer half, used on the worker.
///
/// Connection lifecycle events travel on their own unbounded channel so they are never lost.
/// Data events use a bounded channel and are dropped with a warning when the consumer lags.
#[derive(Clone)]
pub struct EventSink {
    lifecycle: UnboundedSender<SessionEvent>,
    data: Arc<Mutex<Sender<SessionEvent>>>,
}

pub struct EventReceiver {
    lifecycle: UnboundedReceiver<SessionEvent>,
    data: Receiver<SessionEvent>,
}

pub fn event_channel(capacity: usize) -> (EventSink, EventReceiver) {
    let (lifecycle_tx, lifecycle_rx) = unbounded();
    let (data_tx, data_rx) = channel(capacity);

    (
        EventSink { lifecycle: lifecycle_tx, data: Arc::new(Mutex::new(data_tx)) },
        EventReceiver { lifecycle: lifecycle_rx, data: data_rx },
    )
}

impl EventSink {
    pub fn publish(&self, event: SessionEvent) {
        if event.is_lifecycle() {
            // fails only once the consumer is gone
            let _ = self.lifecycle.unbounded_send(event);
            return;
        }

        let mut data = match self.data.lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = data.try_send(event) {
            if err.is_full() {
                warn!("Event consumer is lagging; dropping an event");
            }
        }
    }
}

impl EventReceiver {
    /// Next pending event without blocking. Lifecycle events are delivered first.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        if let Ok(Some(event)) = self.lifecycle.try_next() {
            return Some(event);
        }
        match self.data.try_next() {
            Ok(Some(event)) => Some(event),
            _ => None,
        }
    }

    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Block up to `timeout` for an event matching `predicate`, discarding others.
    /// Returns early with `None` once the session is gone and both channels are empty.
    ///
    /// For the control thread; must not be called from inside a tokio runtime.
    pub fn wait_for<P>(&mut self, timeout: Duration, mut predicate: P) -> Option<SessionEvent>
    where
        P: FnMut(&SessionEvent) -> bool,
    {
        let runtime = match Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("Could not start a timer to wait for events: {}", err);
                return None;
            },
        };

        let lifecycle = &mut self.lifecycle;
        let data = &mut self.data;
        runtime.block_on(async move {
            let deadline = sleep(timeout);
            tokio::pin!(deadline);

            let mut lifecycle_open = true;
            let mut data_open = true;

            while lifecycle_open || data_open {
                let event = tokio::select! {
                    biased;
                    event = lifecycle.next(), if lifecycle_open => match event {
                        Some(event) => event,
                        None => {
                            lifecycle_open = false;
                            continue;
                        },
                    },
                    event = data.next(), if data_open => match event {
                        Some(event) => event,
                        None => {
                            data_open = false;
                            continue;
                        },
                    },
                    _ = &mut deadline => return None,
                };
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_events_survive_a_full_data_channel() {
        let (sink, mut receiver) = event_channel(1);
        for i in 0..10 {
            sink.publish(SessionEvent::LogLine { uuid: None, text: format!("line {}", i) });
        }
        sink.publish(SessionEvent::Disconnected);

        let events = receiver.drain();
        assert!(matches!(events[0], SessionEvent::Disconnected));
        assert!(events.len() < 11);
    }

    #[test]
    fn wait_for_wakes_on_a_late_event() {
        let (sink, mut receiver) = event_channel(8);
        let publisher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            sink.publish(SessionEvent::LogLine { uuid: None, text: String::from("skipped") });
            sink.publish(SessionEvent::Connected { address: String::from("AA") });
            sink
        });

        let event = receiver.wait_for(Duration::from_secs(5), |event| matches!(event, SessionEvent::Connected { .. }));
        assert!(matches!(event, Some(SessionEvent::Connected { address }) if address == "AA"));
        drop(publisher.join());
    }

    #[test]
    fn wait_for_gives_up() {
        let (sink, mut receiver) = event_channel(8);
        sink.publish(SessionEvent::Disconnected);
        assert!(receiver.wait_for(Duration::from_millis(30), |event| matches!(event, SessionEvent::Connected { .. })).is_none());

        // no producer left: returns without waiting out the timeout
        drop(sink);
        let started = std::time::Instant::now();
        assert!(receiver.wait_for(Duration::from_secs(30), |_| true).is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
