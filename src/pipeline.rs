use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use log::{debug, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::device::types::Handle;
use crate::events::{EventSink, SessionEvent};
use crate::formula::{Environment, FormulaDefinition, FormulaSet};
use crate::notify::{NotificationRouter, Routed};
use crate::series::LiveSeriesBuffer;
use crate::session::index::canonical_uuid;

/// Everything that happens to a notification after the transport delivered it:
/// routing, status decoding, formula evaluation and the live series.
pub struct ValuePipeline {
    router: Arc<NotificationRouter>,
    formulas: RwLock<HashMap<String, FormulaSet>>,
    series: Mutex<LiveSeriesBuffer>,
    events: EventSink,
}

impl ValuePipeline {
    pub fn new(router: Arc<NotificationRouter>, series: LiveSeriesBuffer, events: EventSink) -> Self {
        ValuePipeline {
            router,
            formulas: RwLock::new(HashMap::new()),
            series: Mutex::new(series),
            events,
        }
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    fn series(&self) -> MutexGuard<'_, LiveSeriesBuffer> {
        match self.series.lock() {
            Ok(series) => series,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the formula set of `uuid`. Formula sets are not tied to a connection.
    ///
    /// Series are keyed by formula name alone, so a name also used on another characteristic
    /// feeds the same series. Those names are returned.
    pub fn set_formulas(&self, uuid: &str, definitions: Vec<FormulaDefinition>) -> Vec<String> {
        let uuid = canonical_uuid(uuid);
        let set = FormulaSet::new(definitions);
        let mut formulas = match self.formulas.write() {
            Ok(formulas) => formulas,
            Err(poisoned) => poisoned.into_inner(),
        };

        let shared: Vec<String> = set
            .names()
            .filter(|name| formulas.iter().any(|(other, theirs)| *other != uuid && theirs.names().any(|n| n == *name)))
            .map(str::to_string)
            .collect();
        for name in &shared {
            warn!("Formula {} on {} shares its series with another characteristic", name, uuid);
        }

        if set.is_empty() {
            formulas.remove(&uuid);
        } else {
            formulas.insert(uuid, set);
        }
        shared
    }

    pub fn add_series(&self, name: &str) {
        self.series().add_series(name);
    }

    pub fn remove_series(&self, name: &str) -> bool {
        self.series().remove_series(name)
    }

    pub fn handle_notification(&self, handle: Handle, payload: Vec<u8>) -> Routed {
        let routed = self.router.route(handle, payload);
        if let Routed::Resolved { uuid, payload, .. } = &routed {
            self.evaluate_formulas(uuid, payload);
        }
        routed
    }

    fn evaluate_formulas(&self, uuid: &str, payload: &[u8]) {
        let results = {
            let formulas = match self.formulas.read() {
                Ok(formulas) => formulas,
                Err(poisoned) => poisoned.into_inner(),
            };
            match formulas.get(uuid) {
                Some(set) => set.evaluate_all(&Environment::from_payload(payload)),
                None => return,
            }
        };

        let now = Instant::now();
        {
            let mut series = self.series();
            for (name, result) in &results {
                if let Ok(value) = result {
                    series.push_at(name, value.as_f64(), now);
                }
            }
        }

        for (name, result) in results {
            if let Err(err) = &result {
                debug!("Formula {} on {} failed: {}", name, uuid, err);
            }
            self.events.publish(SessionEvent::FormulaEvaluated { uuid: uuid.to_string(), name, result });
        }

        self.flush_series(now);
    }

    /// Publish the series state if the throttle allows it.
    pub fn flush_series(&self, now: Instant) {
        let signal = self.series().take_signal(now);
        if let Some(snapshot) = signal {
            self.events.publish(SessionEvent::SeriesUpdated(snapshot));
        }
    }

    /// Periodically flush series updates that were held back by the throttle.
    pub fn spawn_flusher(self: &Arc<Self>, cancel: CancellationToken, period: Duration) -> JoinHandle<()> {
        let pipeline = self.clone();
        spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    _ = ticker.tick() => {
                        pipeline.flush_series(Instant::now());
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::{Capability, CapabilitySet, CharacteristicInfo, ServiceInfo};
    use crate::events::{event_channel, EventReceiver};
    use crate::formula::FormulaValue;
    use crate::session::index::{CharacteristicIndex, SharedIndex};

    const UUID: &str = "0000fff1-0000-1000-8000-00805f9b34fb";

    fn pipeline() -> (ValuePipeline, EventReceiver) {
        let index = SharedIndex::new();
        index.publish(CharacteristicIndex::build(&[ServiceInfo {
            uuid: String::from("0000fff0-0000-1000-8000-00805f9b34fb"),
            characteristics: vec![CharacteristicInfo {
                uuid: String::from(UUID),
                handle: 5,
                capabilities: CapabilitySet::empty().with(Capability::Notify),
            }],
        }]));
        let (sink, receiver) = event_channel(256);
        let router = Arc::new(NotificationRouter::new(index, None, 100, sink.clone()));
        let series = LiveSeriesBuffer::new(100, Duration::from_millis(100));
        (ValuePipeline::new(router, series, sink), receiver)
    }

    fn formula_results(events: Vec<SessionEvent>) -> Vec<(String, Result<FormulaValue, crate::error::EvalError>)> {
        events
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::FormulaEvaluated { name, result, .. } => Some((name, result)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn formulas_run_even_when_their_series_is_untracked() {
        let (pipeline, mut events) = pipeline();
        pipeline.set_formulas(UUID, vec![FormulaDefinition::new("sum", "b1 + b2")]);

        pipeline.handle_notification(5, vec![3, 4]);

        let results = formula_results(events.drain());
        assert_eq!(results, vec![(String::from("sum"), Ok(FormulaValue(7.0)))]);
    }

    #[test]
    fn tracked_formulas_feed_the_series() {
        let (pipeline, mut events) = pipeline();
        pipeline.set_formulas(UUID, vec![FormulaDefinition::new("sum", "b1 + b2")]);
        pipeline.add_series("sum");

        pipeline.handle_notification(5, vec![3, 4]);
        pipeline.handle_notification(5, vec![5, 5]);

        let updates: Vec<_> = events
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::SeriesUpdated(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect();
        // the second push lands inside the throttle window
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0][0].points[0].value, 7.0);

        pipeline.flush_series(Instant::now() + Duration::from_millis(150));
        match events.try_next() {
            Some(SessionEvent::SeriesUpdated(snapshot)) => assert_eq!(snapshot[0].points.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn formulas_see_only_the_bytes_that_arrived() {
        let (pipeline, mut events) = pipeline();
        pipeline.set_formulas(UUID, vec![FormulaDefinition::new("third", "b3")]);

        pipeline.handle_notification(5, vec![1, 2]);

        let results = formula_results(events.drain());
        assert!(matches!(results[0].1, Err(crate::error::EvalError::UnknownVariable(_))));
    }

    #[test]
    fn names_used_on_two_characteristics_are_reported() {
        let (pipeline, _events) = pipeline();
        let other = "0000fff2-0000-1000-8000-00805f9b34fb";

        assert!(pipeline.set_formulas(UUID, vec![FormulaDefinition::new("temp", "b1")]).is_empty());
        let shared = pipeline.set_formulas(other, vec![
            FormulaDefinition::new("temp", "b2"),
            FormulaDefinition::new("load", "b1"),
        ]);
        assert_eq!(shared, vec![String::from("temp")]);

        assert!(pipeline.set_formulas(other, Vec::new()).is_empty());
        // replacing a characteristic's own set is not sharing
        assert!(pipeline.set_formulas(UUID, vec![FormulaDefinition::new("temp", "b1 * 2")]).is_empty());
    }

    #[test]
    fn unresolved_notifications_skip_formulas() {
        let (pipeline, mut events) = pipeline();
        pipeline.set_formulas(UUID, vec![FormulaDefinition::new("sum", "b1")]);

        assert_eq!(pipeline.handle_notification(99, vec![1]), Routed::Unresolved { handle: 99 });
        assert!(formula_results(events.drain()).is_empty());
    }
}
