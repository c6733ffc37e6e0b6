use std::collections::VecDeque;
use std::time::{Duration, Instant};
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    /// Seconds since the series was added.
    pub time: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub name: String,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug)]
struct Series {
    started: Instant,
    points: VecDeque<SeriesPoint>,
}

/// Bounded live history for the series a consumer opted into, with throttled change signals.
///
/// Pushes mark the buffer dirty; [`LiveSeriesBuffer::take_signal`] hands out at most one snapshot
/// per interval, so any number of pushes inside one interval coalesce into a single signal.
#[derive(Debug)]
pub struct LiveSeriesBuffer {
    capacity: usize,
    interval: Duration,
    series: IndexMap<String, Series>,
    dirty: bool,
    last_signal: Option<Instant>,
}

impl LiveSeriesBuffer {
    pub fn new(capacity: usize, interval: Duration) -> Self {
        LiveSeriesBuffer {
            capacity: capacity.max(1),
            interval,
            series: IndexMap::new(),
            dirty: false,
            last_signal: None,
        }
    }

    pub fn add_series(&mut self, name: &str) {
        self.add_series_at(name, Instant::now());
    }

    /// Start tracking `name`. Already tracked series keep their history.
    pub fn add_series_at(&mut self, name: &str, now: Instant) {
        if !self.series.contains_key(name) {
            self.series.insert(name.to_string(), Series { started: now, points: VecDeque::with_capacity(self.capacity) });
        }
    }

    /// Stop tracking `name` and forget its history.
    pub fn remove_series(&mut self, name: &str) -> bool {
        let removed = self.series.shift_remove(name).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn push(&mut self, name: &str, value: f64) -> bool {
        self.push_at(name, value, Instant::now())
    }

    /// Append to a tracked series, evicting the oldest point when full. Untracked names are ignored.
    pub fn push_at(&mut self, name: &str, value: f64, now: Instant) -> bool {
        let capacity = self.capacity;
        let series = match self.series.get_mut(name) {
            Some(series) => series,
            None => return false,
        };

        if series.points.len() == capacity {
            series.points.pop_front();
        }
        let time = now.saturating_duration_since(series.started).as_secs_f64();
        series.points.push_back(SeriesPoint { time, value });
        self.dirty = true;
        true
    }

    pub fn points(&self, name: &str) -> Vec<SeriesPoint> {
        self.series.get(name).map(|series| series.points.iter().copied().collect()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        self.series
            .iter()
            .map(|(name, series)| SeriesSnapshot { name: name.clone(), points: series.points.iter().copied().collect() })
            .collect()
    }

    /// The state of every tracked series, if something changed and the last signal is at least one
    /// interval old.
    pub fn take_signal(&mut self, now: Instant) -> Option<Vec<SeriesSnapshot>> {
        if !self.dirty {
            return None;
        }
        if let Some(last) = self.last_signal {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }

        self.dirty = false;
        self.last_signal = Some(now);
        Some(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> LiveSeriesBuffer {
        LiveSeriesBuffer::new(100, Duration::from_millis(100))
    }

    #[test]
    fn pushing_to_an_untracked_series_records_nothing() {
        let mut buffer = buffer();
        assert!(!buffer.push("x", 1.0));
        assert!(buffer.points("x").is_empty());
        assert!(buffer.take_signal(Instant::now()).is_none());
    }

    #[test]
    fn keeps_the_most_recent_hundred_points() {
        let mut buffer = buffer();
        buffer.add_series("x");
        for i in 0..150 {
            buffer.push("x", i as f64);
        }

        let points = buffer.points("x");
        assert_eq!(points.len(), 100);
        assert_eq!(points[0].value, 50.0);
        assert_eq!(points[99].value, 149.0);
    }

    #[test]
    fn pushes_within_an_interval_coalesce_into_one_signal() {
        let start = Instant::now();
        let mut buffer = buffer();
        buffer.add_series_at("x", start);
        buffer.add_series_at("y", start);

        buffer.push_at("x", 1.0, start);
        let first = buffer.take_signal(start).unwrap();
        assert_eq!(first[0].points.len(), 1);

        let mut signals = 0;
        for i in 1..=20 {
            let now = start + Duration::from_millis(i * 4);
            buffer.push_at("x", i as f64, now);
            buffer.push_at("y", i as f64, now);
            if buffer.take_signal(now).is_some() {
                signals += 1;
            }
        }
        assert_eq!(signals, 0);

        let later = start + Duration::from_millis(100);
        let signal = buffer.take_signal(later).unwrap();
        assert_eq!(signal.len(), 2);
        assert_eq!(signal[0].points.len(), 21);
        assert_eq!(signal[1].points.last().unwrap().value, 20.0);
        assert!(buffer.take_signal(later + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn removing_a_series_clears_its_history() {
        let mut buffer = buffer();
        buffer.add_series("x");
        buffer.push("x", 1.0);
        assert!(buffer.remove_series("x"));

        buffer.add_series("x");
        assert!(buffer.points("x").is_empty());
    }

    #[test]
    fn timestamps_are_relative_to_the_series_start() {
        let start = Instant::now();
        let mut buffer = buffer();
        buffer.add_series_at("x", start);
        buffer.push_at("x", 3.0, start + Duration::from_millis(1500));
        assert_eq!(buffer.points("x")[0].time, 1.5);
    }
}
