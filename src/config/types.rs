use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CONNECT_DEADLINE, EVENT_CAPACITY, LOG_HISTORY, OPERATION_DEADLINE, REDRAW_INTERVAL, SCAN_DURATION, SERIES_CAPACITY, SHUTDOWN_GRACE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub series_capacity: usize,
    pub redraw_interval_ms: u64,
    pub log_history: usize,
    pub event_capacity: usize,
    /// Characteristic whose payloads are decoded as status frames; any characteristic when absent.
    pub status_characteristic: Option<String>,
}

/// Deadlines applied by the session to transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub scan: Duration,
    pub connect: Duration,
    pub operation: Duration,
    pub shutdown: Duration,
}

impl Config {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            scan: Duration::from_millis(self.scan_timeout_ms),
            connect: Duration::from_millis(self.connect_timeout_ms),
            operation: Duration::from_millis(self.operation_timeout_ms),
            shutdown: Duration::from_millis(self.shutdown_grace_ms),
        }
    }

    /// At least one millisecond; a zero period would mean redrawing on every tick of the runtime.
    pub fn redraw_interval(&self) -> Duration {
        Duration::from_millis(self.redraw_interval_ms.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_timeout_ms: SCAN_DURATION,
            connect_timeout_ms: CONNECT_DEADLINE,
            operation_timeout_ms: OPERATION_DEADLINE,
            shutdown_grace_ms: SHUTDOWN_GRACE,
            series_capacity: SERIES_CAPACITY,
            redraw_interval_ms: REDRAW_INTERVAL,
            log_history: LOG_HISTORY,
            event_capacity: EVENT_CAPACITY,
            status_characteristic: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"connectTimeoutMs": 2500}"#).unwrap();
        assert_eq!(config.connect_timeout_ms, 2500);
        assert_eq!(config.series_capacity, 100);
        assert_eq!(config.timeouts().scan, Duration::from_secs(5));
    }

    #[test]
    fn zero_redraw_interval_is_clamped() {
        let config: Config = serde_json::from_str(r#"{"redrawIntervalMs": 0}"#).unwrap();
        assert_eq!(config.redraw_interval(), Duration::from_millis(1));
        assert_eq!(Config::default().redraw_interval(), Duration::from_millis(100));
    }
}
