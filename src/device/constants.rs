/**
 * How long (milliseconds) a discovery pass listens for advertisements.
 */
pub const SCAN_DURATION: u64 = 5000;

/**
 * How long (milliseconds) connecting scans for an address no earlier scan reported.
 */
pub const LOOKUP_SCAN_DURATION: u64 = 3000;

/**
 * How long (milliseconds) establishing a connection may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) a read, write, subscribe or unsubscribe may take.
 */
pub const OPERATION_DEADLINE: u64 = 5000;

/**
 * How long (milliseconds) closing the session may block the caller.
 */
pub const SHUTDOWN_GRACE: u64 = 2000;

/**
 * How often (milliseconds) live series consumers are signalled at most.
 */
pub const REDRAW_INTERVAL: u64 = 100;

/**
 * Maximum number of points kept per live series.
 */
pub const SERIES_CAPACITY: usize = 100;

/**
 * Number of log lines kept per characteristic.
 */
pub const LOG_HISTORY: usize = 500;

/**
 * Capacity of the bounded channel carrying data events to the consumer.
 */
pub const EVENT_CAPACITY: usize = 256;

/**
 * Payloads are shown in log lines up to this many bytes.
 */
pub const LOG_PAYLOAD_PREVIEW: usize = 64;

/**
 * Name shown for devices that did not advertise one.
 */
pub const UNKNOWN_DEVICE_NAME: &str = "(Unknown)";
