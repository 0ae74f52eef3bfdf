//! Runtime configuration

use std::time::Duration;

/// Default cap on `noutput_items` per `work()` call
pub const DEFAULT_MAX_OUTPUT_ITEMS: usize = 100_000_000;

/// Default lower bound on every stream buffer, in bytes
pub const DEFAULT_MIN_BUFFER_BYTES: usize = 32 * 1024;

/// Default time a node may stay blocked before the watchdog reports it
pub const DEFAULT_WATCHDOG_THRESHOLD: Duration = Duration::from_secs(5);

/// Settings applied when a pipeline commits its graph and starts threads
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Minimum size of each circular buffer in bytes
    pub min_buffer_bytes: usize,
    /// Cap on items offered to one `work()` call
    pub max_output_items: usize,
    /// Stop the whole graph when any node fails
    pub stop_on_error: bool,
    /// Report nodes blocked longer than this; `None` disables the watchdog
    pub watchdog_threshold: Option<Duration>,
}

impl FlowConfig {
    pub fn new() -> Self {
        Self {
            min_buffer_bytes: DEFAULT_MIN_BUFFER_BYTES,
            max_output_items: DEFAULT_MAX_OUTPUT_ITEMS,
            stop_on_error: false,
            watchdog_threshold: Some(DEFAULT_WATCHDOG_THRESHOLD),
        }
    }

    /// Set the minimum buffer size in bytes
    pub fn with_min_buffer_bytes(mut self, bytes: usize) -> Self {
        self.min_buffer_bytes = bytes;
        self
    }

    /// Set the default per-call output cap
    pub fn with_max_output_items(mut self, items: usize) -> Self {
        self.max_output_items = items.max(1);
        self
    }

    /// Stop every node as soon as one fails
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Set or disable the watchdog threshold
    pub fn with_watchdog(mut self, threshold: Option<Duration>) -> Self {
        self.watchdog_threshold = threshold;
        self
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::new()
    }
}
