//! Watchdog for nodes stuck waiting on their neighbours
//!
//! Low-overhead monitoring using atomic timestamps instead of locks.
//! Each node thread stores the start time of its current wait in an atomic
//! variable, and the monitor thread periodically scans these timestamps.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{info, warn};

/// Timestamp in milliseconds since UNIX_EPOCH
#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// What a node is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitReason {
    Input = 0,
    OutputSpace = 1,
}

impl WaitReason {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WaitReason::OutputSpace,
            _ => WaitReason::Input,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            WaitReason::Input => "waiting for input",
            WaitReason::OutputSpace => "waiting for output space",
        }
    }
}

struct NodeWait {
    /// Timestamp (ms since epoch) when the current wait started, or 0 if running
    wait_start: AtomicU64,
    reason: AtomicU8,
    /// Whether the current wait has already been reported
    has_warned: AtomicBool,
    node_name: String,
}

/// Handle held by one node thread
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<NodeWait>,
}

impl WatchdogHandle {
    /// Mark the start of a wait
    #[inline(always)]
    pub fn start_wait(&self, reason: WaitReason) {
        self.state.reason.store(reason as u8, Ordering::Relaxed);
        self.state.wait_start.store(now_millis(), Ordering::Relaxed);
        self.state.has_warned.store(false, Ordering::Relaxed);
    }

    /// Mark the end of a wait
    #[inline(always)]
    pub fn finish_wait(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed) {
            let reason = WaitReason::from_u8(self.state.reason.load(Ordering::Relaxed));
            info!("UNBLOCKED: [{}] no longer {}", self.state.node_name, reason.describe());
        }
        self.state.wait_start.store(0, Ordering::Relaxed);
    }
}

/// Shared watchdog state
#[derive(Clone)]
pub struct Watchdog {
    nodes: Arc<Mutex<Vec<Weak<NodeWait>>>>,
    threshold: Duration,
}

impl Watchdog {
    /// Create a watchdog that reports waits longer than `threshold`
    pub fn new(threshold: Duration) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(Vec::new())),
            threshold,
        }
    }

    /// Register a node for monitoring
    pub fn register_node(&self, node_name: &str) -> WatchdogHandle {
        let state = Arc::new(NodeWait {
            wait_start: AtomicU64::new(0),
            reason: AtomicU8::new(WaitReason::Input as u8),
            has_warned: AtomicBool::new(false),
            node_name: node_name.to_string(),
        });

        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&state));

        WatchdogHandle { state }
    }

    /// Report waits longer than the threshold, returning how many were newly reported
    pub fn check_for_blocked(&self) -> usize {
        let now = now_millis();
        let threshold_ms = self.threshold.as_millis() as u64;
        let mut reported = 0;

        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop handles whose thread is gone and check live ones
        nodes.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.wait_start.load(Ordering::Relaxed);
            if start > 0 {
                let duration_ms = now.saturating_sub(start);
                if duration_ms > threshold_ms && !state.has_warned.swap(true, Ordering::Relaxed) {
                    let reason = WaitReason::from_u8(state.reason.load(Ordering::Relaxed));
                    warn!(
                        "BLOCKED: [{}] {} for {:.1}s",
                        state.node_name,
                        reason.describe(),
                        duration_ms as f64 / 1000.0
                    );
                    reported += 1;
                }
            }
            true
        });
        reported
    }

    /// Start the monitoring thread; it exits when the returned monitor is stopped
    pub fn start_monitoring_thread(&self) -> WatchdogMonitor {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let watchdog = self.clone();
        let period = (self.threshold / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
        let handle = std::thread::spawn(move || {
            loop {
                match shutdown_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        watchdog.check_for_blocked();
                    }
                    _ => break,
                }
            }
        });
        WatchdogMonitor {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// Running monitor thread
pub struct WatchdogMonitor {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WatchdogMonitor {
    /// Stop the monitoring thread and wait for it
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchdogMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// RAII guard for one wait - near-zero cost (just atomic stores)
pub struct WaitGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> WaitGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle, reason: WaitReason) -> Self {
        handle.start_wait(reason);
        Self { handle }
    }
}

impl Drop for WaitGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_wait();
    }
}
