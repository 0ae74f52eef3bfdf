//! Thread-per-block scheduler for streaming graphs
//!
//! Spawns a dedicated thread for each node and manages their lifecycle.
//!
//! ## Node thread loop
//!
//! Each thread repeatedly runs one executor pass. After progress it wakes the
//! neighbours whose windows changed: downstream nodes when items were committed,
//! upstream nodes when items were consumed. When a pass is blocked on input or on
//! output space the thread sleeps on its own notifier until a neighbour (or
//! `stop()`) posts a token; it never spins and never re-checks on a timer. A
//! source that had nothing to emit sleeps the same way until `stop()` or
//! `Pipeline::wake` posts a token.
//!
//! When a node finishes, for any reason, its output buffers are marked done and
//! its input readers are detached, so consumers drain and exit and producers no
//! longer wait for space that will never be released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, info, trace};

use super::config::FlowConfig;
use super::errors::{NodeFailure, WorkError};
use super::executor::{NodeExecutor, PassOutcome, panic_message};
use super::graph::{NodeId, NodeWiring};
use super::node::Block;
use super::notify::{Notifier, Waker};
use super::watchdog::{WaitGuard, WaitReason, Watchdog, WatchdogHandle, WatchdogMonitor};

/// Lifecycle of one node thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Ready = 0,
    Running = 1,
    BlockedOnInput = 2,
    BlockedOnOutput = 3,
    Done = 4,
    Error = 5,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeState::Running,
            2 => NodeState::BlockedOnInput,
            3 => NodeState::BlockedOnOutput,
            4 => NodeState::Done,
            5 => NodeState::Error,
            _ => NodeState::Ready,
        }
    }

    /// Whether the thread has exited its loop
    pub fn is_finished(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::Error)
    }
}

/// Counters updated by one node thread
pub struct NodeStats {
    name: String,
    work_calls: AtomicU64,
    items_produced: AtomicU64,
    items_consumed: AtomicU64,
    wakeups: AtomicU64,
    state: AtomicU8,
}

impl NodeStats {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            work_calls: AtomicU64::new(0),
            items_produced: AtomicU64::new(0),
            items_consumed: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            state: AtomicU8::new(NodeState::Ready as u8),
        }
    }

    pub(crate) fn record_work_call(&self) {
        self.work_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_items(&self, consumed: usize, produced: usize) {
        self.items_consumed.fetch_add(consumed as u64, Ordering::Relaxed);
        self.items_produced.fetch_add(produced as u64, Ordering::Relaxed);
    }

    fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> NodeStatsSnapshot {
        NodeStatsSnapshot {
            name: self.name.clone(),
            work_calls: self.work_calls.load(Ordering::Relaxed),
            items_produced: self.items_produced.load(Ordering::Relaxed),
            items_consumed: self.items_consumed.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            state: self.state(),
        }
    }
}

/// Copy of a node's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatsSnapshot {
    pub name: String,
    pub work_calls: u64,
    /// Output items committed (for sinks: items processed)
    pub items_produced: u64,
    /// Input items consumed, summed over ports
    pub items_consumed: u64,
    /// Times the thread woke from a blocked wait
    pub wakeups: u64,
    pub state: NodeState,
}

/// What a node thread needs besides its executor
struct ThreadContext {
    id: NodeId,
    notifier: Notifier,
    upstream: Vec<Waker>,
    downstream: Vec<Waker>,
    everyone: Arc<Vec<Waker>>,
    stop_signal: Arc<AtomicBool>,
    stop_on_error: bool,
    failures: Arc<Mutex<Vec<NodeFailure>>>,
    stats: Arc<NodeStats>,
    watchdog: Option<WatchdogHandle>,
    completion_tx: Sender<NodeId>,
}

impl ThreadContext {
    fn wait(&self, reason: WaitReason) {
        let state = match reason {
            WaitReason::Input => NodeState::BlockedOnInput,
            WaitReason::OutputSpace => NodeState::BlockedOnOutput,
        };
        self.stats.set_state(state);
        let _guard = self.watchdog.as_ref().map(|h| WaitGuard::new(h, reason));
        self.notifier.wait();
        self.stats.record_wakeup();
        self.stats.set_state(NodeState::Running);
    }

    fn fail(&self, name: &str, error: WorkError) {
        error!("[{}] Node failed: {}", name, error);
        self.stats.set_state(NodeState::Error);
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NodeFailure {
                node: name.to_string(),
                error,
            });
        if self.stop_on_error {
            info!("[{}] Stopping graph on error", name);
            self.stop_signal.store(true, Ordering::Release);
            for waker in self.everyone.iter() {
                waker.wake();
            }
        }
    }

    fn wake_neighbours(&self) {
        for waker in self.upstream.iter().chain(&self.downstream) {
            waker.wake();
        }
    }
}

fn run_node(mut executor: NodeExecutor, ctx: ThreadContext) -> Box<dyn Block> {
    let name = executor.name().to_string();
    debug!("[{}] Thread started", name);

    let mut failed = false;
    let started = match executor.start() {
        Ok(()) => {
            ctx.stats.set_state(NodeState::Running);
            true
        }
        Err(e) => {
            ctx.fail(&name, e);
            failed = true;
            false
        }
    };

    while !failed {
        if ctx.stop_signal.load(Ordering::Acquire) {
            debug!("[{}] Stop signal received", name);
            break;
        }
        match executor.run_pass() {
            Ok(PassOutcome::Progress { consumed, produced }) => {
                if produced > 0 {
                    for waker in &ctx.downstream {
                        waker.wake();
                    }
                }
                if consumed > 0 {
                    for waker in &ctx.upstream {
                        waker.wake();
                    }
                }
            }
            Ok(PassOutcome::BlockedOnInput) => ctx.wait(WaitReason::Input),
            Ok(PassOutcome::BlockedOnOutput) => ctx.wait(WaitReason::OutputSpace),
            Ok(PassOutcome::Done) => {
                trace!("[{}] Done", name);
                break;
            }
            Err(e) => {
                ctx.fail(&name, e);
                failed = true;
            }
        }
    }

    if started && let Err(e) = executor.stop() {
        if failed {
            error!("[{}] stop() also failed: {}", name, e);
        } else {
            ctx.fail(&name, e);
            failed = true;
        }
    }

    executor.finish();
    ctx.wake_neighbours();
    if !failed {
        ctx.stats.set_state(NodeState::Done);
    }

    let stats = ctx.stats.snapshot();
    info!(
        "[{}] Shutdown. {} work calls, produced {} items, consumed {} items.",
        name, stats.work_calls, stats.items_produced, stats.items_consumed
    );

    // Notify scheduler that this thread is about to complete
    let _ = ctx.completion_tx.send(ctx.id);
    executor.into_block()
}

/// Blocks and failures collected when every thread has been joined
pub(crate) struct SchedulerReport {
    pub(crate) blocks: Vec<(NodeId, Box<dyn Block>)>,
    pub(crate) failures: Vec<NodeFailure>,
}

/// Runtime scheduler that executes a committed graph
pub struct Scheduler {
    threads: Vec<(NodeId, String, JoinHandle<Box<dyn Block>>)>,
    stop_signal: Arc<AtomicBool>,
    wakers: Arc<Vec<Waker>>,
    stats: Vec<Arc<NodeStats>>,
    failures: Arc<Mutex<Vec<NodeFailure>>>,
    completion_tx: Option<Sender<NodeId>>,
    completion_rx: Receiver<NodeId>,
    monitor: Option<WatchdogMonitor>,
}

impl Scheduler {
    /// Spawn one thread per node
    pub(crate) fn start(wirings: Vec<NodeWiring>, config: &FlowConfig, max_output_items: usize) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        let node_count = wirings
            .iter()
            .map(|w| w.id.as_usize() + 1)
            .max()
            .unwrap_or(0);

        let mut notifiers: Vec<Option<Notifier>> = (0..node_count).map(|_| Some(Notifier::new())).collect();
        let wakers: Arc<Vec<Waker>> = Arc::new(
            notifiers
                .iter()
                .flatten()
                .map(Notifier::waker)
                .collect(),
        );
        let stats: Vec<Arc<NodeStats>> = (0..node_count)
            .map(|i| {
                let name = wirings
                    .iter()
                    .find(|w| w.id.as_usize() == i)
                    .map_or("", |w| w.name.as_str());
                Arc::new(NodeStats::new(name))
            })
            .collect();

        let (watchdog, monitor) = match config.watchdog_threshold {
            Some(threshold) => {
                let watchdog = Watchdog::new(threshold);
                let monitor = watchdog.start_monitoring_thread();
                info!("Watchdog enabled - will report nodes blocked >{:?}", threshold);
                (Some(watchdog), Some(monitor))
            }
            None => (None, None),
        };

        let stop_signal = Arc::new(AtomicBool::new(false));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut threads = Vec::with_capacity(wirings.len());

        for wiring in wirings {
            let id = wiring.id;
            let name = wiring.name.clone();
            let index = id.as_usize();
            let ctx = ThreadContext {
                id,
                notifier: notifiers[index].take().unwrap_or_default(),
                upstream: wiring.upstream.iter().map(|n| wakers[n.as_usize()].clone()).collect(),
                downstream: wiring.downstream.iter().map(|n| wakers[n.as_usize()].clone()).collect(),
                everyone: Arc::clone(&wakers),
                stop_signal: Arc::clone(&stop_signal),
                stop_on_error: config.stop_on_error,
                failures: Arc::clone(&failures),
                stats: Arc::clone(&stats[index]),
                watchdog: watchdog.as_ref().map(|w| w.register_node(&name)),
                completion_tx: completion_tx.clone(),
            };
            let executor = NodeExecutor::new(wiring, max_output_items, Arc::clone(&stats[index]));

            debug!("Starting node thread: {}", name);
            let handle = thread::spawn(move || run_node(executor, ctx));
            threads.push((id, name, handle));
        }

        Self {
            threads,
            stop_signal,
            wakers,
            stats,
            failures,
            completion_tx: Some(completion_tx),
            completion_rx,
            monitor,
        }
    }

    /// Signal all nodes to stop and wake every blocked thread
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Release);
        for waker in self.wakers.iter() {
            waker.wake();
        }
    }

    /// Post a wake-up token to one node
    pub fn wake(&self, node: NodeId) -> bool {
        self.wakers.get(node.as_usize()).is_some_and(Waker::wake)
    }

    /// Counters of one node
    pub fn stats(&self, node: NodeId) -> Option<&Arc<NodeStats>> {
        self.stats.get(node.as_usize())
    }

    pub(crate) fn all_stats(&self) -> &[Arc<NodeStats>] {
        &self.stats
    }

    /// Whether every node thread has left its loop
    pub fn is_finished(&self) -> bool {
        self.stats.iter().all(|s| s.state().is_finished())
    }

    /// Get the number of node threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Wait for all node threads to complete
    /// Uses a completion notification channel to join threads as they finish
    pub(crate) fn wait(mut self) -> SchedulerReport {
        // Drop the scheduler's sender so the channel closes when all threads complete
        self.completion_tx.take();

        let total_threads = self.threads.len();
        let mut completed = 0;
        info!("Waiting for {} threads to complete...", total_threads);

        let mut threads_by_id: HashMap<NodeId, (String, JoinHandle<Box<dyn Block>>)> = self
            .threads
            .drain(..)
            .map(|(id, name, handle)| (id, (name, handle)))
            .collect();
        let mut blocks = Vec::with_capacity(total_threads);
        let mut lost = Vec::new();

        let mut join = |id: NodeId, name: String, handle: JoinHandle<Box<dyn Block>>| match handle.join() {
            Ok(block) => blocks.push((id, block)),
            Err(payload) => {
                let message = panic_message(payload);
                error!("[{}] Thread panicked: {}", name, message);
                lost.push(NodeFailure {
                    node: name,
                    error: WorkError::Panicked(message),
                });
            }
        };

        // Block on completion notifications - no busy-waiting
        while completed < total_threads {
            match self.completion_rx.recv() {
                Ok(id) => {
                    completed += 1;
                    if let Some((name, handle)) = threads_by_id.remove(&id) {
                        trace!("[{}] Thread completed ({}/{})", name, completed, total_threads);
                        join(id, name, handle);
                    }
                }
                // Channel closed - every thread sender dropped
                Err(_) => break,
            }
        }
        for (id, (name, handle)) in threads_by_id.drain() {
            join(id, name, handle);
        }

        info!("All {} threads completed", total_threads);

        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }

        let mut failures = std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner));
        failures.extend(lost);
        SchedulerReport { blocks, failures }
    }
}
