//! Top-level controller for a flow graph
//!
//! [`Pipeline`] owns the [`FlowGraph`] and, while running, the [`Scheduler`].
//! Blocks move into their threads on `start()` and come back when the threads
//! are joined, which is what lets `lock()`/`unlock()` stop the graph, change its
//! topology, re-commit fresh buffers and start again.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config::FlowConfig;
use super::errors::{ConnectionError, NodeFailure, RunError};
use super::graph::{Connection, FlowGraph, GraphState, NodeId};
use super::node::Block;
use super::scheduler::{NodeState, NodeStats, NodeStatsSnapshot, Scheduler};

/// Global lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Flow graph plus the machinery to run it
pub struct Pipeline {
    graph: FlowGraph,
    config: FlowConfig,
    state: RunState,
    scheduler: Option<Scheduler>,
    stats: Vec<Arc<NodeStats>>,
    failures: Vec<NodeFailure>,
    lock_count: usize,
    resume_on_unlock: bool,
    max_output_items: usize,
}

impl Pipeline {
    /// Create an empty pipeline with default configuration
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    /// Create an empty pipeline with the given configuration
    pub fn with_config(config: FlowConfig) -> Self {
        Self {
            graph: FlowGraph::new(),
            max_output_items: config.max_output_items,
            config,
            state: RunState::Created,
            scheduler: None,
            stats: Vec::new(),
            failures: Vec::new(),
            lock_count: 0,
            resume_on_unlock: false,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// The underlying graph
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Add a block; fails while the graph is running and not locked
    pub fn add_block<B: Block + 'static>(&mut self, block: B) -> Result<NodeId, ConnectionError> {
        self.graph.add_block(block)
    }

    /// Connect an output port to an input port
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_port: usize,
        to_node: NodeId,
        to_port: usize,
    ) -> Result<(), ConnectionError> {
        self.graph.connect(from_node, from_port, to_node, to_port)
    }

    /// Connect two nodes by name
    pub fn connect_by_name(
        &mut self,
        from_node: &str,
        from_port: usize,
        to_node: &str,
        to_port: usize,
    ) -> Result<(), ConnectionError> {
        let from = self.node_id(from_node)?;
        let to = self.node_id(to_node)?;
        self.graph.connect(from, from_port, to, to_port)
    }

    /// Remove one connection
    pub fn disconnect(
        &mut self,
        from_node: NodeId,
        from_port: usize,
        to_node: NodeId,
        to_port: usize,
    ) -> Result<(), ConnectionError> {
        self.graph.disconnect(from_node, from_port, to_node, to_port)
    }

    /// Remove every connection touching `node`
    pub fn disconnect_all(&mut self, node: NodeId) -> Result<(), ConnectionError> {
        self.graph.disconnect_all(node)
    }

    /// All connections
    pub fn connections(&self) -> &[Connection] {
        self.graph.connections()
    }

    /// Look up a node by name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.graph.find_node(name)
    }

    fn node_id(&self, name: &str) -> Result<NodeId, ConnectionError> {
        self.graph
            .find_node(name)
            .ok_or_else(|| ConnectionError::NodeNameNotFound(name.to_string()))
    }

    /// Commit the graph and spawn one thread per block
    ///
    /// `max_output_items` caps `noutput_items` for every `work()` call, on top of
    /// the configured cap.
    pub fn start(&mut self, max_output_items: usize) -> Result<(), RunError> {
        if self.scheduler.is_some() {
            return Err(RunError::AlreadyRunning);
        }
        self.graph.commit(&self.config)?;
        let wirings = self.graph.take_runtime()?;

        self.max_output_items = max_output_items.min(self.config.max_output_items).max(1);
        info!(
            "Starting pipeline with {} nodes (max_output_items={})",
            wirings.len(),
            self.max_output_items
        );
        let scheduler = Scheduler::start(wirings, &self.config, self.max_output_items);
        self.stats = scheduler.all_stats().to_vec();
        self.scheduler = Some(scheduler);
        self.state = RunState::Started;
        Ok(())
    }

    /// Ask every node to stop; safe to call at any time and more than once
    pub fn stop(&mut self) {
        if let Some(scheduler) = &self.scheduler {
            debug!("Stopping pipeline");
            scheduler.stop();
            self.state = RunState::Stopping;
        }
    }

    /// Join every node thread and report failures since the last `wait()`
    pub fn wait(&mut self) -> Result<(), RunError> {
        self.join();
        let failures = std::mem::take(&mut self.failures);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RunError::NodesFailed(failures))
        }
    }

    /// `start()` followed by `wait()`
    pub fn run(&mut self, max_output_items: usize) -> Result<(), RunError> {
        self.start(max_output_items)?;
        self.wait()
    }

    /// Stop the graph so its topology can be changed
    ///
    /// Calls nest; the graph restarts when the outermost `unlock()` runs.
    pub fn lock(&mut self) {
        self.lock_count += 1;
        if self.lock_count == 1 && self.scheduler.is_some() {
            info!("Locking pipeline for reconfiguration");
            self.stop();
            self.join();
            self.resume_on_unlock = true;
        }
    }

    /// Undo one `lock()`; the outermost unlock re-commits and restarts
    pub fn unlock(&mut self) -> Result<(), RunError> {
        if self.lock_count == 0 {
            return Err(RunError::NotLocked);
        }
        self.lock_count -= 1;
        if self.lock_count == 0 && self.resume_on_unlock {
            self.resume_on_unlock = false;
            info!("Unlocking pipeline, restarting");
            self.start(self.max_output_items)?;
        }
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether the graph is committed
    pub fn graph_state(&self) -> GraphState {
        self.graph.state()
    }

    /// State of one node thread (from the current or last run)
    pub fn node_state(&self, node: NodeId) -> Option<NodeState> {
        self.stats.get(node.as_usize()).map(|s| s.state())
    }

    /// Counters of every node (from the current or last run)
    pub fn node_stats(&self) -> Vec<NodeStatsSnapshot> {
        self.stats.iter().map(|s| s.snapshot()).collect()
    }

    /// Interrupt a blocked node so it re-checks its windows
    pub fn wake(&self, node: NodeId) -> bool {
        self.scheduler.as_ref().is_some_and(|s| s.wake(node))
    }

    /// Whether every node thread has finished
    pub fn is_finished(&self) -> bool {
        self.scheduler.as_ref().is_none_or(Scheduler::is_finished)
    }

    /// Join the scheduler, return blocks to the graph and drop the buffers
    fn join(&mut self) {
        let Some(scheduler) = self.scheduler.take() else {
            return;
        };
        let report = scheduler.wait();
        for (id, block) in report.blocks {
            self.graph.restore_block(id, block);
        }
        if !report.failures.is_empty() {
            warn!("{} node(s) failed", report.failures.len());
        }
        self.failures.extend(report.failures);
        self.graph.teardown();
        self.state = RunState::Stopped;
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{CopyBlock, NullSink, VectorSink, VectorSource};
    use crate::runtime::node::{InputPort, OutputPort, Signature, WorkError, WorkResult, WorkStatus};

    struct FailingBlock;

    impl Block for FailingBlock {
        fn name(&self) -> &str {
            "failing"
        }
        fn input_signature(&self) -> Signature {
            Signature::single::<f32>("in")
        }
        fn output_signature(&self) -> Signature {
            Signature::none()
        }
        fn work(&mut self, _inputs: &mut [InputPort], _outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
            Err(WorkError::NodeError("bad coefficients".to_string()))
        }
    }

    #[test]
    fn test_duplicate_node_names() {
        let mut pipeline = Pipeline::new();
        pipeline.add_block(NullSink::<f32>::new().with_name("node1")).unwrap();
        let err = pipeline.add_block(NullSink::<f32>::new().with_name("node1")).unwrap_err();
        assert_eq!(err, ConnectionError::DuplicateName("node1".to_string()));
    }

    #[test]
    fn test_connect_by_name() {
        let mut pipeline = Pipeline::new();
        pipeline.add_block(VectorSource::new(vec![1.0f32, 2.0]).with_name("src")).unwrap();
        pipeline.add_block(NullSink::<f32>::new().with_name("sink")).unwrap();

        pipeline.connect_by_name("src", 0, "sink", 0).unwrap();
        assert_eq!(pipeline.connections().len(), 1);
        assert!(pipeline.connect_by_name("src", 0, "missing", 0).is_err());
    }

    #[test]
    fn test_run_collects_everything() {
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_block(VectorSource::new((0..100u16).collect::<Vec<_>>())).unwrap();
        let copy = pipeline.add_block(CopyBlock::<u16>::new()).unwrap();
        let sink = VectorSink::<u16>::new();
        let data = sink.data();
        let sink = pipeline.add_block(sink).unwrap();

        pipeline.connect(src, 0, copy, 0).unwrap();
        pipeline.connect(copy, 0, sink, 0).unwrap();
        pipeline.run(16).unwrap();

        assert_eq!(*data.lock().unwrap(), (0..100).collect::<Vec<_>>());
        assert_eq!(pipeline.state(), RunState::Stopped);
        assert_eq!(pipeline.node_state(sink), Some(NodeState::Done));
        assert_eq!(pipeline.graph_state(), GraphState::Uncommitted);

        let stats = pipeline.node_stats();
        assert_eq!(stats[copy.as_usize()].items_produced, 100);
        assert!(stats[copy.as_usize()].work_calls >= 100 / 16);
    }

    #[test]
    fn test_node_error_reported_by_wait() {
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_block(VectorSource::new(vec![0.5f32; 8])).unwrap();
        let bad = pipeline.add_block(FailingBlock).unwrap();
        pipeline.connect(src, 0, bad, 0).unwrap();

        match pipeline.run(1024) {
            Err(RunError::NodesFailed(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].node, "failing");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(pipeline.node_state(bad), Some(NodeState::Error));
        // The failure is reported once
        assert!(pipeline.wait().is_ok());
    }

    #[test]
    fn test_stop_and_wait_before_start() {
        let mut pipeline = Pipeline::new();
        pipeline.stop();
        pipeline.stop();
        assert!(pipeline.wait().is_ok());
        assert_eq!(pipeline.state(), RunState::Created);
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_block(VectorSource::new(vec![1u8]).repeat(true)).unwrap();
        let sink = pipeline.add_block(NullSink::<u8>::new()).unwrap();
        pipeline.connect(src, 0, sink, 0).unwrap();

        pipeline.start(64).unwrap();
        assert!(matches!(pipeline.start(64), Err(RunError::AlreadyRunning)));
        pipeline.stop();
        pipeline.wait().unwrap();
    }

    #[test]
    fn test_unlock_without_lock() {
        let mut pipeline = Pipeline::new();
        assert!(matches!(pipeline.unlock(), Err(RunError::NotLocked)));
    }

    #[test]
    fn test_commit_error_surfaces_from_start() {
        let mut pipeline = Pipeline::new();
        pipeline.add_block(NullSink::<u8>::new()).unwrap();
        assert!(matches!(
            pipeline.start(64),
            Err(RunError::Graph(ConnectionError::UnconnectedPort { .. }))
        ));
        assert_eq!(pipeline.state(), RunState::Created);
    }
}
