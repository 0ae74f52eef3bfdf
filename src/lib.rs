//! Thread-per-block streaming runtime
//!
//! This library runs graphs of processing blocks connected by typed, fixed-size
//! item streams. Every block runs on its own thread; streams are single-writer,
//! multi-reader circular buffers with back-pressure.
//!
//! # Architecture
//!
//! - **Blocks**: implement [`Block`] and declare a [`Rate`] (sync, decimating,
//!   interpolating or general with a forecast) plus optional history
//! - **Buffers**: one [`CircularBuffer`] per connected output port, one reader per
//!   downstream edge
//! - **Graph**: [`FlowGraph`] validates the topology and allocates buffers on commit
//! - **Scheduler**: one thread per block, sleeping on a per-node notifier whenever
//!   it is starved of input or output space
//! - **Pipeline**: [`Pipeline`] controller with `start`/`stop`/`wait`/`run` and
//!   `lock`/`unlock` for reconfiguration
//!
//! # Example
//!
//! ```no_run
//! use ringflow::Pipeline;
//! use ringflow::blocks::{KeepOneInN, VectorSink, VectorSource};
//!
//! let mut pipeline = Pipeline::new();
//! let source = pipeline.add_block(VectorSource::new((0..1000u32).collect::<Vec<_>>()))?;
//! let decim = pipeline.add_block(KeepOneInN::<u32>::new(4))?;
//! let sink = VectorSink::<u32>::new();
//! let data = sink.data();
//! let sink = pipeline.add_block(sink)?;
//!
//! pipeline.connect(source, 0, decim, 0)?;
//! pipeline.connect(decim, 0, sink, 0)?;
//! pipeline.run(usize::MAX)?;
//! assert_eq!(data.lock().unwrap().len(), 250);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod blocks;
pub mod runtime;

// Re-export the runtime surface
pub use runtime::{
    Block, BufferError, CircularBuffer, Connection, ConnectionError, FlowConfig, FlowGraph,
    GraphState, InputPort, Item, NodeFailure, NodeId, NodeState, NodeStatsSnapshot, OutputPort,
    Pipeline, PortSchema, Rate, RunError, RunState, Signature, WorkError, WorkResult, WorkStatus,
    consume_each,
};
