//! Runtime support for streaming block graphs

pub mod buffer;
pub mod config;
pub mod errors;
mod executor;
pub mod graph;
pub mod node;
pub mod notify;
pub mod pipeline;
pub mod ports;
pub mod rate;
pub mod reader;
pub mod scheduler;
pub mod watchdog;
pub mod writer;

pub use buffer::{CircularBuffer, ReaderCursor, Window};
pub use config::FlowConfig;
pub use errors::{BufferError, ConnectionError, NodeFailure, RunError, WorkError, WorkResult};
pub use graph::{Connection, FlowGraph, GraphState, NodeId};
pub use node::{Block, WorkStatus};
pub use pipeline::{Pipeline, RunState};
pub use ports::{InputPort, Item, OutputPort, PortDirection, PortSchema, Signature, consume_each};
pub use rate::Rate;
pub use reader::BufferReader;
pub use scheduler::{NodeState, NodeStats, NodeStatsSnapshot, Scheduler};
pub use watchdog::Watchdog;
pub use writer::BufferWriter;
