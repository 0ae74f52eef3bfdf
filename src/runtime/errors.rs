//! Error types for the runtime system

use std::fmt;

/// Error type for graph construction and validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Node {0} not found")]
    NodeNotFound(usize),

    #[error("Node '{0}' not found")]
    NodeNameNotFound(String),

    #[error("Port {port} not found on node '{node}'")]
    PortNotFound { node: String, port: usize },

    #[error(
        "Type mismatch: {from_node}.{from_port} ({from_type}, {from_size} bytes) -> {to_node}.{to_port} ({to_type}, {to_size} bytes)"
    )]
    TypeMismatch {
        from_node: String,
        from_port: usize,
        from_type: &'static str,
        from_size: usize,
        to_node: String,
        to_port: usize,
        to_type: &'static str,
        to_size: usize,
    },

    #[error("Input port {port} on node '{node}' is already connected")]
    AlreadyConnected { node: String, port: usize },

    #[error("Arity violation on node '{node}': {detail}")]
    ArityViolation { node: String, detail: String },

    #[error("Input port {port} on node '{node}' is not connected")]
    UnconnectedPort { node: String, port: usize },

    #[error("Node with name '{0}' already exists")]
    DuplicateName(String),

    #[error("Invalid block '{node}': {detail}")]
    InvalidBlock { node: String, detail: String },

    #[error("Block '{0}' was lost when its thread terminated")]
    BlockUnavailable(String),

    #[error("Graph contains a cycle through node '{0}'")]
    Cycle(String),

    #[error("Graph is committed; lock the pipeline before changing its topology")]
    AlreadyCommitted,

    #[error("No connection {from_node}.{from_port} -> {to_node}.{to_port}")]
    NotConnected {
        from_node: String,
        from_port: usize,
        to_node: String,
        to_port: usize,
    },
}

/// Error type for circular buffer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("Write of {requested} items exceeds free space of {free} items")]
    Overrun { requested: usize, free: usize },

    #[error("Window of {requested} items exceeds the {available} items available")]
    InsufficientInput { requested: usize, available: usize },
}

/// Error type for work function operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkError {
    #[error("Node-specific error: {0}")]
    NodeError(String),

    #[error("Port carries {actual}, not {requested}")]
    TypeMismatch {
        requested: &'static str,
        actual: &'static str,
    },

    #[error("Produced {produced} items on output {port} but only {capacity} were offered")]
    Overproduced {
        port: usize,
        produced: usize,
        capacity: usize,
    },

    #[error("Consumed {consumed} items on input {port} but only {available} were available")]
    Overconsumed {
        port: usize,
        consumed: usize,
        available: usize,
    },

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("work() panicked: {0}")]
    Panicked(String),
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;

/// A node that terminated with an error while the graph was running
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub node: String,
    pub error: WorkError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.node, self.error)
    }
}

/// Error type returned by the top-level controller
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Graph(#[from] ConnectionError),

    #[error("{} node(s) failed: {}", .0.len(), join_failures(.0))]
    NodesFailed(Vec<NodeFailure>),

    #[error("Pipeline is not locked")]
    NotLocked,

    #[error("Pipeline is already running")]
    AlreadyRunning,
}

fn join_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_failed_lists_every_node() {
        let err = RunError::NodesFailed(vec![
            NodeFailure {
                node: "fir".to_string(),
                error: WorkError::NodeError("bad taps".to_string()),
            },
            NodeFailure {
                node: "sink".to_string(),
                error: WorkError::Panicked("boom".to_string()),
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 node(s) failed"));
        assert!(text.contains("[fir] Node-specific error: bad taps"));
        assert!(text.contains("[sink] work() panicked: boom"));
    }

    #[test]
    fn test_buffer_error_converts_into_work_error() {
        let err: WorkError = BufferError::Overrun {
            requested: 10,
            free: 4,
        }
        .into();
        assert!(matches!(err, WorkError::Buffer(BufferError::Overrun { .. })));
    }
}
