//! Flow graph: topology, validation and buffer allocation
//!
//! Blocks live in an arena indexed by [`NodeId`]; connections are plain
//! `(node, port)` pairs. `commit()` validates the topology, orders it and
//! allocates one circular buffer per connected output port with one reader per
//! downstream edge.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use tracing::{debug, info};

use super::config::FlowConfig;
use super::errors::ConnectionError;
use super::node::Block;
use super::ports::{InputPort, OutputPort, PortDirection, PortSchema, Signature};
use super::rate::{Rate, lcm};

/// Unique identifier for a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Represents a connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from_node: NodeId,
    pub from_port: usize,
    pub to_node: NodeId,
    pub to_port: usize,
}

/// Whether runtime buffers have been allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Uncommitted,
    Committed,
}

struct NodeInfo {
    name: String,
    block: Option<Box<dyn Block>>,
    inputs: Signature,
    outputs: Signature,
    rate: Rate,
    history: usize,
    output_multiple: usize,
    ports: Option<(Vec<InputPort>, Vec<OutputPort>)>,
}

impl NodeInfo {
    /// Input items (look-back included) one unit of work needs on `port`
    fn unit_of_work(&self, port: usize, ninputs: usize) -> usize {
        let new_items = match self.rate.required_input(self.output_multiple, 1) {
            Some(n) => n,
            None => self
                .block
                .as_ref()
                .and_then(|b| b.forecast(self.output_multiple, ninputs).get(port).copied())
                .unwrap_or(self.output_multiple),
        };
        new_items.max(1) + self.history - 1
    }
}

/// Everything a node thread needs, moved out of the graph while running
pub(crate) struct NodeWiring {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) block: Box<dyn Block>,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) upstream: Vec<NodeId>,
    pub(crate) downstream: Vec<NodeId>,
    pub(crate) rate: Rate,
    pub(crate) history: usize,
    pub(crate) output_multiple: usize,
}

/// Directed graph of blocks connected port to port
pub struct FlowGraph {
    nodes: Vec<NodeInfo>,
    connections: Vec<Connection>,
    state: GraphState,
    order: Vec<NodeId>,
}

impl FlowGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            connections: Vec::new(),
            state: GraphState::Uncommitted,
            order: Vec::new(),
        }
    }

    /// Add a block; its name must be unique within the graph
    pub fn add_block<B: Block + 'static>(&mut self, block: B) -> Result<NodeId, ConnectionError> {
        self.add_boxed(Box::new(block))
    }

    /// Add an already boxed block
    pub fn add_boxed(&mut self, block: Box<dyn Block>) -> Result<NodeId, ConnectionError> {
        if self.state == GraphState::Committed {
            return Err(ConnectionError::AlreadyCommitted);
        }
        let name = block.name().to_string();
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(ConnectionError::DuplicateName(name));
        }

        let inputs = block.input_signature();
        let outputs = block.output_signature();
        let rate = block.rate();
        let invalid = |detail: String| ConnectionError::InvalidBlock {
            node: name.clone(),
            detail,
        };
        inputs.validate().map_err(|d| invalid(format!("inputs: {}", d)))?;
        outputs.validate().map_err(|d| invalid(format!("outputs: {}", d)))?;
        rate.validate().map_err(invalid)?;
        if block.history() == 0 {
            return Err(invalid("history must be at least 1".to_string()));
        }
        if block.output_multiple() == 0 {
            return Err(invalid("output multiple must be at least 1".to_string()));
        }

        let id = NodeId::new(self.nodes.len());
        debug!("Adding node {}: {} ({:?})", id, name, rate);
        self.nodes.push(NodeInfo {
            output_multiple: lcm(block.output_multiple(), rate.output_multiple()),
            history: block.history(),
            name,
            inputs,
            outputs,
            rate,
            block: Some(block),
            ports: None,
        });
        Ok(id)
    }

    fn info(&self, id: NodeId) -> Result<&NodeInfo, ConnectionError> {
        self.nodes
            .get(id.as_usize())
            .ok_or(ConnectionError::NodeNotFound(id.as_usize()))
    }

    /// Connect an output port to an input port
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_port: usize,
        to_node: NodeId,
        to_port: usize,
    ) -> Result<(), ConnectionError> {
        if self.state == GraphState::Committed {
            return Err(ConnectionError::AlreadyCommitted);
        }
        let from_info = self.info(from_node)?;
        let to_info = self.info(to_node)?;

        let from_schema = port_schema(&from_info.name, &from_info.outputs, from_port, PortDirection::Output)?;
        let to_schema = port_schema(&to_info.name, &to_info.inputs, to_port, PortDirection::Input)?;

        if !from_schema.compatible_with(to_schema) {
            return Err(ConnectionError::TypeMismatch {
                from_node: from_info.name.clone(),
                from_port,
                from_type: from_schema.type_name,
                from_size: from_schema.item_size,
                to_node: to_info.name.clone(),
                to_port,
                to_type: to_schema.type_name,
                to_size: to_schema.item_size,
            });
        }

        if self
            .connections
            .iter()
            .any(|c| c.to_node == to_node && c.to_port == to_port)
        {
            return Err(ConnectionError::AlreadyConnected {
                node: to_info.name.clone(),
                port: to_port,
            });
        }

        debug!(
            "Connecting {}.{} -> {}.{}",
            from_info.name, from_port, to_info.name, to_port
        );
        self.connections.push(Connection {
            from_node,
            from_port,
            to_node,
            to_port,
        });
        Ok(())
    }

    /// Remove one connection
    pub fn disconnect(
        &mut self,
        from_node: NodeId,
        from_port: usize,
        to_node: NodeId,
        to_port: usize,
    ) -> Result<(), ConnectionError> {
        if self.state == GraphState::Committed {
            return Err(ConnectionError::AlreadyCommitted);
        }
        let wanted = Connection {
            from_node,
            from_port,
            to_node,
            to_port,
        };
        let position = self.connections.iter().position(|c| *c == wanted);
        match position {
            Some(i) => {
                self.connections.remove(i);
                Ok(())
            }
            None => Err(ConnectionError::NotConnected {
                from_node: self.info(from_node)?.name.clone(),
                from_port,
                to_node: self.info(to_node)?.name.clone(),
                to_port,
            }),
        }
    }

    /// Remove every connection touching `node`
    pub fn disconnect_all(&mut self, node: NodeId) -> Result<(), ConnectionError> {
        if self.state == GraphState::Committed {
            return Err(ConnectionError::AlreadyCommitted);
        }
        self.info(node)?;
        self.connections
            .retain(|c| c.from_node != node && c.to_node != node);
        Ok(())
    }

    /// All connections in insertion order
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Name of a node
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.as_usize()).map(|n| n.name.as_str())
    }

    /// Look up a node by name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(NodeId::new)
    }

    /// Current state
    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Topological order computed by the last commit
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Validate the topology and allocate runtime buffers
    pub fn commit(&mut self, config: &FlowConfig) -> Result<(), ConnectionError> {
        if self.state == GraphState::Committed {
            return Ok(());
        }
        if let Some(node) = self.nodes.iter().find(|n| n.block.is_none()) {
            return Err(ConnectionError::BlockUnavailable(node.name.clone()));
        }
        self.validate()?;
        self.order = self.sort()?;

        let mut inputs: Vec<BTreeMap<usize, InputPort>> =
            (0..self.nodes.len()).map(|_| BTreeMap::new()).collect();
        let mut outputs: Vec<BTreeMap<usize, OutputPort>> =
            (0..self.nodes.len()).map(|_| BTreeMap::new()).collect();

        for (key, edges) in self.fanout() {
            let (from_node, from_port) = key;
            let producer = &self.nodes[from_node.as_usize()];
            let Some(schema) = producer.outputs.port(from_port) else {
                continue;
            };

            let histories: Vec<usize> = edges
                .iter()
                .map(|c| self.nodes[c.to_node.as_usize()].history)
                .collect();
            let capacity = self.buffer_capacity(producer, schema.item_size, &edges, config);
            let wired = (schema.wire)(capacity, &histories);
            debug!(
                "Buffer {}.{}: {} items of {} bytes, {} reader(s)",
                producer.name,
                from_port,
                wired.capacity,
                schema.item_size,
                wired.readers.len()
            );

            outputs[from_node.as_usize()].insert(from_port, OutputPort::new(wired.writer, from_port));
            for (edge, reader) in edges.iter().zip(wired.readers) {
                inputs[edge.to_node.as_usize()].insert(edge.to_port, InputPort::new(reader, edge.to_port));
            }
        }

        for ((node, ins), outs) in self.nodes.iter_mut().zip(inputs).zip(outputs) {
            node.ports = Some((ins.into_values().collect(), outs.into_values().collect()));
        }
        self.state = GraphState::Committed;
        info!(
            "Committed graph with {} nodes and {} connections",
            self.nodes.len(),
            self.connections.len()
        );
        Ok(())
    }

    /// Drop runtime buffers and return to the uncommitted state
    pub fn teardown(&mut self) {
        for node in &mut self.nodes {
            node.ports = None;
        }
        self.state = GraphState::Uncommitted;
    }

    /// Check arity and connectivity of every node
    fn validate(&self) -> Result<(), ConnectionError> {
        for (index, node) in self.nodes.iter().enumerate() {
            let id = NodeId::new(index);

            let connected_inputs: BTreeSet<usize> = self
                .connections
                .iter()
                .filter(|c| c.to_node == id)
                .map(|c| c.to_port)
                .collect();
            let ninputs = connected_inputs.len();
            if let Some(gap) = (0..ninputs).find(|p| !connected_inputs.contains(p)) {
                return Err(ConnectionError::UnconnectedPort {
                    node: node.name.clone(),
                    port: gap,
                });
            }
            if ninputs < node.inputs.min_streams {
                return Err(ConnectionError::UnconnectedPort {
                    node: node.name.clone(),
                    port: ninputs,
                });
            }

            let connected_outputs: BTreeSet<usize> = self
                .connections
                .iter()
                .filter(|c| c.from_node == id)
                .map(|c| c.from_port)
                .collect();
            let noutputs = connected_outputs.len();
            if let Some(gap) = (0..noutputs).find(|p| !connected_outputs.contains(p)) {
                return Err(ConnectionError::ArityViolation {
                    node: node.name.clone(),
                    detail: format!("output port {} is not connected but a later port is", gap),
                });
            }
            if !node.outputs.allows(noutputs) {
                return Err(ConnectionError::ArityViolation {
                    node: node.name.clone(),
                    detail: format!(
                        "{} connected output(s), signature requires at least {}",
                        noutputs, node.outputs.min_streams
                    ),
                });
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over node-level edges
    fn sort(&self) -> Result<Vec<NodeId>, ConnectionError> {
        let mut indegree = vec![0usize; self.nodes.len()];
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        for c in &self.connections {
            if successors[c.from_node.as_usize()].insert(c.to_node.as_usize()) {
                indegree[c.to_node.as_usize()] += 1;
            }
        }

        let mut ready: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| indegree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_front() {
            order.push(NodeId::new(i));
            for &next in &successors[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .find(|&i| indegree[i] > 0)
                .unwrap_or_default();
            return Err(ConnectionError::Cycle(self.nodes[stuck].name.clone()));
        }
        Ok(order)
    }

    /// Connections grouped by producing output port
    fn fanout(&self) -> BTreeMap<(NodeId, usize), Vec<Connection>> {
        let mut groups: BTreeMap<(NodeId, usize), Vec<Connection>> = BTreeMap::new();
        for c in &self.connections {
            groups.entry((c.from_node, c.from_port)).or_default().push(*c);
        }
        groups
    }

    /// Capacity policy: at least `min_buffer_bytes`, and at least two units of
    /// work for the producer and for every consumer.
    fn buffer_capacity(
        &self,
        producer: &NodeInfo,
        item_size: usize,
        edges: &[Connection],
        config: &FlowConfig,
    ) -> usize {
        let floor = (config.min_buffer_bytes / item_size.max(1)).max(1);
        let largest_unit = edges
            .iter()
            .map(|c| {
                let consumer = &self.nodes[c.to_node.as_usize()];
                let ninputs = self
                    .connections
                    .iter()
                    .filter(|e| e.to_node == c.to_node)
                    .count();
                consumer.unit_of_work(c.to_port, ninputs)
            })
            .fold(producer.output_multiple, usize::max);
        floor.max(largest_unit.saturating_mul(2))
    }

    /// Move blocks and ports out for the scheduler
    pub(crate) fn take_runtime(&mut self) -> Result<Vec<NodeWiring>, ConnectionError> {
        let mut wirings = Vec::with_capacity(self.nodes.len());
        for &id in &self.order {
            let upstream: BTreeSet<NodeId> = self
                .connections
                .iter()
                .filter(|c| c.to_node == id)
                .map(|c| c.from_node)
                .collect();
            let downstream: BTreeSet<NodeId> = self
                .connections
                .iter()
                .filter(|c| c.from_node == id)
                .map(|c| c.to_node)
                .collect();

            let node = &mut self.nodes[id.as_usize()];
            let block = node
                .block
                .take()
                .ok_or_else(|| ConnectionError::BlockUnavailable(node.name.clone()))?;
            let (inputs, outputs) = node.ports.take().unwrap_or_default();
            wirings.push(NodeWiring {
                id,
                name: node.name.clone(),
                block,
                inputs,
                outputs,
                upstream: upstream.into_iter().collect(),
                downstream: downstream.into_iter().collect(),
                rate: node.rate,
                history: node.history,
                output_multiple: node.output_multiple,
            });
        }
        Ok(wirings)
    }

    /// Hand a block back after its thread finished
    pub(crate) fn restore_block(&mut self, id: NodeId, block: Box<dyn Block>) {
        if let Some(node) = self.nodes.get_mut(id.as_usize()) {
            node.block = Some(block);
        }
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn port_schema<'a>(
    node: &str,
    signature: &'a Signature,
    port: usize,
    direction: PortDirection,
) -> Result<&'a PortSchema, ConnectionError> {
    if let Some(schema) = signature.port(port) {
        return Ok(schema);
    }
    match signature.max_streams {
        Some(max) if max > 0 && port >= max => Err(ConnectionError::ArityViolation {
            node: node.to_string(),
            detail: format!(
                "{} port {} exceeds max_streams {}",
                direction, port, max
            ),
        }),
        _ => Err(ConnectionError::PortNotFound {
            node: node.to_string(),
            port,
        }),
    }
}
