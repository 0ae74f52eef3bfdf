//! Sink that records everything it receives

use std::sync::{Arc, Mutex, PoisonError};

use crate::runtime::node::{Block, InputPort, OutputPort, Signature, WorkResult, WorkStatus};
use crate::runtime::ports::Item;

/// Appends every input item to a shared vector
pub struct VectorSink<T> {
    name: String,
    data: Arc<Mutex<Vec<T>>>,
}

impl<T: Item> VectorSink<T> {
    pub fn new() -> Self {
        Self {
            name: "vector_sink".to_string(),
            data: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Handle to the collected items, usable after the block moved into its thread
    pub fn data(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.data)
    }
}

impl<T: Item> Default for VectorSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for VectorSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> Signature {
        Signature::single::<T>("in")
    }

    fn output_signature(&self) -> Signature {
        Signature::none()
    }

    fn work(&mut self, inputs: &mut [InputPort], _outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let items = inputs[0].items::<T>()?;
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&items);
        Ok(WorkStatus::Produced(items.len()))
    }
}
