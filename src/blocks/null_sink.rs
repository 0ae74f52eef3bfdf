//! Sink that discards its input

use std::marker::PhantomData;

use crate::runtime::node::{Block, InputPort, OutputPort, Signature, WorkResult, WorkStatus};
use crate::runtime::ports::Item;

/// Consumes any number of streams and drops the items
pub struct NullSink<T> {
    name: String,
    _item: PhantomData<fn() -> T>,
}

impl<T: Item> NullSink<T> {
    pub fn new() -> Self {
        Self {
            name: "null_sink".to_string(),
            _item: PhantomData,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Item> Default for NullSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for NullSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> Signature {
        Signature::range::<T>(1, None, "in")
    }

    fn output_signature(&self) -> Signature {
        Signature::none()
    }

    fn work(&mut self, inputs: &mut [InputPort], _outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        Ok(WorkStatus::Produced(inputs[0].len()))
    }
}
