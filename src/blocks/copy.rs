//! One-to-many pass-through

use std::marker::PhantomData;

use crate::runtime::node::{Block, InputPort, OutputPort, Signature, WorkResult, WorkStatus};
use crate::runtime::ports::Item;

/// Copies its input to every connected output
pub struct CopyBlock<T> {
    name: String,
    _item: PhantomData<fn() -> T>,
}

impl<T: Item> CopyBlock<T> {
    pub fn new() -> Self {
        Self {
            name: "copy".to_string(),
            _item: PhantomData,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Item> Default for CopyBlock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for CopyBlock<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> Signature {
        Signature::single::<T>("in")
    }

    fn output_signature(&self) -> Signature {
        Signature::range::<T>(1, None, "out")
    }

    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let items = inputs[0].items::<T>()?;
        for output in outputs.iter_mut() {
            output.items_mut::<T>()?.copy_from_slice(&items);
        }
        Ok(WorkStatus::Produced(items.len()))
    }
}
