//! Pass-through that stops after a fixed number of items

use crate::runtime::node::{Block, InputPort, OutputPort, Signature, WorkResult, WorkStatus};
use crate::runtime::ports::Item;

/// Forwards the first `limit` items, then finishes
pub struct Head<T> {
    name: String,
    limit: u64,
    forwarded: u64,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T: Item> Head<T> {
    pub fn new(limit: u64) -> Self {
        Self {
            name: "head".to_string(),
            limit,
            forwarded: 0,
            _item: std::marker::PhantomData,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Item> Block for Head<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> Signature {
        Signature::single::<T>("in")
    }

    fn output_signature(&self) -> Signature {
        Signature::single::<T>("out")
    }

    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let remaining = self.limit - self.forwarded;
        if remaining == 0 {
            return Ok(WorkStatus::Done);
        }
        let items = inputs[0].items::<T>()?;
        let n = items.len().min(remaining as usize);
        outputs[0].items_mut::<T>()?[..n].copy_from_slice(&items[..n]);
        self.forwarded += n as u64;
        Ok(WorkStatus::Produced(n))
    }
}
