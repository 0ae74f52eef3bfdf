//! Decimator that keeps the first item of every group

use crate::runtime::node::{Block, InputPort, OutputPort, Rate, Signature, WorkResult, WorkStatus};
use crate::runtime::ports::Item;

/// Keeps one item out of every `n`
pub struct KeepOneInN<T> {
    name: String,
    n: usize,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T: Item> KeepOneInN<T> {
    pub fn new(n: usize) -> Self {
        Self {
            name: "keep_one_in_n".to_string(),
            n,
            _item: std::marker::PhantomData,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Item> Block for KeepOneInN<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> Signature {
        Signature::single::<T>("in")
    }

    fn output_signature(&self) -> Signature {
        Signature::single::<T>("out")
    }

    fn rate(&self) -> Rate {
        Rate::Decimate(self.n)
    }

    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let items = inputs[0].items::<T>()?;
        let out = outputs[0].items_mut::<T>()?;
        for (slot, group) in out.iter_mut().zip(items.chunks_exact(self.n)) {
            *slot = group[0];
        }
        Ok(WorkStatus::Produced(out.len()))
    }
}
