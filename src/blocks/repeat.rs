//! Interpolator that repeats every item

use crate::runtime::node::{Block, InputPort, OutputPort, Rate, Signature, WorkResult, WorkStatus};
use crate::runtime::ports::Item;

/// Emits each input item `n` times
pub struct Repeat<T> {
    name: String,
    n: usize,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T: Item> Repeat<T> {
    pub fn new(n: usize) -> Self {
        Self {
            name: "repeat".to_string(),
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

impl<T: Item> Block for Repeat<T> {
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
        Rate::Interpolate(self.n)
    }

    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let items = inputs[0].items::<T>()?;
        let out = outputs[0].items_mut::<T>()?;
        for (group, item) in out.chunks_exact_mut(self.n).zip(items.iter()) {
            group.fill(*item);
        }
        Ok(WorkStatus::Produced(out.len()))
    }
}
