//! Source that plays back a vector

use crate::runtime::node::{Block, InputPort, OutputPort, Signature, WorkResult, WorkStatus};
use crate::runtime::ports::Item;

/// Emits the items of a vector once (or forever when repeating), then finishes
pub struct VectorSource<T> {
    name: String,
    data: Vec<T>,
    position: usize,
    repeat: bool,
}

impl<T: Item> VectorSource<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            name: "vector_source".to_string(),
            data,
            position: 0,
            repeat: false,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Start over at the beginning instead of finishing
    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }
}

impl<T: Item> Block for VectorSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> Signature {
        Signature::none()
    }

    fn output_signature(&self) -> Signature {
        Signature::single::<T>("out")
    }

    fn work(&mut self, _inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        if self.data.is_empty() || (!self.repeat && self.position >= self.data.len()) {
            return Ok(WorkStatus::Done);
        }

        let out = outputs[0].items_mut::<T>()?;
        let mut written = 0;
        while written < out.len() {
            if self.position == self.data.len() {
                if !self.repeat {
                    break;
                }
                self.position = 0;
            }
            let n = (out.len() - written).min(self.data.len() - self.position);
            out[written..written + n].copy_from_slice(&self.data[self.position..self.position + n]);
            written += n;
            self.position += n;
        }
        Ok(WorkStatus::Produced(written))
    }
}
