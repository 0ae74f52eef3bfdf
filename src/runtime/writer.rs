//! Producer end of a circular buffer
//!
//! A block writes its output into a scratch window owned by the producing
//! node's thread. After `work()` returns, the executor commits the produced
//! prefix into the ring in one short write, so readers keep reading committed
//! items while the producer computes.

use std::any::Any;
use std::sync::Arc;

use super::buffer::CircularBuffer;
use super::errors::BufferError;
use super::ports::Item;

/// Typed writer for one output port
pub struct BufferWriter<T> {
    buffer: Arc<CircularBuffer<T>>,
    scratch: Vec<T>,
}

impl<T: Item> BufferWriter<T> {
    pub(crate) fn new(buffer: Arc<CircularBuffer<T>>) -> Self {
        Self {
            buffer,
            scratch: Vec::new(),
        }
    }

    /// Items that can be written without overrunning a reader
    pub fn space_available(&self) -> usize {
        self.buffer.space_available()
    }

    /// Mutable output window of `n_items` slots
    pub fn window(&mut self, n_items: usize) -> &mut [T] {
        if self.scratch.len() < n_items {
            self.scratch.resize(n_items, T::default());
        }
        &mut self.scratch[..n_items]
    }

    /// Commit the first `n_items` slots of the window into the ring
    pub fn commit(&mut self, n_items: usize) -> Result<(), BufferError> {
        if n_items > self.scratch.len() {
            return Err(BufferError::Overrun {
                requested: n_items,
                free: self.scratch.len(),
            });
        }
        // SAFETY: a buffer gets exactly one writer and commit takes `&mut self`.
        unsafe { self.buffer.write(&self.scratch[..n_items]) }
    }

    /// Total items committed through this writer
    pub fn total_items_written(&self) -> u64 {
        self.buffer.total_items_written()
    }

    /// The buffer this writer fills
    pub fn buffer(&self) -> &CircularBuffer<T> {
        &self.buffer
    }
}

/// Type-erased writer operations used by the executor
pub(crate) trait StreamWriter: Send {
    fn space_available(&self) -> usize;
    fn prepare(&mut self, n_items: usize);
    fn commit(&mut self, n_items: usize) -> Result<(), BufferError>;
    fn total_items_written(&self) -> u64;
    fn set_done(&self);
    fn all_readers_detached(&self) -> bool;
    fn type_name(&self) -> &'static str;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Item> StreamWriter for BufferWriter<T> {
    fn space_available(&self) -> usize {
        BufferWriter::space_available(self)
    }

    fn prepare(&mut self, n_items: usize) {
        self.window(n_items);
    }

    fn commit(&mut self, n_items: usize) -> Result<(), BufferError> {
        BufferWriter::commit(self, n_items)
    }

    fn total_items_written(&self) -> u64 {
        BufferWriter::total_items_written(self)
    }

    fn set_done(&self) {
        self.buffer.set_done();
    }

    fn all_readers_detached(&self) -> bool {
        self.buffer.all_readers_detached()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
