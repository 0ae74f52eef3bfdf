//! Per-consumer cursor into a circular buffer
//!
//! - [`BufferReader`] is the typed reader one input port owns. It reports how many
//!   items are available, exposes windows that include the node's look-back
//!   (history) items, and releases items with `advance`.
//!
//! - [`StreamReader`] is the type-erased view the executor drives without knowing
//!   the item type.

use std::any::Any;
use std::sync::Arc;

use super::buffer::{CircularBuffer, ReaderCursor, Window};
use super::errors::BufferError;
use super::ports::Item;

/// Typed reader over one [`CircularBuffer`]
///
/// Only the consuming node's thread advances a reader; any thread may query it.
pub struct BufferReader<T> {
    buffer: Arc<CircularBuffer<T>>,
    cursor: Arc<ReaderCursor>,
}

impl<T: Item> BufferReader<T> {
    pub(crate) fn new(buffer: Arc<CircularBuffer<T>>, cursor: Arc<ReaderCursor>) -> Self {
        Self { buffer, cursor }
    }

    /// Items committed by the writer and not yet released by this reader
    ///
    /// Computed from the monotonic totals. When the ring indices coincide the
    /// buffer is either empty or exactly full; the totals decide which.
    pub fn items_available(&self) -> usize {
        let written = self.buffer.total_items_written();
        let read = self.cursor.total_items_read();
        if written <= read {
            return 0;
        }
        let capacity = self.buffer.capacity() as u64;
        if written % capacity == read % capacity {
            return self.buffer.capacity();
        }
        (written - read) as usize
    }

    /// Longest run of available items that can be viewed as one slice
    ///
    /// The ring is mirrored, so this never falls short of `items_available()`.
    pub fn contiguous_items(&self) -> usize {
        self.items_available()
    }

    /// Release `n_items` from the front of this reader's window
    ///
    /// Takes `&mut self` so no window borrowed from this reader can outlive the
    /// release of its items.
    pub fn advance(&mut self, n_items: usize) -> Result<(), BufferError> {
        let available = self.items_available();
        if n_items > available {
            return Err(BufferError::InsufficientInput {
                requested: n_items,
                available,
            });
        }
        let read = self.cursor.total_items_read();
        self.cursor.store_read(read + n_items as u64);
        Ok(())
    }

    /// View `history() - 1` look-back items followed by `n_items` new items
    ///
    /// The window starts at the read position; the first `history() - 1` items
    /// are the tail of what the previous call already saw.
    pub fn peek_window(&self, n_items: usize) -> Result<Window<'_, T>, BufferError> {
        let len = self.history() - 1 + n_items;
        // SAFETY: the window starts at this reader's live cursor, and the cursor
        // cannot move while the returned borrow of `self` is alive.
        unsafe { self.buffer.window(self.cursor.total_items_read(), len) }
    }

    /// History requirement applied by the owning node
    pub fn history(&self) -> usize {
        self.cursor.history()
    }

    /// Ring index of the next unread item
    pub fn read_index(&self) -> usize {
        (self.cursor.total_items_read() % self.buffer.capacity() as u64) as usize
    }

    /// Total items released by this reader
    pub fn total_items_read(&self) -> u64 {
        self.cursor.total_items_read()
    }

    /// Whether the producer finished; remaining items can still be read
    pub fn is_upstream_done(&self) -> bool {
        self.buffer.is_done()
    }

    /// Release this reader's hold on the buffer
    pub fn detach(&mut self) {
        self.cursor.detach();
    }

    /// The buffer this reader points into
    pub fn buffer(&self) -> &CircularBuffer<T> {
        &self.buffer
    }
}

/// Type-erased reader operations used by the executor
pub(crate) trait StreamReader: Send {
    fn items_available(&self) -> usize;
    fn advance(&mut self, n_items: usize) -> Result<(), BufferError>;
    fn history(&self) -> usize;
    fn total_items_read(&self) -> u64;
    fn is_upstream_done(&self) -> bool;
    fn detach(&mut self);
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Item> StreamReader for BufferReader<T> {
    fn items_available(&self) -> usize {
        BufferReader::items_available(self)
    }

    fn advance(&mut self, n_items: usize) -> Result<(), BufferError> {
        BufferReader::advance(self, n_items)
    }

    fn history(&self) -> usize {
        BufferReader::history(self)
    }

    fn total_items_read(&self) -> u64 {
        BufferReader::total_items_read(self)
    }

    fn is_upstream_done(&self) -> bool {
        BufferReader::is_upstream_done(self)
    }

    fn detach(&mut self) {
        BufferReader::detach(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
