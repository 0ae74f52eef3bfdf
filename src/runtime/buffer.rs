//! Single-writer, multi-reader circular buffers
//!
//! A [`CircularBuffer`] holds the output stream of exactly one producer port.
//! Every downstream edge gets its own [`ReaderCursor`] so readers advance
//! independently; the writer may only overwrite slots that every attached reader
//! has released.
//!
//! ## Layout
//!
//! The slot vector is twice the logical capacity and every committed item is
//! stored at `p` and `p + capacity`. Any window of up to `capacity` items that
//! starts inside the ring is therefore a single contiguous slice, so a reader
//! never has to split a window at the wrap point.
//!
//! ## Counters
//!
//! Positions are tracked as monotonic `u64` totals (`total_items_written`,
//! `total_items_read`). Ring indices are derived from them (`total % capacity`),
//! which removes the full/empty ambiguity of comparing raw indices.
//!
//! Totals are published with `Release` after the slots are written and read with
//! `Acquire`, so a reader never observes a count whose items are not yet stored.
//!
//! ## Sharing
//!
//! There is no lock around the slots. The single writer only touches positions
//! `[written, slowest_read + capacity)`, and a live reader only views positions
//! `[read, written)`. Both ranges lie inside one span of `capacity` positions
//! starting at the slowest reader, so they never share a ring index or its
//! mirror. A reader therefore keeps its window for the whole `work()` call
//! while the producer commits concurrently.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::errors::BufferError;
use super::ports::Item;
use super::reader::{BufferReader, StreamReader};
use super::writer::{BufferWriter, StreamWriter};

/// Read position of one consumer of a [`CircularBuffer`]
#[derive(Debug)]
pub struct ReaderCursor {
    total_read: AtomicU64,
    history: usize,
    detached: AtomicBool,
}

impl ReaderCursor {
    fn new(history: usize) -> Self {
        Self {
            total_read: AtomicU64::new(0),
            history: history.max(1),
            detached: AtomicBool::new(false),
        }
    }

    /// Total number of items this reader has released
    pub fn total_items_read(&self) -> u64 {
        self.total_read.load(Ordering::Acquire)
    }

    /// History requirement of the owning node (`1` means no look-back)
    pub fn history(&self) -> usize {
        self.history
    }

    /// Whether the consuming node has terminated
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn store_read(&self, total: u64) {
        self.total_read.store(total, Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }
}

/// Fixed-capacity ring of items written by one producer
pub struct CircularBuffer<T> {
    capacity: usize,
    slots: Box<[UnsafeCell<T>]>,
    total_written: AtomicU64,
    done: AtomicBool,
    readers: Vec<Arc<ReaderCursor>>,
}

// SAFETY: slots are only written through `write`, which has a single caller per
// buffer (its `BufferWriter`), and only at positions no live reader can view.
// Readers publish their release with `Release` and the writer reads it with
// `Acquire` before reusing a slot.
unsafe impl<T: Item> Sync for CircularBuffer<T> {}

impl<T: Item> CircularBuffer<T> {
    /// Create a buffer holding `capacity` items (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: (0..capacity * 2).map(|_| UnsafeCell::new(T::default())).collect(),
            total_written: AtomicU64::new(0),
            done: AtomicBool::new(false),
            readers: Vec::new(),
        }
    }

    /// Attach a reader. Readers can only be added before the buffer is shared.
    pub fn add_reader(&mut self, history: usize) -> Arc<ReaderCursor> {
        let cursor = Arc::new(ReaderCursor::new(history));
        self.readers.push(Arc::clone(&cursor));
        cursor
    }

    /// Capacity in items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of one item in bytes
    pub fn item_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    /// Number of attached readers
    pub fn num_readers(&self) -> usize {
        self.readers.len()
    }

    /// Monotonic count of items ever committed
    pub fn total_items_written(&self) -> u64 {
        self.total_written.load(Ordering::Acquire)
    }

    /// Ring index of the next write
    pub fn write_index(&self) -> usize {
        (self.total_items_written() % self.capacity as u64) as usize
    }

    /// Read total of the slowest reader that is still attached
    ///
    /// Returns `None` when no live reader remains.
    fn slowest_reader(&self) -> Option<u64> {
        self.readers
            .iter()
            .filter(|r| !r.is_detached())
            .map(|r| r.total_items_read())
            .min()
    }

    /// Items the producer may write without overrunning any live reader
    pub fn space_available(&self) -> usize {
        let written = self.total_items_written();
        match self.slowest_reader() {
            Some(read) => {
                let in_use = written.saturating_sub(read) as usize;
                self.capacity.saturating_sub(in_use)
            }
            None => self.capacity,
        }
    }

    /// Bytes the producer may write without overrunning any live reader
    pub fn bytes_free_for_writer(&self) -> usize {
        self.space_available() * self.item_size()
    }

    /// Whether every attached reader has been detached
    pub fn all_readers_detached(&self) -> bool {
        !self.readers.is_empty() && self.readers.iter().all(|r| r.is_detached())
    }

    /// Append `items` at the write position, wrapping at capacity
    ///
    /// Fails with [`BufferError::Overrun`] if `items` does not fit in the space
    /// left by the slowest reader; nothing is written in that case.
    ///
    /// # Safety
    ///
    /// At most one thread may call `write` on a buffer at any time.
    pub(crate) unsafe fn write(&self, items: &[T]) -> Result<(), BufferError> {
        let n = items.len();
        if n == 0 {
            return Ok(());
        }
        let free = self.space_available();
        if n > free {
            return Err(BufferError::Overrun { requested: n, free });
        }

        let written = self.total_items_written();
        let cap = self.capacity;
        let start = (written % cap as u64) as usize;
        let first = n.min(cap - start);
        let rest = n - first;
        let base = UnsafeCell::raw_get(self.slots.as_ptr());
        // SAFETY: positions written..written+n are beyond every live reader's
        // window (checked against space_available above) and the caller is the
        // only writer. All four ranges are inside the 2 * capacity slots.
        unsafe {
            std::ptr::copy_nonoverlapping(items.as_ptr(), base.add(start), first);
            std::ptr::copy_nonoverlapping(items.as_ptr(), base.add(start + cap), first);
            if rest > 0 {
                std::ptr::copy_nonoverlapping(items.as_ptr().add(first), base, rest);
                std::ptr::copy_nonoverlapping(items.as_ptr().add(first), base.add(cap), rest);
            }
        }
        self.total_written.store(written + n as u64, Ordering::Release);
        Ok(())
    }

    /// Borrow `len` committed items starting at absolute position `start`
    ///
    /// # Safety
    ///
    /// A live reader cursor must sit at or before `start` and must not release
    /// past `start + len` while the window is alive.
    pub(crate) unsafe fn window(&self, start: u64, len: usize) -> Result<Window<'_, T>, BufferError> {
        let written = self.total_items_written();
        let available = written.saturating_sub(start) as usize;
        if len > available || len > self.capacity {
            return Err(BufferError::InsufficientInput {
                requested: len,
                available,
            });
        }
        let oldest = written.saturating_sub(self.capacity as u64);
        if start < oldest {
            // Already overwritten; only possible for a detached reader.
            return Err(BufferError::InsufficientInput {
                requested: len,
                available: 0,
            });
        }
        let offset = (start % self.capacity as u64) as usize;
        let base = UnsafeCell::raw_get(self.slots.as_ptr()) as *const T;
        // SAFETY: offset + len <= 2 * capacity. The items were published before
        // the Acquire load of the total, and the writer stays clear of them
        // until the caller's cursor releases them.
        let items = unsafe { std::slice::from_raw_parts(base.add(offset), len) };
        Ok(Window { items })
    }

    /// Mark that the producer will never write again
    pub fn set_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Whether the producer has finished
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Contiguous read-only view of committed items
///
/// Takes no lock; the producer keeps committing while a window is held.
pub struct Window<'a, T> {
    items: &'a [T],
}

impl<T> Deref for Window<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.items
    }
}

/// Producer end plus one reader per downstream edge, created at commit time
pub(crate) struct WiredBuffer {
    pub(crate) capacity: usize,
    pub(crate) writer: Box<dyn StreamWriter>,
    pub(crate) readers: Vec<Box<dyn StreamReader>>,
}

/// Signature of the per-type buffer factory stored in a port schema
pub(crate) type WireFn = fn(usize, &[usize]) -> WiredBuffer;

/// Allocate a buffer of `capacity` items with one reader per entry of `histories`
pub(crate) fn wire<T: Item>(capacity: usize, histories: &[usize]) -> WiredBuffer {
    let mut buffer = CircularBuffer::<T>::new(capacity);
    let cursors: Vec<_> = histories.iter().map(|&h| buffer.add_reader(h)).collect();
    let capacity = buffer.capacity();
    let buffer = Arc::new(buffer);

    let readers = cursors
        .into_iter()
        .map(|cursor| {
            Box::new(BufferReader::new(Arc::clone(&buffer), cursor)) as Box<dyn StreamReader>
        })
        .collect();

    WiredBuffer {
        capacity,
        writer: Box::new(BufferWriter::new(buffer)),
        readers,
    }
}
