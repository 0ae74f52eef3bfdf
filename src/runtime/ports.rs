//! Port signatures and the windows handed to `work()`
//!
//! - [`PortSchema`] / [`Signature`] describe what a block exposes: item type and
//!   size per port plus min/max stream counts.
//! - [`InputPort`] / [`OutputPort`] are the type-erased buffer windows a block
//!   sees on each call. Typed access goes through `items::<T>()` and
//!   `items_mut::<T>()`.

use std::any::TypeId;
use std::fmt;

use super::buffer::{Window, WireFn, wire};
use super::errors::{WorkError, WorkResult};
use super::reader::{BufferReader, StreamReader};
use super::writer::{BufferWriter, StreamWriter};

/// Bound for anything that can flow through a stream buffer
pub trait Item: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> Item for T {}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Schema describing one stream port
#[derive(Clone)]
pub struct PortSchema {
    pub name: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub item_size: usize,
    pub(crate) wire: WireFn,
}

impl PortSchema {
    /// Create a schema for a port carrying `T`
    pub fn new<T: Item>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            item_size: std::mem::size_of::<T>(),
            wire: wire::<T>,
        }
    }

    /// Whether two ports carry the same item type and size
    pub fn compatible_with(&self, other: &PortSchema) -> bool {
        self.type_id == other.type_id && self.item_size == other.item_size
    }
}

impl fmt::Debug for PortSchema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PortSchema")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("item_size", &self.item_size)
            .finish()
    }
}

/// Arity and item types for one direction of a block
///
/// Port `i` uses `ports[i]`, or the last schema when `i` runs past the end, so
/// a variadic signature only needs one schema.
#[derive(Debug, Clone)]
pub struct Signature {
    pub min_streams: usize,
    /// `None` means unbounded
    pub max_streams: Option<usize>,
    pub ports: Vec<PortSchema>,
}

impl Signature {
    /// No ports in this direction
    pub fn none() -> Self {
        Self {
            min_streams: 0,
            max_streams: Some(0),
            ports: Vec::new(),
        }
    }

    /// Exactly one port carrying `T`
    pub fn single<T: Item>(name: impl Into<String>) -> Self {
        Self::fixed(vec![PortSchema::new::<T>(name)])
    }

    /// Exactly `ports.len()` ports
    pub fn fixed(ports: Vec<PortSchema>) -> Self {
        Self {
            min_streams: ports.len(),
            max_streams: Some(ports.len()),
            ports,
        }
    }

    /// Between `min` and `max` ports, all carrying `T`
    pub fn range<T: Item>(min: usize, max: Option<usize>, name: impl Into<String>) -> Self {
        Self {
            min_streams: min,
            max_streams: max,
            ports: vec![PortSchema::new::<T>(name)],
        }
    }

    /// Schema of port `index`, or `None` if the signature has no such port
    pub fn port(&self, index: usize) -> Option<&PortSchema> {
        if self.max_streams.is_some_and(|max| index >= max) {
            return None;
        }
        self.ports.get(index.min(self.ports.len().checked_sub(1)?))
    }

    /// Whether `count` connected streams satisfy this signature
    pub fn allows(&self, count: usize) -> bool {
        count >= self.min_streams && self.max_streams.is_none_or(|max| count <= max)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_streams
            && max < self.min_streams
        {
            return Err(format!(
                "max_streams {} is below min_streams {}",
                max, self.min_streams
            ));
        }
        if self.ports.is_empty() && self.max_streams != Some(0) {
            return Err("signature allows streams but declares no item type".to_string());
        }
        if let Some(port) = self.ports.iter().find(|p| p.item_size == 0) {
            return Err(format!(
                "port '{}' carries zero-sized items ({})",
                port.name, port.type_name
            ));
        }
        Ok(())
    }
}

/// One input stream as seen by `work()`
///
/// The window holds `history() - 1` look-back items followed by `len()` new items.
pub struct InputPort {
    reader: Box<dyn StreamReader>,
    index: usize,
    window_len: usize,
    consumed: Option<usize>,
}

impl InputPort {
    pub(crate) fn new(reader: Box<dyn StreamReader>, index: usize) -> Self {
        Self {
            reader,
            index,
            window_len: 0,
            consumed: None,
        }
    }

    /// Port index on the owning block
    pub fn index(&self) -> usize {
        self.index
    }

    /// New items in this call's window (look-back excluded)
    pub fn len(&self) -> usize {
        self.window_len
    }

    /// Whether the window holds no new items
    pub fn is_empty(&self) -> bool {
        self.window_len == 0
    }

    /// History of the owning block
    pub fn history(&self) -> usize {
        self.reader.history()
    }

    /// Items consumed on this port before the current call
    pub fn nitems_read(&self) -> u64 {
        self.reader.total_items_read()
    }

    /// Whether the producer finished (items already in the window stay valid)
    pub fn is_upstream_done(&self) -> bool {
        self.reader.is_upstream_done()
    }

    /// Typed view of the window: look-back items then new items
    pub fn items<T: Item>(&self) -> WorkResult<Window<'_, T>> {
        let reader = self
            .reader
            .as_any()
            .downcast_ref::<BufferReader<T>>()
            .ok_or_else(|| WorkError::TypeMismatch {
                requested: std::any::type_name::<T>(),
                actual: self.reader.type_name(),
            })?;
        Ok(reader.peek_window(self.window_len)?)
    }

    /// Record that `n` new items were consumed
    ///
    /// Required for GENERAL-rate blocks; fixed-rate blocks consume according to
    /// their rate unless they call this.
    pub fn consume(&mut self, n: usize) {
        self.consumed = Some(n);
    }

    pub(crate) fn prepare(&mut self, window_len: usize) {
        self.window_len = window_len;
        self.consumed = None;
    }

    pub(crate) fn consumed(&self) -> Option<usize> {
        self.consumed
    }

    pub(crate) fn reader(&self) -> &dyn StreamReader {
        self.reader.as_ref()
    }

    pub(crate) fn reader_mut(&mut self) -> &mut dyn StreamReader {
        self.reader.as_mut()
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("index", &self.index)
            .field("type", &self.reader.type_name())
            .field("len", &self.window_len)
            .finish()
    }
}

/// Mark `n` items consumed on every input
pub fn consume_each(inputs: &mut [InputPort], n: usize) {
    for input in inputs {
        input.consume(n);
    }
}

/// One output stream as seen by `work()`
pub struct OutputPort {
    writer: Box<dyn StreamWriter>,
    index: usize,
    window_len: usize,
    produced: Option<usize>,
}

impl OutputPort {
    pub(crate) fn new(writer: Box<dyn StreamWriter>, index: usize) -> Self {
        Self {
            writer,
            index,
            window_len: 0,
            produced: None,
        }
    }

    /// Port index on the owning block
    pub fn index(&self) -> usize {
        self.index
    }

    /// Slots offered to the block in this call (`noutput_items`)
    pub fn len(&self) -> usize {
        self.window_len
    }

    /// Whether no slots are offered
    pub fn is_empty(&self) -> bool {
        self.window_len == 0
    }

    /// Items committed on this port before the current call
    pub fn nitems_written(&self) -> u64 {
        self.writer.total_items_written()
    }

    /// Typed mutable view of the output window
    pub fn items_mut<T: Item>(&mut self) -> WorkResult<&mut [T]> {
        let actual = self.writer.type_name();
        let len = self.window_len;
        let writer = self
            .writer
            .as_any_mut()
            .downcast_mut::<BufferWriter<T>>()
            .ok_or_else(|| WorkError::TypeMismatch {
                requested: std::any::type_name::<T>(),
                actual,
            })?;
        Ok(writer.window(len))
    }

    /// Record that `n` items were produced on this port
    ///
    /// Pair with `WorkStatus::CalledProduce` when ports produce different counts.
    pub fn produce(&mut self, n: usize) {
        self.produced = Some(n);
    }

    pub(crate) fn prepare(&mut self, window_len: usize) {
        self.window_len = window_len;
        self.produced = None;
        self.writer.prepare(window_len);
    }

    pub(crate) fn produced(&self) -> Option<usize> {
        self.produced
    }

    pub(crate) fn writer(&self) -> &dyn StreamWriter {
        self.writer.as_ref()
    }

    pub(crate) fn writer_mut(&mut self) -> &mut dyn StreamWriter {
        self.writer.as_mut()
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("index", &self.index)
            .field("type", &self.writer.type_name())
            .field("len", &self.window_len)
            .finish()
    }
}
