//! Block trait for streaming processing
//!
//! Defines the `Block` trait that every leaf block implements. The scheduler
//! calls `work()` with windows sized from the block's rate, history and the
//! free space downstream.

pub use super::errors::{WorkError, WorkResult};
pub use super::ports::{InputPort, OutputPort, Signature};
pub use super::rate::Rate;

/// Outcome of a successful `work()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// `n` items were produced on every output
    ///
    /// For sinks, `n` is the number of output-equivalent items processed; fixed
    /// rate blocks consume according to their rate from it.
    Produced(usize),
    /// Per-port counts were recorded with `OutputPort::produce`
    CalledProduce,
    /// Not enough input to make progress; retry when more arrives
    InsufficientInput,
    /// The block will never produce again
    Done,
}

/// A processing block
/// - Sources have no inputs and at least one output
/// - Sinks have inputs and no outputs
/// - Everything else has both
pub trait Block: Send {
    /// Instance name, unique within a graph
    fn name(&self) -> &str;

    /// Input ports
    fn input_signature(&self) -> Signature;

    /// Output ports
    fn output_signature(&self) -> Signature;

    fn rate(&self) -> Rate {
        Rate::Sync
    }

    /// Look-back requirement applied to every input: each window starts with
    /// `history() - 1` items the previous call already saw
    fn history(&self) -> usize {
        1
    }

    /// Output counts offered to `work()` are always a multiple of this
    fn output_multiple(&self) -> usize {
        1
    }

    /// Preferred item alignment of output windows, in items
    ///
    /// When the write position is misaligned the scheduler offers just enough
    /// items to realign; otherwise it rounds down to a multiple of this.
    fn alignment(&self) -> usize {
        1
    }

    /// Per-block cap on `noutput_items`, on top of the pipeline-wide cap
    fn max_output_items(&self) -> Option<usize> {
        None
    }

    /// New input items (look-back excluded) needed per input to produce
    /// `noutput_items`
    ///
    /// Only consulted for `Rate::General` blocks, on every scheduling pass.
    fn forecast(&self, noutput_items: usize, ninputs: usize) -> Vec<usize> {
        self.rate().forecast(noutput_items, ninputs)
    }

    /// Called on the block's thread before the first `work()`
    fn start(&mut self) -> WorkResult {
        Ok(())
    }

    /// Called on the block's thread after the last `work()`
    fn stop(&mut self) -> WorkResult {
        Ok(())
    }

    /// Read from inputs, write to outputs
    ///
    /// Return `Ok(WorkStatus)` for normal flow control or `Err` for a fatal
    /// error that terminates this block.
    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort])
    -> WorkResult<WorkStatus>;
}
