//! One scheduling pass for one node
//!
//! [`NodeExecutor`] owns a block and its ports while the graph runs. Each call to
//! `run_pass()` sizes the windows from the free space downstream, the items
//! available upstream and the block's rate, calls `work()` once, and commits
//! what the block reported.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::trace;

use super::errors::{WorkError, WorkResult};
use super::graph::NodeWiring;
use super::node::{Block, WorkStatus};
use super::ports::{InputPort, OutputPort};
use super::rate::{Rate, round_down};
use super::scheduler::NodeStats;

/// What a pass achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    /// `work()` ran; `produced` is the largest count committed on any output
    Progress { consumed: usize, produced: usize },
    /// Some input is short, or a source had nothing to emit
    BlockedOnInput,
    BlockedOnOutput,
    Done,
}

/// Turn a caught panic payload into an error message
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a block callback, turning a panic into [`WorkError::Panicked`]
pub(crate) fn guarded<R>(f: impl FnOnce() -> WorkResult<R>) -> WorkResult<R> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(WorkError::Panicked(panic_message(payload))))
}

pub(crate) struct NodeExecutor {
    name: String,
    block: Box<dyn Block>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    rate: Rate,
    history: usize,
    output_multiple: usize,
    alignment: usize,
    max_output_items: usize,
    stats: Arc<NodeStats>,
}

impl NodeExecutor {
    pub(crate) fn new(wiring: NodeWiring, max_output_items: usize, stats: Arc<NodeStats>) -> Self {
        let cap = wiring
            .block
            .max_output_items()
            .map_or(max_output_items, |own| own.min(max_output_items))
            .max(wiring.output_multiple);
        Self {
            alignment: wiring.block.alignment().max(1),
            name: wiring.name,
            block: wiring.block,
            inputs: wiring.inputs,
            outputs: wiring.outputs,
            rate: wiring.rate,
            history: wiring.history,
            output_multiple: wiring.output_multiple,
            max_output_items: cap,
            stats,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn start(&mut self) -> WorkResult {
        let block = &mut self.block;
        guarded(|| block.start())
    }

    pub(crate) fn stop(&mut self) -> WorkResult {
        let block = &mut self.block;
        guarded(|| block.stop())
    }

    /// Signal end of stream downstream and release upstream buffers
    pub(crate) fn finish(&mut self) {
        for output in &self.outputs {
            output.writer().set_done();
        }
        for input in &mut self.inputs {
            input.reader_mut().detach();
        }
    }

    pub(crate) fn into_block(self) -> Box<dyn Block> {
        self.block
    }

    /// Items the block may produce this pass, bounded by free output space
    fn output_budget(&self) -> usize {
        let space = self
            .outputs
            .iter()
            .map(|o| o.writer().space_available())
            .min()
            .unwrap_or(usize::MAX);
        round_down(space.min(self.max_output_items), self.output_multiple)
    }

    /// Cap `noutput` by the input available to a fixed-rate block
    ///
    /// Returns the new items to offer on each input, or the ports that cannot
    /// supply a single output multiple.
    fn fixed_rate_windows(&self, noutput: &mut usize) -> Result<Vec<usize>, Vec<usize>> {
        let mut starved = Vec::new();
        for (port, input) in self.inputs.iter().enumerate() {
            let available = input.reader().items_available();
            let allowed = self
                .rate
                .output_for_input(available, self.history)
                .map_or(0, |n| round_down(n, self.output_multiple));
            if allowed == 0 {
                starved.push(port);
            } else {
                *noutput = (*noutput).min(allowed);
            }
        }
        if !starved.is_empty() {
            return Err(starved);
        }
        *noutput = round_down(*noutput, self.output_multiple);
        match self.rate.required_input(*noutput, 1) {
            Some(new_items) if *noutput > 0 => Ok(vec![new_items; self.inputs.len()]),
            _ => Err((0..self.inputs.len()).collect()),
        }
    }

    /// Halve `noutput` until the block's forecast fits the available input
    ///
    /// Fails with the ports still short once `noutput` reaches one output multiple.
    fn general_rate_windows(&self, noutput: &mut usize) -> Result<Vec<usize>, Vec<usize>> {
        let look_back = self.history - 1;
        let available: Vec<usize> = self
            .inputs
            .iter()
            .map(|i| i.reader().items_available())
            .collect();
        loop {
            let required = self.block.forecast(*noutput, self.inputs.len());
            let short: Vec<usize> = available
                .iter()
                .enumerate()
                .filter(|&(port, &avail)| avail < required.get(port).copied().unwrap_or(0) + look_back)
                .map(|(port, _)| port)
                .collect();
            if short.is_empty() {
                return Ok(available.iter().map(|a| a - look_back).collect());
            }
            if *noutput <= self.output_multiple {
                return Err(short);
            }
            *noutput = round_down(*noutput / 2, self.output_multiple).max(self.output_multiple);
        }
    }

    /// Shrink `noutput` so output writes land on the block's alignment
    fn align(&self, noutput: usize) -> usize {
        let Some(first) = self.outputs.first() else {
            return noutput;
        };
        if self.alignment <= 1 {
            return noutput;
        }
        let misalign = (first.nitems_written() % self.alignment as u64) as usize;
        if misalign != 0 {
            let realign = self.alignment - misalign;
            if realign < noutput && realign % self.output_multiple == 0 {
                return realign;
            }
            return noutput;
        }
        let aligned = round_down(noutput, self.alignment);
        if aligned >= self.output_multiple && aligned % self.output_multiple == 0 {
            aligned
        } else {
            noutput
        }
    }

    /// Execute one pass
    pub(crate) fn run_pass(&mut self) -> WorkResult<PassOutcome> {
        if !self.outputs.is_empty() && self.outputs.iter().all(|o| o.writer().all_readers_detached()) {
            trace!("[{}] every consumer is gone", self.name);
            return Ok(PassOutcome::Done);
        }

        let mut noutput = self.output_budget();
        if noutput == 0 {
            return Ok(PassOutcome::BlockedOnOutput);
        }

        // Sampled before availability so items committed ahead of DONE are counted
        let upstream_done: Vec<bool> = self.inputs.iter().map(|i| i.is_upstream_done()).collect();
        let all_upstream_done = !upstream_done.is_empty() && upstream_done.iter().all(|d| *d);

        let windows = if self.inputs.is_empty() {
            Vec::new()
        } else {
            let windows = match self.rate {
                Rate::General => self.general_rate_windows(&mut noutput),
                _ => self.fixed_rate_windows(&mut noutput),
            };
            match windows {
                Ok(w) => w,
                // A short port whose producer is still running may yet fill up
                Err(starved) if starved.iter().any(|&port| upstream_done[port]) => {
                    trace!("[{}] input {:?} starved and its upstream is done", self.name, starved);
                    return Ok(PassOutcome::Done);
                }
                Err(_) => return Ok(PassOutcome::BlockedOnInput),
            }
        };

        let noutput = self.align(noutput);
        let windows = match self.rate {
            Rate::General => windows,
            _ => {
                let new_items = self.rate.required_input(noutput, 1).unwrap_or(noutput);
                vec![new_items; windows.len()]
            }
        };

        for (input, &len) in self.inputs.iter_mut().zip(&windows) {
            input.prepare(len);
        }
        for output in &mut self.outputs {
            output.prepare(noutput);
        }

        trace!("[{}] work(noutput={}, ninput={:?})", self.name, noutput, windows);
        self.stats.record_work_call();
        let (block, inputs, outputs) = (&mut self.block, &mut self.inputs, &mut self.outputs);
        let status = guarded(|| block.work(inputs, outputs))?;

        let reference = match status {
            WorkStatus::Done => return Ok(PassOutcome::Done),
            WorkStatus::InsufficientInput => {
                if all_upstream_done {
                    return Ok(PassOutcome::Done);
                }
                return Ok(PassOutcome::BlockedOnInput);
            }
            WorkStatus::Produced(n) => {
                if n > noutput {
                    return Err(WorkError::Overproduced {
                        port: 0,
                        produced: n,
                        capacity: noutput,
                    });
                }
                n
            }
            WorkStatus::CalledProduce => self
                .outputs
                .iter()
                .map(|o| o.produced().unwrap_or(0))
                .max()
                .unwrap_or(0),
        };

        let mut produced = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            let n = match status {
                WorkStatus::CalledProduce => output.produced().unwrap_or(0),
                _ => reference,
            };
            if n > noutput {
                return Err(WorkError::Overproduced {
                    port: output.index(),
                    produced: n,
                    capacity: noutput,
                });
            }
            produced.push(n);
        }

        let mut consumed = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let n = match input.consumed() {
                Some(n) => n,
                None => self.rate.consumed_for(reference).unwrap_or(0),
            };
            if n > input.len() {
                return Err(WorkError::Overconsumed {
                    port: input.index(),
                    consumed: n,
                    available: input.len(),
                });
            }
            consumed.push(n);
        }

        for (output, &n) in self.outputs.iter_mut().zip(&produced) {
            output.writer_mut().commit(n)?;
        }
        for (input, &n) in self.inputs.iter_mut().zip(&consumed) {
            input.reader_mut().advance(n)?;
        }

        let total_consumed: usize = consumed.iter().sum();
        self.stats.record_items(total_consumed, reference);

        // Nothing moved: wait for new input, or for a wake-up if this is a source
        if reference == 0 && total_consumed == 0 {
            if all_upstream_done {
                return Ok(PassOutcome::Done);
            }
            return Ok(PassOutcome::BlockedOnInput);
        }
        Ok(PassOutcome::Progress {
            consumed: total_consumed,
            produced: reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer::wire;
    use crate::runtime::graph::NodeId;
    use crate::runtime::ports::Signature;

    /// Doubles every input item, optionally with look-back
    struct Doubler {
        rate: Rate,
        history: usize,
        windows: Vec<Vec<u32>>,
    }

    impl Block for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }
        fn input_signature(&self) -> Signature {
            Signature::single::<u32>("in")
        }
        fn output_signature(&self) -> Signature {
            Signature::single::<u32>("out")
        }
        fn rate(&self) -> Rate {
            self.rate
        }
        fn history(&self) -> usize {
            self.history
        }
        fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
            let n = outputs[0].len();
            let window = inputs[0].items::<u32>()?.to_vec();
            let out = outputs[0].items_mut::<u32>()?;
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = window[i + self.history - 1] * 2;
            }
            self.windows.push(window);
            Ok(WorkStatus::Produced(n))
        }
    }

    struct Harness {
        executor: NodeExecutor,
        upstreams: Vec<Box<dyn crate::runtime::writer::StreamWriter>>,
        downstream: InputPort,
    }

    fn harness(block: Box<dyn Block>, capacity: usize) -> Harness {
        harness_with_inputs(block, capacity, 1)
    }

    fn harness_with_inputs(block: Box<dyn Block>, capacity: usize, ninputs: usize) -> Harness {
        let history = block.history();
        let rate = block.rate();
        let mut inputs = Vec::new();
        let mut upstreams = Vec::new();
        for port in 0..ninputs {
            let mut up = wire::<u32>(capacity, &[history]);
            inputs.push(InputPort::new(up.readers.remove(0), port));
            upstreams.push(up.writer);
        }
        let mut down = wire::<u32>(capacity, &[1]);
        let wiring = NodeWiring {
            id: NodeId::new(0),
            name: block.name().to_string(),
            rate,
            history,
            output_multiple: rate.output_multiple(),
            block,
            inputs,
            outputs: vec![OutputPort::new(down.writer, 0)],
            upstream: Vec::new(),
            downstream: Vec::new(),
        };
        Harness {
            executor: NodeExecutor::new(wiring, usize::MAX, Arc::new(NodeStats::new("node"))),
            upstreams,
            downstream: InputPort::new(down.readers.remove(0), 0),
        }
    }

    fn push(h: &mut Harness, items: &[u32]) {
        push_to(h, 0, items);
    }

    fn push_to(h: &mut Harness, port: usize, items: &[u32]) {
        let upstream = &mut h.upstreams[port];
        upstream.prepare(items.len());
        upstream
            .as_any_mut()
            .downcast_mut::<crate::runtime::writer::BufferWriter<u32>>()
            .unwrap()
            .window(items.len())
            .copy_from_slice(items);
        upstream.commit(items.len()).unwrap();
    }

    fn drain(h: &mut Harness) -> Vec<u32> {
        let n = h.downstream.reader().items_available();
        h.downstream.prepare(n);
        let items = h.downstream.items::<u32>().unwrap().to_vec();
        h.downstream.reader_mut().advance(n).unwrap();
        items
    }

    #[test]
    fn test_sync_pass_consumes_and_produces() {
        let block = Doubler { rate: Rate::Sync, history: 1, windows: Vec::new() };
        let mut h = harness(Box::new(block), 16);
        push(&mut h, &[1, 2, 3]);

        assert_eq!(
            h.executor.run_pass().unwrap(),
            PassOutcome::Progress { consumed: 3, produced: 3 }
        );
        assert_eq!(drain(&mut h), vec![2, 4, 6]);
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::BlockedOnInput);
    }

    #[test]
    fn test_history_window_overlaps_previous_call() {
        let block = Doubler { rate: Rate::Sync, history: 3, windows: Vec::new() };
        let mut h = harness(Box::new(block), 16);

        push(&mut h, &[0, 1]);
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::BlockedOnInput);

        push(&mut h, &[2, 3]);
        h.executor.run_pass().unwrap();
        push(&mut h, &[4, 5, 6]);
        h.executor.run_pass().unwrap();

        assert_eq!(drain(&mut h), vec![4, 6, 8, 10, 12]);
    }

    #[test]
    fn test_blocked_on_output_when_downstream_full() {
        let block = Doubler { rate: Rate::Sync, history: 1, windows: Vec::new() };
        let mut h = harness(Box::new(block), 4);
        push(&mut h, &[1, 2, 3, 4]);

        h.executor.run_pass().unwrap();
        push(&mut h, &[5]);
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::BlockedOnOutput);

        drain(&mut h);
        assert_eq!(
            h.executor.run_pass().unwrap(),
            PassOutcome::Progress { consumed: 1, produced: 1 }
        );
    }

    #[test]
    fn test_starved_with_upstream_done_finishes() {
        let block = Doubler { rate: Rate::Decimate(4), history: 1, windows: Vec::new() };
        let mut h = harness(Box::new(block), 16);
        push(&mut h, &[1, 2, 3, 4, 5, 6]);

        assert_eq!(
            h.executor.run_pass().unwrap(),
            PassOutcome::Progress { consumed: 4, produced: 1 }
        );
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::BlockedOnInput);

        h.upstreams[0].set_done();
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::Done);
    }

    #[test]
    fn test_done_when_every_consumer_detached() {
        let block = Doubler { rate: Rate::Sync, history: 1, windows: Vec::new() };
        let mut h = harness(Box::new(block), 16);
        push(&mut h, &[1]);

        h.downstream.reader_mut().detach();
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::Done);
    }

    /// Adds two streams item by item
    struct Adder {
        rate: Rate,
    }

    impl Block for Adder {
        fn name(&self) -> &str {
            "adder"
        }
        fn input_signature(&self) -> Signature {
            Signature::range::<u32>(2, Some(2), "in")
        }
        fn output_signature(&self) -> Signature {
            Signature::single::<u32>("out")
        }
        fn rate(&self) -> Rate {
            self.rate
        }
        fn forecast(&self, noutput: usize, ninputs: usize) -> Vec<usize> {
            vec![noutput; ninputs]
        }
        fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
            let n = {
                let a = inputs[0].items::<u32>()?;
                let b = inputs[1].items::<u32>()?;
                let out = outputs[0].items_mut::<u32>()?;
                let n = out.len().min(a.len()).min(b.len());
                for i in 0..n {
                    out[i] = a[i] + b[i];
                }
                n
            };
            if self.rate == Rate::General {
                inputs[0].consume(n);
                inputs[1].consume(n);
            }
            Ok(WorkStatus::Produced(n))
        }
    }

    fn assert_waits_for_the_short_port(rate: Rate) {
        let mut h = harness_with_inputs(Box::new(Adder { rate }), 16, 2);
        push_to(&mut h, 0, &[1, 2, 3, 4]);
        h.upstreams[0].set_done();

        // Port 0 is done but port 1, the short one, still has a live producer
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::BlockedOnInput);

        push_to(&mut h, 1, &[10, 20, 30, 40]);
        assert_eq!(
            h.executor.run_pass().unwrap(),
            PassOutcome::Progress { consumed: 8, produced: 4 }
        );
        assert_eq!(drain(&mut h), vec![11, 22, 33, 44]);

        // Now the exhausted port 0 is the short one and its producer is gone
        push_to(&mut h, 1, &[50]);
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::Done);
    }

    #[test]
    fn test_fixed_rate_waits_for_short_port_with_live_producer() {
        assert_waits_for_the_short_port(Rate::Sync);
    }

    #[test]
    fn test_general_rate_waits_for_short_port_with_live_producer() {
        assert_waits_for_the_short_port(Rate::General);
    }

    /// A source with nothing to emit right now
    struct Quiet;

    impl Block for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }
        fn input_signature(&self) -> Signature {
            Signature::none()
        }
        fn output_signature(&self) -> Signature {
            Signature::single::<u32>("out")
        }
        fn work(&mut self, _inputs: &mut [InputPort], _outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
            Ok(WorkStatus::Produced(0))
        }
    }

    #[test]
    fn test_idle_source_blocks_instead_of_reporting_progress() {
        let mut h = harness_with_inputs(Box::new(Quiet), 16, 0);
        assert_eq!(h.executor.run_pass().unwrap(), PassOutcome::BlockedOnInput);
        assert_eq!(h.downstream.reader().items_available(), 0);
    }

    struct Greedy;

    impl Block for Greedy {
        fn name(&self) -> &str {
            "greedy"
        }
        fn input_signature(&self) -> Signature {
            Signature::single::<u32>("in")
        }
        fn output_signature(&self) -> Signature {
            Signature::single::<u32>("out")
        }
        fn work(&mut self, _inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
            Ok(WorkStatus::Produced(outputs[0].len() + 1))
        }
    }

    #[test]
    fn test_overproduction_is_fatal() {
        let mut h = harness(Box::new(Greedy), 16);
        push(&mut h, &[1, 2]);
        assert!(matches!(
            h.executor.run_pass(),
            Err(WorkError::Overproduced { produced: 3, capacity: 2, .. })
        ));
    }

    struct Panicky;

    impl Block for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn input_signature(&self) -> Signature {
            Signature::single::<u32>("in")
        }
        fn output_signature(&self) -> Signature {
            Signature::single::<u32>("out")
        }
        fn work(&mut self, _inputs: &mut [InputPort], _outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
            panic!("tap index out of range");
        }
    }

    #[test]
    fn test_panic_becomes_work_error() {
        let mut h = harness(Box::new(Panicky), 16);
        push(&mut h, &[1]);
        match h.executor.run_pass() {
            Err(WorkError::Panicked(msg)) => assert!(msg.contains("tap index")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }
}
