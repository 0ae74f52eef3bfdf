//! End-to-end data flow through running graphs

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ringflow::blocks::{CopyBlock, Head, KeepOneInN, NullSink, Repeat, VectorSink, VectorSource};
use ringflow::{
    Block, ConnectionError, FlowConfig, GraphState, InputPort, NodeState, OutputPort, Pipeline,
    Rate, Signature, WorkResult, WorkStatus,
};

#[test]
fn test_decimate_chain_keeps_every_fourth_item() {
    let mut pipeline = Pipeline::new();
    let source = pipeline
        .add_block(VectorSource::new((0..1000u32).collect::<Vec<_>>()))
        .unwrap();
    let decim = pipeline.add_block(KeepOneInN::<u32>::new(4)).unwrap();
    let sink = VectorSink::<u32>::new();
    let data = sink.data();
    let sink = pipeline.add_block(sink).unwrap();

    pipeline.connect(source, 0, decim, 0).unwrap();
    pipeline.connect(decim, 0, sink, 0).unwrap();
    pipeline.run(usize::MAX).unwrap();

    let data = data.lock().unwrap();
    assert_eq!(data.len(), 250);
    assert_eq!(*data, (0..1000).step_by(4).collect::<Vec<_>>());
}

#[test]
fn test_decimate_chain_with_small_calls_and_buffers() {
    let config = FlowConfig::default().with_min_buffer_bytes(16);
    let mut pipeline = Pipeline::with_config(config);
    let source = pipeline
        .add_block(VectorSource::new((0..1000u32).collect::<Vec<_>>()))
        .unwrap();
    let decim = pipeline.add_block(KeepOneInN::<u32>::new(4)).unwrap();
    let sink = VectorSink::<u32>::new();
    let data = sink.data();
    let sink = pipeline.add_block(sink).unwrap();

    pipeline.connect(source, 0, decim, 0).unwrap();
    pipeline.connect(decim, 0, sink, 0).unwrap();
    pipeline.run(3).unwrap();

    assert_eq!(*data.lock().unwrap(), (0..1000).step_by(4).collect::<Vec<_>>());
}

/// Records every input window it is handed
struct WindowRecorder {
    history: usize,
    windows: Arc<Mutex<Vec<Vec<u64>>>>,
}

impl Block for WindowRecorder {
    fn name(&self) -> &str {
        "window_recorder"
    }
    fn input_signature(&self) -> Signature {
        Signature::single::<u64>("in")
    }
    fn output_signature(&self) -> Signature {
        Signature::single::<u64>("out")
    }
    fn history(&self) -> usize {
        self.history
    }
    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let window = inputs[0].items::<u64>()?.to_vec();
        let out = outputs[0].items_mut::<u64>()?;
        // Output the newest item of each history span
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = window[i + self.history - 1];
        }
        let n = out.len();
        self.windows.lock().unwrap().push(window);
        Ok(WorkStatus::Produced(n))
    }
}

#[test]
fn test_history_window_overlaps_previous_call() {
    const HISTORY: usize = 5;
    let windows = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::with_config(FlowConfig::default().with_min_buffer_bytes(64));
    let source = pipeline
        .add_block(VectorSource::new((0..500u64).collect::<Vec<_>>()))
        .unwrap();
    let recorder = pipeline
        .add_block(WindowRecorder {
            history: HISTORY,
            windows: Arc::clone(&windows),
        })
        .unwrap();
    let sink = VectorSink::<u64>::new();
    let data = sink.data();
    let sink = pipeline.add_block(sink).unwrap();

    pipeline.connect(source, 0, recorder, 0).unwrap();
    pipeline.connect(recorder, 0, sink, 0).unwrap();
    pipeline.run(7).unwrap();

    let windows = windows.lock().unwrap();
    assert!(windows.len() > 1);
    assert_eq!(windows[0][0], 0);
    for pair in windows.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        // The window starts H-1 items before its first new item
        assert_eq!(&cur[..HISTORY - 1], &prev[prev.len() - (HISTORY - 1)..]);
        for (k, tag) in cur.iter().enumerate() {
            assert_eq!(*tag, cur[0] + k as u64);
        }
    }

    // No zero prefill: the first output is the item with H-1 items of look-back
    assert_eq!(*data.lock().unwrap(), (HISTORY as u64 - 1..500).collect::<Vec<_>>());
}

#[test]
fn test_done_propagates_through_rate_changes() {
    let mut pipeline = Pipeline::new();
    let source = pipeline
        .add_block(VectorSource::new((0..1001i32).collect::<Vec<_>>()))
        .unwrap();
    let copy = pipeline.add_block(CopyBlock::<i32>::new()).unwrap();
    let decim = pipeline.add_block(KeepOneInN::<i32>::new(3)).unwrap();
    let interp = pipeline.add_block(Repeat::<i32>::new(2)).unwrap();
    let sink = VectorSink::<i32>::new();
    let data = sink.data();
    let sink = pipeline.add_block(sink).unwrap();

    pipeline.connect(source, 0, copy, 0).unwrap();
    pipeline.connect(copy, 0, decim, 0).unwrap();
    pipeline.connect(decim, 0, interp, 0).unwrap();
    pipeline.connect(interp, 0, sink, 0).unwrap();
    pipeline.run(64).unwrap();

    // 1001 items decimate to 333 (the last two stay unconsumed), then double
    let data = data.lock().unwrap();
    assert_eq!(data.len(), 666);
    assert_eq!(&data[..6], &[0, 0, 3, 3, 6, 6]);
    assert_eq!(*data.last().unwrap(), 996);

    for node in [source, copy, decim, interp, sink] {
        assert_eq!(pipeline.node_state(node), Some(NodeState::Done));
    }
}

#[test]
fn test_head_stops_an_endless_source() {
    let mut pipeline = Pipeline::new();
    let source = pipeline
        .add_block(VectorSource::new(vec![1u8, 2, 3]).repeat(true))
        .unwrap();
    let head = pipeline.add_block(Head::<u8>::new(100)).unwrap();
    let sink = VectorSink::<u8>::new();
    let data = sink.data();
    let sink = pipeline.add_block(sink).unwrap();

    pipeline.connect(source, 0, head, 0).unwrap();
    pipeline.connect(head, 0, sink, 0).unwrap();
    pipeline.run(usize::MAX).unwrap();

    let data = data.lock().unwrap();
    assert_eq!(data.len(), 100);
    assert_eq!(&data[..4], &[1, 2, 3, 1]);
}

#[test]
fn test_fan_out_readers_each_see_every_item() {
    let config = FlowConfig::default().with_min_buffer_bytes(32);
    let mut pipeline = Pipeline::with_config(config);
    let source = pipeline
        .add_block(VectorSource::new((0..2000u16).collect::<Vec<_>>()))
        .unwrap();
    let fast = VectorSink::<u16>::new().with_name("fast");
    let fast_data = fast.data();
    let fast = pipeline.add_block(fast).unwrap();
    let slow = pipeline.add_block(KeepOneInN::<u16>::new(7)).unwrap();
    let slow_sink = VectorSink::<u16>::new().with_name("slow_sink");
    let slow_data = slow_sink.data();
    let slow_sink = pipeline.add_block(slow_sink).unwrap();

    pipeline.connect(source, 0, fast, 0).unwrap();
    pipeline.connect(source, 0, slow, 0).unwrap();
    pipeline.connect(slow, 0, slow_sink, 0).unwrap();
    pipeline.run(5).unwrap();

    assert_eq!(*fast_data.lock().unwrap(), (0..2000).collect::<Vec<_>>());
    assert_eq!(*slow_data.lock().unwrap(), (0..2000).step_by(7).take(285).collect::<Vec<_>>());
}

#[test]
fn test_copy_to_multiple_output_ports() {
    let mut pipeline = Pipeline::new();
    let source = pipeline
        .add_block(VectorSource::new(vec![1.5f64, 2.5, 3.5]))
        .unwrap();
    let copy = pipeline.add_block(CopyBlock::<f64>::new()).unwrap();
    let a = VectorSink::<f64>::new().with_name("a");
    let b = VectorSink::<f64>::new().with_name("b");
    let (a_data, b_data) = (a.data(), b.data());
    let a = pipeline.add_block(a).unwrap();
    let b = pipeline.add_block(b).unwrap();

    pipeline.connect(source, 0, copy, 0).unwrap();
    pipeline.connect(copy, 0, a, 0).unwrap();
    pipeline.connect(copy, 1, b, 0).unwrap();
    pipeline.run(usize::MAX).unwrap();

    assert_eq!(*a_data.lock().unwrap(), vec![1.5, 2.5, 3.5]);
    assert_eq!(*b_data.lock().unwrap(), vec![1.5, 2.5, 3.5]);
}

/// Sums groups of three items; consumes and produces at different counts
struct TripleSum;

impl Block for TripleSum {
    fn name(&self) -> &str {
        "triple_sum"
    }
    fn input_signature(&self) -> Signature {
        Signature::single::<u32>("in")
    }
    fn output_signature(&self) -> Signature {
        Signature::single::<u32>("out")
    }
    fn rate(&self) -> Rate {
        Rate::General
    }
    fn forecast(&self, noutput_items: usize, ninputs: usize) -> Vec<usize> {
        vec![noutput_items * 3; ninputs]
    }
    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let items = inputs[0].items::<u32>()?;
        let out = outputs[0].items_mut::<u32>()?;
        let n = out.len().min(items.len() / 3);
        for (slot, group) in out.iter_mut().zip(items.chunks_exact(3)).take(n) {
            *slot = group.iter().sum();
        }
        drop(items);
        inputs[0].consume(n * 3);
        Ok(WorkStatus::Produced(n))
    }
}

#[test]
fn test_general_rate_block_controls_consumption() {
    let mut pipeline = Pipeline::with_config(FlowConfig::default().with_min_buffer_bytes(40));
    let source = pipeline
        .add_block(VectorSource::new((0..300u32).collect::<Vec<_>>()))
        .unwrap();
    let sum = pipeline.add_block(TripleSum).unwrap();
    let sink = VectorSink::<u32>::new();
    let data = sink.data();
    let sink = pipeline.add_block(sink).unwrap();

    pipeline.connect(source, 0, sum, 0).unwrap();
    pipeline.connect(sum, 0, sink, 0).unwrap();
    pipeline.run(usize::MAX).unwrap();

    let expected: Vec<u32> = (0..100).map(|k| 9 * k + 3).collect();
    assert_eq!(*data.lock().unwrap(), expected);
}

/// Emits `count` items whose positions are multiples of its alignment
struct AlignedSource {
    remaining: usize,
    calls: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl Block for AlignedSource {
    fn name(&self) -> &str {
        "aligned_source"
    }
    fn input_signature(&self) -> Signature {
        Signature::none()
    }
    fn output_signature(&self) -> Signature {
        Signature::single::<u8>("out")
    }
    fn alignment(&self) -> usize {
        8
    }
    fn work(&mut self, _inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        if self.remaining == 0 {
            return Ok(WorkStatus::Done);
        }
        // Deliberately produce an odd count on the first call
        let n = outputs[0].len().min(self.remaining).min(if self.calls.lock().unwrap().is_empty() { 5 } else { usize::MAX });
        self.calls.lock().unwrap().push((outputs[0].nitems_written(), outputs[0].len()));
        outputs[0].items_mut::<u8>()?[..n].fill(0xAA);
        self.remaining -= n;
        Ok(WorkStatus::Produced(n))
    }
}

#[test]
fn test_alignment_realigns_after_short_write() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new();
    let source = pipeline
        .add_block(AlignedSource {
            remaining: 100,
            calls: Arc::clone(&calls),
        })
        .unwrap();
    let sink = pipeline.add_block(NullSink::<u8>::new()).unwrap();
    pipeline.connect(source, 0, sink, 0).unwrap();
    pipeline.run(1000).unwrap();

    let calls = calls.lock().unwrap();
    // First offer is a multiple of 8; after writing 5 items the next offer realigns
    assert_eq!(calls[0].0, 0);
    assert_eq!(calls[0].1 % 8, 0);
    assert_eq!(calls[1], (5, 3));
    assert_eq!(calls[2].0, 8);
    assert_eq!(calls[2].1 % 8, 0);
}

/// `max_streams` bounds the number of distinct ports. Connecting one output port
/// to several inputs is fan-out over a single stream (one buffer, one reader per
/// edge) and stays legal; asking for a second output port on a one-port
/// signature is the violation.
#[test]
fn test_arity_violation_leaves_graph_uncommitted() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_block(VectorSource::new(vec![0i16; 4])).unwrap();
    let a = pipeline.add_block(NullSink::<i16>::new().with_name("a")).unwrap();
    let b = pipeline.add_block(NullSink::<i16>::new().with_name("b")).unwrap();
    let c = pipeline.add_block(NullSink::<i16>::new().with_name("c")).unwrap();

    pipeline.connect(source, 0, a, 0).unwrap();
    pipeline.connect(source, 0, c, 0).unwrap();
    let err = pipeline.connect(source, 1, b, 0).unwrap_err();
    assert!(matches!(err, ConnectionError::ArityViolation { .. }));
    assert_eq!(pipeline.graph_state(), GraphState::Uncommitted);
    assert_eq!(pipeline.connections().len(), 2);
}

#[test]
fn test_type_mismatch_detected_at_connect() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_block(VectorSource::new(vec![0i16; 4])).unwrap();
    let sink = pipeline.add_block(NullSink::<u16>::new()).unwrap();

    let err = pipeline.connect(source, 0, sink, 0).unwrap_err();
    assert!(matches!(err, ConnectionError::TypeMismatch { .. }));
    assert!(err.to_string().contains("i16"));
}

/// Adds two streams item by item, optionally pausing between reading its inputs
struct Adder {
    pause: Duration,
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
    fn work(&mut self, inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        let a = inputs[0].items::<u32>()?;
        thread::sleep(self.pause);
        let b = inputs[1].items::<u32>()?;
        let out = outputs[0].items_mut::<u32>()?;
        for ((slot, x), y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
            *slot = x + y;
        }
        Ok(WorkStatus::Produced(out.len()))
    }
}

/// Emits `0..limit` a few items at a time with a pause between calls
struct TricklingSource {
    next: u32,
    limit: u32,
}

impl Block for TricklingSource {
    fn name(&self) -> &str {
        "trickling_source"
    }
    fn input_signature(&self) -> Signature {
        Signature::none()
    }
    fn output_signature(&self) -> Signature {
        Signature::single::<u32>("out")
    }
    fn work(&mut self, _inputs: &mut [InputPort], outputs: &mut [OutputPort]) -> WorkResult<WorkStatus> {
        if self.next >= self.limit {
            return Ok(WorkStatus::Done);
        }
        thread::sleep(Duration::from_millis(20));
        let out = outputs[0].items_mut::<u32>()?;
        let n = out.len().min(10).min((self.limit - self.next) as usize);
        for slot in &mut out[..n] {
            *slot = self.next;
            self.next += 1;
        }
        Ok(WorkStatus::Produced(n))
    }
}

/// Run a pipeline built by `build` on its own thread, failing if it hangs
fn run_within(timeout: Duration, build: impl FnOnce() -> Pipeline + Send + 'static) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut pipeline = build();
        let _ = tx.send(pipeline.run(usize::MAX).map_err(|e| e.to_string()));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result.unwrap(),
        Err(_) => panic!("run() did not return within {:?}", timeout),
    }
}

#[test]
fn test_multi_input_waits_for_slow_producer() {
    let sink = VectorSink::<u32>::new();
    let data = sink.data();
    run_within(Duration::from_secs(20), move || {
        let mut pipeline = Pipeline::new();
        let fast = pipeline
            .add_block(VectorSource::new((0..100u32).collect::<Vec<_>>()))
            .unwrap();
        let slow = pipeline.add_block(TricklingSource { next: 0, limit: 100 }).unwrap();
        let adder = pipeline.add_block(Adder { pause: Duration::ZERO }).unwrap();
        let sink = pipeline.add_block(sink).unwrap();

        pipeline.connect(fast, 0, adder, 0).unwrap();
        pipeline.connect(slow, 0, adder, 1).unwrap();
        pipeline.connect(adder, 0, sink, 0).unwrap();
        pipeline
    });

    // The fast source finishes long before the slow one; nothing may be dropped
    let data = data.lock().unwrap();
    assert_eq!(*data, (0..100).map(|i| 2 * i).collect::<Vec<u32>>());
}

#[test]
fn test_two_inputs_reading_one_buffer_do_not_stall_the_producer() {
    let sink = VectorSink::<u32>::new();
    let data = sink.data();
    run_within(Duration::from_secs(20), move || {
        let mut pipeline = Pipeline::new();
        let source = pipeline
            .add_block(VectorSource::new((0..10u32).collect::<Vec<_>>()).repeat(true))
            .unwrap();
        let adder = pipeline
            .add_block(Adder {
                pause: Duration::from_millis(5),
            })
            .unwrap();
        let head = pipeline.add_block(Head::<u32>::new(5000)).unwrap();
        let sink = pipeline.add_block(sink).unwrap();

        pipeline.connect(source, 0, adder, 0).unwrap();
        pipeline.connect(source, 0, adder, 1).unwrap();
        pipeline.connect(adder, 0, head, 0).unwrap();
        pipeline.connect(head, 0, sink, 0).unwrap();
        pipeline
    });

    let data = data.lock().unwrap();
    assert_eq!(data.len(), 5000);
    assert!(data.iter().enumerate().all(|(i, &v)| v == 2 * (i as u32 % 10)));
}
