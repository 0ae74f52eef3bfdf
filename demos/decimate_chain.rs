//! Example: Decimate a counting sequence through a three-block chain
//!
//! This example demonstrates:
//! 1. Building a graph of source, decimator and sink
//! 2. Tuning buffer size and the per-call output cap
//! 3. Reading per-node statistics after the run
//!
//! Usage:
//!   cargo run --release --example decimate_chain -- --count 1000000 --factor 4
//!
//! Set RUST_LOG=debug to see scheduler activity.

use std::time::Instant;

use clap::Parser;
use ringflow::blocks::{KeepOneInN, VectorSink, VectorSource};
use ringflow::{FlowConfig, Pipeline};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of items produced by the source
    #[arg(short, long, default_value_t = 1_000_000)]
    count: u32,

    /// Keep one item out of every `factor`
    #[arg(short, long, default_value_t = 4)]
    factor: usize,

    /// Cap on items offered to a single work() call
    #[arg(short, long, default_value_t = usize::MAX)]
    max_output_items: usize,

    /// Minimum size of each stream buffer in bytes
    #[arg(long, default_value_t = 32 * 1024)]
    min_buffer_bytes: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== Decimate Chain Example ===");
    info!("Items: {}, factor: {}", args.count, args.factor);

    let config = FlowConfig::new().with_min_buffer_bytes(args.min_buffer_bytes);
    let mut pipeline = Pipeline::with_config(config);

    let source = pipeline.add_block(VectorSource::new((0..args.count).collect::<Vec<_>>()))?;
    let decim = pipeline.add_block(KeepOneInN::<u32>::new(args.factor))?;
    let sink = VectorSink::<u32>::new();
    let data = sink.data();
    let sink = pipeline.add_block(sink)?;

    pipeline.connect(source, 0, decim, 0)?;
    pipeline.connect(decim, 0, sink, 0)?;

    let started = Instant::now();
    pipeline.run(args.max_output_items)?;
    let elapsed = started.elapsed();

    let received = data.lock().map(|d| d.len()).unwrap_or_default();
    let expected = args.count as usize / args.factor;
    info!("Received {} items in {:.2?}", received, elapsed);
    if received != expected {
        warn!("Expected {} items", expected);
    }

    for stats in pipeline.node_stats() {
        info!(
            "{:<16} calls={:<8} consumed={:<10} produced={:<10} wakeups={}",
            stats.name, stats.work_calls, stats.items_consumed, stats.items_produced, stats.wakeups
        );
    }

    Ok(())
}
