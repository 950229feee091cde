use chrono::Utc;
use clap::Parser;
use futures_util::stream;
use lib_smartfarm::connections::{BusError, InboundMessage};
use lib_smartfarm::core::{SnapshotAccessor, TelemetryCache};
use lib_smartfarm::ingestors::TelemetryIngestor;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Pushes synthetic sensor readings through the ingestor while readers poll the cache", long_about = None)]
struct Args {
    /// Number of telemetry messages to ingest
    #[clap(short, long, default_value_t = 100_000)]
    messages: u64,

    /// Number of concurrent snapshot readers
    #[clap(short, long, default_value_t = 100)]
    readers: usize,

    /// Every Nth message is malformed
    #[clap(long, default_value_t = 10)]
    bad_every: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cache = Arc::new(TelemetryCache::new());
    let accessor = SnapshotAccessor::new(Arc::clone(&cache));
    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicU64::new(0));

    let mut reader_handles = Vec::with_capacity(args.readers);
    for _ in 0..args.readers {
        let accessor = accessor.clone();
        let done = Arc::clone(&done);
        let reads = Arc::clone(&reads);
        reader_handles.push(tokio::spawn(async move {
            while !done.load(Ordering::Relaxed) {
                let snapshot = accessor.get_latest();
                if !snapshot.is_empty() && snapshot.get("seq") != snapshot.get("check") {
                    anyhow::bail!("torn snapshot observed: {:?}", snapshot);
                }
                reads.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
            Ok(())
        }));
    }

    let bad_every = args.bad_every.max(1);
    let deliveries = stream::iter((1..=args.messages).map(move |seq| {
        let payload = if seq % bad_every == 0 {
            b"{truncated".to_vec()
        } else {
            json!({"seq": seq, "check": seq, "temperature": 20.0 + (seq % 15) as f64})
                .to_string()
                .into_bytes()
        };
        Ok::<_, BusError>(InboundMessage::from_payload(payload))
    }));

    println!("[{}] Ingesting {} messages with {} readers...", Utc::now().to_rfc3339(), args.messages, args.readers);
    let started = Instant::now();
    // The iterator stream ends after the last message, which the ingestor
    // reports as a closed transport.
    let outcome = TelemetryIngestor::new(cache).run(deliveries, CancellationToken::new()).await;
    let elapsed = started.elapsed();

    done.store(true, Ordering::Relaxed);
    for handle in reader_handles {
        handle.await??;
    }

    println!("Ingestor finished: {:?}", outcome.err().map(|e| e.to_string()));
    println!(
        "{} messages in {:.3}s ({:.0} msg/s), {} snapshot reads",
        args.messages,
        elapsed.as_secs_f64(),
        args.messages as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        reads.load(Ordering::Relaxed)
    );
    println!("Final snapshot: {}", serde_json::to_string(&*accessor.get_latest())?);
    Ok(())
}
