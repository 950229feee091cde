use futures_util::stream;
use lib_smartfarm::connections::{BusError, InboundMessage};
use lib_smartfarm::core::{SnapshotAccessor, TelemetryCache, TelemetrySnapshot};
use lib_smartfarm::ingestors::{IngestError, TelemetryIngestor};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn delivery(payload: &str) -> Result<InboundMessage, BusError> {
    Ok(InboundMessage::from_payload(payload.as_bytes().to_vec()))
}

#[test]
fn test_fresh_cache_reads_as_empty_object() {
    let accessor = SnapshotAccessor::new(Arc::new(TelemetryCache::new()));

    let latest = accessor.get_latest();
    assert!(latest.is_empty());
    assert_eq!(serde_json::to_value(&*latest).unwrap(), json!({}));
}

#[tokio::test]
async fn test_last_decoded_message_wins() {
    let cache = Arc::new(TelemetryCache::new());
    let accessor = SnapshotAccessor::new(Arc::clone(&cache));
    let deliveries = stream::iter((1..=50).map(|seq| delivery(&format!(r#"{{"seq": {seq}, "humidity": 60}}"#))));

    let result = TelemetryIngestor::new(cache).run(deliveries, CancellationToken::new()).await;

    assert!(matches!(result, Err(IngestError::Transport(BusError::Closed))));
    assert_eq!(
        serde_json::to_value(&*accessor.get_latest()).unwrap(),
        json!({"seq": 50, "humidity": 60})
    );
}

#[tokio::test]
async fn test_undecodable_messages_leave_snapshot_untouched() {
    let cache = Arc::new(TelemetryCache::new());
    let accessor = SnapshotAccessor::new(Arc::clone(&cache));
    let deliveries = stream::iter(vec![
        delivery(r#"{"temperature": 22.5}"#),
        delivery("not json at all"),
        delivery("[1, 2, 3]"),
        delivery("\"just a string\""),
        delivery(""),
    ]);

    let _ = TelemetryIngestor::new(cache).run(deliveries, CancellationToken::new()).await;

    assert_eq!(
        serde_json::to_value(&*accessor.get_latest()).unwrap(),
        json!({"temperature": 22.5})
    );
}

#[tokio::test]
async fn test_only_failures_keep_cache_empty() {
    let cache = Arc::new(TelemetryCache::new());
    let deliveries = stream::iter(vec![delivery("{"), delivery("null")]);

    let _ = TelemetryIngestor::new(Arc::clone(&cache)).run(deliveries, CancellationToken::new()).await;

    assert!(cache.get().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_never_see_partial_snapshots() {
    let cache = Arc::new(TelemetryCache::new());
    let accessor = SnapshotAccessor::new(Arc::clone(&cache));

    let mut readers = Vec::new();
    for _ in 0..100 {
        let accessor = accessor.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..200 {
                let snapshot = accessor.get_latest();
                if !snapshot.is_empty() {
                    // Every write carries matching a/b fields.
                    assert_eq!(snapshot.get("a"), snapshot.get("b"));
                    assert_eq!(snapshot.len(), 2);
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    let writer = tokio::spawn(async move {
        for i in 0..1_000 {
            let snapshot = TelemetrySnapshot::try_from(json!({"a": i, "b": i})).unwrap();
            cache.set(snapshot);
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
        }
    });

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}
