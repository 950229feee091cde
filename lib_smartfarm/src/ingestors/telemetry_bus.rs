//! # Telemetry Bus Ingestor
//!
//! Drains the bus subscription and writes each decoded message into the
//! telemetry cache.
//!
//! ## Key Design Principles:
//! - **Failure isolation**: a payload that does not decode is logged and
//!   skipped. The cache keeps the previous snapshot and the loop keeps going.
//! - **Bounded handling**: decoding is pure parsing with no I/O, since a slow
//!   handler would hold up every delivery behind it.
//! - **No reconnect**: a transport error or the end of the delivery stream ends
//!   the session with `IngestError::Transport`. Restarting is left to whoever
//!   runs the process.

use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::connections::bus_amqp::{BusClient, BusConfig, BusError, InboundMessage};
use crate::core::snapshot::TelemetrySnapshot;
use crate::core::telemetry_cache::TelemetryCache;

/// Why a single message could not become a snapshot.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("JSON decode error: expected an object, got {0}")]
    NotAnObject(&'static str),
}

/// Why an ingestion session ended.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The bus connection failed or closed.
    #[error("Telemetry bus transport error: {0}")]
    Transport(#[from] BusError),
}

/// Counters for one ingestion session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages taken off the stream.
    pub received: u64,
    /// Messages that replaced the snapshot.
    pub applied: u64,
    /// Messages dropped because they did not decode.
    pub rejected: u64,
}

/// Decodes a message body into a snapshot.
///
/// Invalid UTF-8 sequences are replaced rather than rejected; only a JSON parse
/// failure (or a non-object document) is a decode error.
pub fn decode_payload(payload: &[u8]) -> Result<TelemetrySnapshot, DecodeError> {
    let text = String::from_utf8_lossy(payload);
    let value: serde_json::Value = serde_json::from_str(&text)?;
    TelemetrySnapshot::try_from(value).map_err(|other| DecodeError::NotAnObject(json_kind(&other)))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// The single writer of the telemetry cache.
#[derive(Debug, Clone)]
pub struct TelemetryIngestor {
    cache: Arc<TelemetryCache>,
}

impl TelemetryIngestor {
    /// Creates an ingestor that writes into `cache`.
    pub fn new(cache: Arc<TelemetryCache>) -> Self {
        Self { cache }
    }

    /// Decodes one message and, on success, replaces the cached snapshot.
    pub fn handle_message(&self, message: &InboundMessage) -> Result<(), DecodeError> {
        log::debug!(
            "[x] Received #{} from '{}': {}",
            message.metadata.delivery_tag,
            message.metadata.exchange,
            String::from_utf8_lossy(&message.payload)
        );
        let snapshot = decode_payload(&message.payload)?;
        self.cache.set(snapshot);
        Ok(())
    }

    /// Consumes `deliveries` until `shutdown` fires or the transport fails.
    ///
    /// # Returns
    /// The session counters on shutdown, `IngestError::Transport` when the
    /// stream yields an error or ends.
    pub async fn run<S>(&self, mut deliveries: S, shutdown: CancellationToken) -> Result<IngestStats, IngestError>
    where
        S: Stream<Item = Result<InboundMessage, BusError>> + Unpin,
    {
        let mut stats = IngestStats::default();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!(
                        "Ingestion loop stopping: {} received, {} applied, {} rejected.",
                        stats.received, stats.applied, stats.rejected
                    );
                    return Ok(stats);
                }
                next = deliveries.next() => {
                    match next {
                        Some(Ok(message)) => {
                            stats.received += 1;
                            match self.handle_message(&message) {
                                Ok(()) => stats.applied += 1,
                                Err(e) => {
                                    stats.rejected += 1;
                                    log::warn!("[!] {} (delivery #{})", e, message.metadata.delivery_tag);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            log::error!("Telemetry bus delivery error: {}", e);
                            return Err(IngestError::Transport(e));
                        }
                        None => {
                            log::error!("Telemetry bus stream ended.");
                            return Err(IngestError::Transport(BusError::Closed));
                        }
                    }
                }
            }
        }
    }
}

/// Connects to the bus and runs the ingestor until shutdown or transport loss.
///
/// A failed connection is logged and ends the session; it is not retried.
pub async fn run_bus_session(config: BusConfig, cache: Arc<TelemetryCache>, shutdown: CancellationToken) {
    log::info!("Telemetry bus consumer starting...");

    let subscription = match BusClient::connect(&config).await {
        Ok(client) => {
            log::info!("Consuming telemetry from queue {}", client.queue_name());
            client.subscribe().await
        }
        Err(e) => Err(e),
    };

    let mut subscription = match subscription {
        Ok(subscription) => subscription,
        Err(e) => {
            log::error!("Failed to connect to telemetry bus: {}", e);
            return;
        }
    };

    match TelemetryIngestor::new(cache).run(&mut subscription, shutdown).await {
        Ok(stats) => log::info!("Telemetry bus session closed after {} messages.", stats.received),
        Err(e) => log::error!("Telemetry bus session ended: {}", e),
    }
    subscription.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    fn ok(payload: &str) -> Result<InboundMessage, BusError> {
        Ok(InboundMessage::from_payload(payload.as_bytes().to_vec()))
    }

    #[test]
    fn test_decode_payload_accepts_objects() {
        let snapshot = decode_payload(br#"{"temperature": 31.2, "pump": {"on": false}}"#).unwrap();
        assert_eq!(snapshot.get("temperature"), Some(&json!(31.2)));
        assert_eq!(snapshot.get("pump"), Some(&json!({"on": false})));
    }

    #[test]
    fn test_decode_payload_replaces_invalid_utf8() {
        let mut payload = br#"{"note": ""#.to_vec();
        payload.push(0xFF);
        payload.extend_from_slice(br#""}"#);

        let snapshot = decode_payload(&payload).unwrap();
        assert_eq!(snapshot.get("note"), Some(&json!("\u{FFFD}")));
    }

    #[test]
    fn test_decode_payload_rejects_malformed_and_non_objects() {
        assert!(matches!(decode_payload(b"{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_payload(b""), Err(DecodeError::Json(_))));
        assert!(matches!(decode_payload(b"[1,2]"), Err(DecodeError::NotAnObject("an array"))));
    }

    #[test]
    fn test_handle_message_keeps_previous_snapshot_on_failure() {
        let cache = Arc::new(TelemetryCache::new());
        let ingestor = TelemetryIngestor::new(Arc::clone(&cache));

        ingestor.handle_message(&InboundMessage::from_payload(br#"{"seq": 1}"#.to_vec())).unwrap();
        assert!(ingestor.handle_message(&InboundMessage::from_payload(b"garbage".to_vec())).is_err());

        assert_eq!(cache.get().get("seq"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_run_survives_bad_messages_and_reports_stream_end() {
        let cache = Arc::new(TelemetryCache::new());
        let ingestor = TelemetryIngestor::new(Arc::clone(&cache));
        let deliveries = stream::iter(vec![ok(r#"{"seq": 1}"#), ok("{broken"), ok(r#"{"seq": 3}"#)]);

        let result = ingestor.run(deliveries, CancellationToken::new()).await;

        assert!(matches!(result, Err(IngestError::Transport(BusError::Closed))));
        assert_eq!(cache.get().get("seq"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_run_stops_on_delivery_error() {
        let cache = Arc::new(TelemetryCache::new());
        let ingestor = TelemetryIngestor::new(Arc::clone(&cache));
        let deliveries = stream::iter(vec![
            ok(r#"{"seq": 1}"#),
            Err(BusError::Closed),
            ok(r#"{"seq": 2}"#),
        ]);

        let result = ingestor.run(deliveries, CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(cache.get().get("seq"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_run_returns_stats_on_shutdown() {
        let cache = Arc::new(TelemetryCache::new());
        let ingestor = TelemetryIngestor::new(Arc::clone(&cache));
        let shutdown = CancellationToken::new();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let deliveries = tokio_stream_from(rx);
        let handle = {
            let ingestor = ingestor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { ingestor.run(deliveries, shutdown).await })
        };

        tx.send(ok(r#"{"seq": 1}"#)).unwrap();
        tx.send(ok("nope")).unwrap();
        tx.send(ok(r#"{"seq": 2}"#)).unwrap();

        // Wait until the last good message has landed before shutting down.
        while cache.get().get("seq") != Some(&json!(2)) {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats, IngestStats { received: 3, applied: 2, rejected: 1 });
    }

    #[tokio::test]
    async fn test_refused_bus_connection_ends_session_without_retry() {
        // Port 1 on loopback is closed, so the connect fails fast.
        let mut config = BusConfig::new("127.0.0.1", "farm", "secret");
        config.port = 1;
        let cache = Arc::new(TelemetryCache::new());

        let mut lifecycle = crate::core::IngestionLifecycle::new();
        let status = lifecycle.status();
        let session_cache = Arc::clone(&cache);
        lifecycle
            .start(move |token| run_bus_session(config, session_cache, token))
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while status.is_running() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should end after the connection is refused");

        assert!(!status.is_running());
        assert!(cache.get().is_empty());
        lifecycle.shutdown();
    }

    fn tokio_stream_from(
        rx: tokio::sync::mpsc::UnboundedReceiver<Result<InboundMessage, BusError>>,
    ) -> impl Stream<Item = Result<InboundMessage, BusError>> + Unpin {
        Box::pin(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }))
    }
}
