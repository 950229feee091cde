//! Read path handed to the request layer.

use std::sync::Arc;

use crate::core::snapshot::TelemetrySnapshot;
use crate::core::telemetry_cache::TelemetryCache;

/// Cloneable read handle on the [`TelemetryCache`].
///
/// Handlers only ever need the latest snapshot, so this is the only view of the
/// cache they get; the ingestor keeps the `Arc<TelemetryCache>` it writes to.
#[derive(Debug, Clone)]
pub struct SnapshotAccessor {
    cache: Arc<TelemetryCache>,
}

impl SnapshotAccessor {
    /// Wraps a shared cache.
    pub fn new(cache: Arc<TelemetryCache>) -> Self {
        Self { cache }
    }

    /// Returns the latest snapshot immediately, or the empty one if nothing has
    /// been ingested yet. Never waits for a message.
    pub fn get_latest(&self) -> Arc<TelemetrySnapshot> {
        self.cache.get()
    }
}
