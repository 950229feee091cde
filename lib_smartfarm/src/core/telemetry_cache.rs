//! # Telemetry Cache
//!
//! A single-slot holder for the latest [`TelemetrySnapshot`].
//!
//! The slot is an `ArcSwap<TelemetrySnapshot>`: `set` publishes a new `Arc` with
//! one atomic store and `get` loads the current one without taking a lock. A
//! reader therefore sees either the previous snapshot or the new one in full,
//! and never waits on the writer.
//!
//! There is exactly one writer (the ingestor) and any number of readers (request
//! handlers). The cache keeps no history and emits no change notification.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::core::snapshot::TelemetrySnapshot;

/// Shared, lock-free store for the current telemetry snapshot.
#[derive(Debug)]
pub struct TelemetryCache {
    current: ArcSwap<TelemetrySnapshot>,
}

impl TelemetryCache {
    /// Creates a cache holding the empty snapshot.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TelemetrySnapshot::empty()),
        }
    }

    /// Replaces the current snapshot wholesale. Nothing is merged.
    pub fn set(&self, snapshot: TelemetrySnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Returns the current snapshot.
    pub fn get(&self) -> Arc<TelemetrySnapshot> {
        self.current.load_full()
    }
}

impl Default for TelemetryCache {
    fn default() -> Self {
        Self::new()
    }
}
