//! # Core Engine Module
//!
//! The in-process half of the smart farm backend: everything that holds state
//! or computes something, with no knowledge of which broker sits on either end.
//!
//! ## Core Components:
//!
//! - **`snapshot`**: `TelemetrySnapshot`, the schema-less JSON object a sensor
//!   last reported.
//!
//! - **`telemetry_cache`**: the single-slot, atomically swapped holder of the
//!   current snapshot. The ingestor is its only writer.
//!
//! - **`accessor`**: the read handle given to the request layer.
//!
//! - **`command`** / **`dispatcher`**: validation of actuation requests,
//!   computation of the command window, and publication through a
//!   `CommandPublisher`.
//!
//! - **`lifecycle`**: owns the background ingestion task for the lifetime of
//!   the process.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The decoded telemetry record type.
pub mod snapshot;
/// Single-slot cache for the most recent snapshot.
pub mod telemetry_cache;
/// Read-only handle on the cache for request handlers.
pub mod accessor;
/// Actuation command model and validation.
pub mod command;
/// Builds command windows and hands payloads to the command transport.
pub mod dispatcher;
/// Start/abandon control for the background ingestion task.
pub mod lifecycle;

// --- Public API Re-exports ---
pub use accessor::SnapshotAccessor;
pub use command::{ActuationCommand, CommandError, CommandSymbol, CommandWindow, DispatchReceipt};
pub use dispatcher::{CommandDispatcher, CommandPublisher, DispatchError, PublishError};
#[cfg(any(test, feature = "testing"))]
pub use dispatcher::MockCommandPublisher;
pub use lifecycle::{IngestionLifecycle, IngestionStatus, LifecycleError};
pub use snapshot::TelemetrySnapshot;
pub use telemetry_cache::TelemetryCache;
