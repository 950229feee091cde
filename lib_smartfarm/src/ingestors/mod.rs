//! # Data Ingestors Module
//!
//! Clients that bring external data into the process. There is one: the
//! telemetry bus ingestor, which drains the fanout subscription and keeps the
//! [`crate::core::TelemetryCache`] pointing at the latest decoded reading.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The background consumer of the AMQP telemetry bus.
pub mod telemetry_bus;

// --- Public API Re-exports ---
pub use telemetry_bus::{decode_payload, run_bus_session, DecodeError, IngestError, IngestStats, TelemetryIngestor};
