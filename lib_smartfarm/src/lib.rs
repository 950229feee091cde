//! # lib_smartfarm
//!
//! Telemetry ingestion, snapshot caching and actuator command dispatch for the
//! smart farm backend.
//!
//! Farm sensors publish JSON readings to a fanout exchange on the telemetry bus.
//! A single background ingestor drains a private, auto-deleted queue bound to
//! that exchange and swaps every successfully decoded reading into the
//! [`core::TelemetryCache`]. HTTP handlers read the current snapshot through a
//! [`core::SnapshotAccessor`] and send timed pump commands to the field through
//! the [`core::CommandDispatcher`].
//!
//! Modules are gated by cargo features named after their folder:
//! `core`, `connections`, `ingestors` (and `full` for all of them).

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "ingestors")]
pub mod ingestors;
