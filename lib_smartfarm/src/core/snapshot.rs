//! # Telemetry Snapshot
//!
//! The most recent reading published by the farm sensors. The core enforces no
//! schema on it: keys and values are whatever the sensor gateway put in the JSON
//! object, and downstream consumers interpret the fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded telemetry message body.
///
/// Serialises transparently, so returning it from an HTTP handler yields the
/// object exactly as it arrived on the bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetrySnapshot(Map<String, Value>);

impl TelemetrySnapshot {
    /// The snapshot the cache holds before any message has been received.
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Returns `true` when no field is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Looks up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl From<Map<String, Value>> for TelemetrySnapshot {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for TelemetrySnapshot {
    /// The value that was not a JSON object.
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}
