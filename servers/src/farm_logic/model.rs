use lib_smartfarm::core::CommandSymbol;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/pump-on`. Both fields are optional and default to a
/// five second activation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PumpCommandRequest {
    #[serde(default = "default_command")]
    pub command: String,
    /// Milliseconds.
    #[serde(default = "default_duration")]
    pub duration: i64,
}

fn default_command() -> String {
    CommandSymbol::Activate.as_str().to_string()
}

fn default_duration() -> i64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// `InvalidCommand` or `CommandTransportError`.
    pub error_type: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub ingestion: String,
}
