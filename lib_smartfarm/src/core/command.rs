//! # Actuation Commands
//!
//! Model and validation for the timed commands sent to field actuators.
//!
//! A command is accepted only when its symbol is known and its duration is a
//! positive number of milliseconds. Both checks run before any network I/O.
//! The command window is computed here but never enforced: the start/end
//! timestamps are advisory metadata for the receiving device.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for an actuation request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The symbol is not one the actuators understand.
    #[error("Invalid command: unknown symbol '{0}'")]
    UnknownSymbol(String),

    /// Zero or negative duration.
    #[error("Invalid command: duration must be a positive number of milliseconds, got {0}")]
    NonPositiveDuration(i64),

    /// `start + duration` is past the range `DateTime<Utc>` can hold.
    #[error("Invalid command: a {0} ms window overflows the representable time range")]
    WindowOverflow(i64),
}

/// The commands an actuator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSymbol {
    /// Switch the actuator (pump) on for the command's duration.
    Activate,
}

impl CommandSymbol {
    /// Wire form of the symbol.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandSymbol::Activate => "activate",
        }
    }
}

impl fmt::Display for CommandSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandSymbol {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activate" => Ok(CommandSymbol::Activate),
            other => Err(CommandError::UnknownSymbol(other.to_string())),
        }
    }
}

/// The payload published on the command topic: `{"command": .., "duration": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationCommand {
    /// What the actuator should do.
    pub command: CommandSymbol,
    /// How long it should do it, in milliseconds. Always positive.
    pub duration: u64,
}

impl ActuationCommand {
    /// Validates a raw request.
    ///
    /// The symbol is checked first so an unknown command with a bad duration
    /// reports the symbol.
    pub fn new(symbol: &str, duration_ms: i64) -> Result<Self, CommandError> {
        let command = symbol.parse::<CommandSymbol>()?;
        if duration_ms <= 0 {
            return Err(CommandError::NonPositiveDuration(duration_ms));
        }
        Ok(Self {
            command,
            duration: duration_ms as u64,
        })
    }

    /// Computes the `[start, end)` window for a command issued at `issued_at`.
    pub fn window_from(&self, issued_at: DateTime<Utc>) -> Result<CommandWindow, CommandError> {
        let millis = self.duration as i64;
        let end = TimeDelta::try_milliseconds(millis)
            .and_then(|delta| issued_at.checked_add_signed(delta))
            .ok_or(CommandError::WindowOverflow(millis))?;
        Ok(CommandWindow {
            start: issued_at,
            end,
        })
    }
}

/// The interval during which a command is considered active by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandWindow {
    /// Instant the command was issued.
    pub start: DateTime<Utc>,
    /// `start + duration`.
    pub end: DateTime<Utc>,
}

impl CommandWindow {
    /// Length of the window.
    pub fn length(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// What the dispatcher reports back once a command has been handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    /// Always `"success"`; failures are returned as errors instead.
    pub status: String,
    /// Echo of the published payload.
    pub sent_command: ActuationCommand,
    /// Issue time.
    pub start: DateTime<Utc>,
    /// Advisory expiry time.
    pub end: DateTime<Utc>,
}

impl DispatchReceipt {
    pub(crate) fn success(sent_command: ActuationCommand, window: CommandWindow) -> Self {
        Self {
            status: "success".to_string(),
            sent_command,
            start: window.start,
            end: window.end,
        }
    }
}
