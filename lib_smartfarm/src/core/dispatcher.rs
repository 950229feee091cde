//! # Command Dispatcher
//!
//! Turns an actuation request into a published command.
//!
//! ## Logic:
//! 1.  Validate the symbol and duration (`ActuationCommand::new`). Nothing is
//!     sent for an invalid request.
//! 2.  Capture the issue instant and compute the command window.
//! 3.  Serialise `{"command", "duration"}` and hand it to the `CommandPublisher`
//!     for the configured topic.
//! 4.  Return the echoed payload with the window.
//!
//! Delivery is at-most-once: a publish error is returned to the caller and never
//! retried. A missed "activate" leaves the pump off, which is the safe state.
//! The dispatcher keeps no state between calls, so concurrent dispatches need no
//! coordination.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::core::command::{ActuationCommand, CommandError, DispatchReceipt};

/// Errors raised by a command transport.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker could not be reached, or the connection dropped mid-exchange.
    #[error("Failed to connect to command broker: {0}")]
    Connection(String),

    /// CONNACK carried a refusal code (bad credentials, unauthorised client).
    #[error("Command broker rejected the connection: {0}")]
    Rejected(String),

    /// The client refused to queue the request.
    #[error("Failed to publish command: {0}")]
    Publish(String),

    /// The connect/publish/disconnect exchange did not finish in time.
    #[error("Timed out after {0}s waiting for the command broker")]
    Timeout(u64),

    /// Serialising the payload failed.
    #[error("Failed to encode command payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a dispatch did not go out. Validation and transport failures stay
/// distinguishable so the request layer can map them to different statuses.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request was rejected before anything was sent.
    #[error(transparent)]
    Invalid(#[from] CommandError),

    /// The command was valid but the transport failed.
    #[error("MQTT publish failed: {0}")]
    Transport(#[from] PublishError),
}

/// A fire-and-forget transport for command payloads.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publishes `payload` to `topic` once.
    ///
    /// # Returns
    /// () once the transport accepted the message, PublishError otherwise
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Validates, windows and publishes actuation commands.
#[derive(Clone)]
pub struct CommandDispatcher {
    publisher: Arc<dyn CommandPublisher>,
    topic: String,
}

impl CommandDispatcher {
    /// Creates a dispatcher that publishes to `topic` through `publisher`.
    pub fn new(publisher: Arc<dyn CommandPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// The command topic this dispatcher publishes to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Dispatches `symbol` for `duration_ms` milliseconds.
    pub async fn dispatch(&self, symbol: &str, duration_ms: i64) -> Result<DispatchReceipt, DispatchError> {
        let command = ActuationCommand::new(symbol, duration_ms)?;
        let window = command.window_from(Utc::now())?;
        let payload = serde_json::to_vec(&command).map_err(PublishError::from)?;

        log::info!(
            "Dispatching '{}' for {} ms to topic '{}' (window {} .. {})",
            command.command,
            command.duration,
            self.topic,
            window.start.to_rfc3339(),
            window.end.to_rfc3339()
        );

        if let Err(e) = self.publisher.publish(&self.topic, payload).await {
            log::error!("Command publish to '{}' failed: {}", self.topic, e);
            return Err(DispatchError::Transport(e));
        }

        Ok(DispatchReceipt::success(command, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::CommandSymbol;
    use chrono::TimeDelta;
    use serde_json::json;

    fn dispatcher_with(mock: MockCommandPublisher) -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(mock), "farm/pump/cmd")
    }

    #[tokio::test]
    async fn test_dispatch_publishes_payload_and_returns_window() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish()
            .withf(|topic: &str, payload: &Vec<u8>| {
                topic == "farm/pump/cmd"
                    && serde_json::from_slice::<serde_json::Value>(payload).ok()
                        == Some(json!({"command": "activate", "duration": 5000}))
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = dispatcher_with(mock);
        assert_eq!(dispatcher.topic(), "farm/pump/cmd");
        let receipt = dispatcher.dispatch("activate", 5000).await.unwrap();

        assert_eq!(receipt.status, "success");
        assert_eq!(receipt.sent_command.command, CommandSymbol::Activate);
        assert_eq!(receipt.sent_command.duration, 5000);
        assert_eq!(receipt.end - receipt.start, TimeDelta::milliseconds(5000));
    }

    #[tokio::test]
    async fn test_unknown_symbol_never_reaches_the_transport() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish().times(0);

        let err = dispatcher_with(mock).dispatch("unknown", 5000).await.unwrap_err();
        assert!(matches!(err, DispatchError::Invalid(CommandError::UnknownSymbol(_))));
    }

    #[tokio::test]
    async fn test_negative_duration_never_reaches_the_transport() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish().times(0);

        let err = dispatcher_with(mock).dispatch("activate", -1).await.unwrap_err();
        assert!(matches!(err, DispatchError::Invalid(CommandError::NonPositiveDuration(-1))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_surfaced_without_retry() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish()
            .times(1)
            .returning(|_, _| Err(PublishError::Connection("connection refused".to_string())));

        let err = dispatcher_with(mock).dispatch("activate", 1000).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(PublishError::Connection(_))));
        assert!(err.to_string().starts_with("MQTT publish failed"));
    }
}
