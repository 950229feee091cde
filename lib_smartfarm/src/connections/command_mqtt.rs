//! # MQTT Command Publisher
//!
//! Publishes actuator commands with a fresh MQTT connection per command:
//! connect, publish at QoS 0, disconnect. Commands are rare, so no connection
//! is pooled between calls.
//!
//! The whole exchange is bounded by `connect_timeout`. Any connection, auth or
//! publish failure is returned as a [`PublishError`]; nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Outgoing, QoS};

use crate::core::dispatcher::{CommandPublisher, PublishError};

/// Connection settings for the command broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic the actuators subscribe to.
    pub topic: String,
    pub connect_timeout: Duration,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1883,
            username: None,
            password: None,
            topic: topic.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("smartfarm-cmd-{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_clean_session(true);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// [`CommandPublisher`] backed by a short-lived `rumqttc` client.
#[derive(Debug, Clone)]
pub struct MqttCommandPublisher {
    config: MqttConfig,
}

impl MqttCommandPublisher {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    async fn publish_once(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let (client, mut eventloop) = AsyncClient::new(self.config.options(), 10);

        // Both requests are queued before the event loop connects, so they go
        // out in order right after CONNACK.
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| PublishError::Publish(e.to_string()))?;
        client
            .disconnect()
            .await
            .map_err(|e| PublishError::Publish(e.to_string()))?;

        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                    log::debug!("Command handed to MQTT broker {}:{}", self.config.host, self.config.port);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(PublishError::Rejected(format!("{:?}", code)));
                }
                Err(e) => return Err(PublishError::Connection(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl CommandPublisher for MqttCommandPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.publish_once(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(timeout.as_secs())),
        }
    }
}
