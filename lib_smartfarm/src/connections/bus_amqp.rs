//! # AMQP Telemetry Bus Client
//!
//! Subscribes to the fanout exchange the farm sensors publish to.
//!
//! ## Topology:
//! - The exchange (default `smart_farm_data`) is declared `fanout` and
//!   `durable`. Declaring is idempotent, so it is safe against an exchange
//!   the broker already has.
//! - A server-named queue is declared `exclusive` + `auto_delete` and bound with
//!   an empty routing key. It receives every message published to the exchange
//!   and disappears with the connection: nothing is resumed after a restart.
//! - Consumption is `no_ack` (auto-ack). A crash loses whatever was in flight.
//!
//! The client never retries. A failed connect is returned to the caller, and a
//! lost connection ends the delivery stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{BoxStream, Stream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;

/// Name of the fanout exchange the sensor gateway publishes to.
pub const DEFAULT_EXCHANGE: &str = "smart_farm_data";

/// Custom error types for bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Failed to connect to telemetry bus at {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: lapin::Error,
    },

    #[error("Failed to set up exchange/queue topology: {0}")]
    Topology(#[source] lapin::Error),

    #[error("Failed to start consuming: {0}")]
    Consume(#[source] lapin::Error),

    #[error("Delivery failed: {0}")]
    Delivery(#[source] lapin::Error),

    #[error("Telemetry bus connection closed")]
    Closed,
}

/// Connection settings for the telemetry bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    /// Fanout exchange to bind to.
    pub exchange: String,
    /// Consumer tag; empty lets the broker pick one.
    pub consumer_tag: String,
}

impl BusConfig {
    /// Settings with the standard port, root vhost and `smart_farm_data` exchange.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 5672,
            vhost: "/".to_string(),
            username: username.into(),
            password: password.into(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            consumer_tag: String::new(),
        }
    }

    /// Builds the AMQP URI without going through string formatting, so a `/`
    /// vhost or special characters in the password need no escaping.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: AMQPQueryString::default(),
        }
    }
}

/// Delivery metadata kept for logging. The core does not interpret it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryMetadata {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
}

/// A raw message body as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub metadata: DeliveryMetadata,
}

impl InboundMessage {
    /// A message with empty metadata, for feeding the ingestor directly.
    pub fn from_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: DeliveryMetadata::default(),
        }
    }
}

impl From<Delivery> for InboundMessage {
    fn from(delivery: Delivery) -> Self {
        Self {
            metadata: DeliveryMetadata {
                delivery_tag: delivery.delivery_tag,
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                redelivered: delivery.redelivered,
            },
            payload: delivery.data,
        }
    }
}

/// A connected channel with the exchange declared and a private queue bound to it.
pub struct BusClient {
    connection: Connection,
    channel: Channel,
    queue: String,
    consumer_tag: String,
}

impl BusClient {
    /// Connects and sets up the fanout binding.
    ///
    /// # Errors
    /// `BusError::Connect` when the broker is unreachable or rejects the
    /// credentials, `BusError::Topology` when a declare or bind fails.
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        log::info!(
            "Connecting to telemetry bus amqp://{}:{}{} as '{}'",
            config.host,
            config.port,
            config.vhost,
            config.username
        );

        let connection = Connection::connect_uri(config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|source| BusError::Connect {
                host: config.host.clone(),
                port: config.port,
                source,
            })?;

        let channel = connection.create_channel().await.map_err(BusError::Topology)?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BusError::Topology)?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BusError::Topology)?;
        let queue = queue.name().as_str().to_string();

        channel
            .queue_bind(&queue, &config.exchange, "", QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(BusError::Topology)?;

        log::info!("Listening on exchange \"{}\" through queue {}", config.exchange, queue);

        Ok(Self {
            connection,
            channel,
            queue,
            consumer_tag: config.consumer_tag.clone(),
        })
    }

    /// Broker-assigned name of the private queue.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Starts auto-ack consumption. The returned stream owns the connection.
    pub async fn subscribe(self) -> Result<BusSubscription, BusError> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BusError::Consume)?;

        let deliveries = consumer
            .map(|delivery| delivery.map(InboundMessage::from).map_err(BusError::Delivery))
            .boxed();

        Ok(BusSubscription {
            deliveries,
            channel: self.channel,
            connection: self.connection,
        })
    }
}

/// Stream of deliveries from the private queue.
///
/// The broker deletes the queue once it sees the connection go away. Call
/// [`BusSubscription::close`] to end it cleanly; otherwise the socket stays
/// open until the process exits.
pub struct BusSubscription {
    deliveries: BoxStream<'static, Result<InboundMessage, BusError>>,
    channel: Channel,
    connection: Connection,
}

impl BusSubscription {
    /// Closes the channel and the connection.
    ///
    /// Errors are logged, not returned: after a transport failure there is
    /// usually nothing left to close.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "consumer shutting down").await {
            log::debug!("Closing telemetry bus channel: {}", e);
        }
        if let Err(e) = self.connection.close(200, "consumer shutting down").await {
            log::debug!("Closing telemetry bus connection: {}", e);
        }
    }
}

impl Stream for BusSubscription {
    type Item = Result<InboundMessage, BusError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.deliveries.poll_next_unpin(cx)
    }
}
