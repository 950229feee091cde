//! # Connections Module
//!
//! This module handles the connections to external brokers: the AMQP telemetry
//! bus the sensors publish to, and the MQTT broker the actuators listen on.

/// Fanout subscription on the AMQP telemetry bus.
pub mod bus_amqp;

/// One-shot MQTT publisher for actuator commands.
pub mod command_mqtt;

pub use bus_amqp::{BusClient, BusConfig, BusError, BusSubscription, DeliveryMetadata, InboundMessage};
pub use command_mqtt::{MqttCommandPublisher, MqttConfig};
