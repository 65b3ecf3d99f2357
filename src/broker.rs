// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Abstractions
//!
//! The consumer never talks to lapin directly. It goes through the traits below, which the
//! `pool` and `channel` modules implement on top of lapin:
//! - `ConnectionPool`: hands out already-connected, reusable connections by name
//! - `BrokerConnection`: opens channels
//! - `BrokerChannel`: declares topology, consumes, acknowledges and closes
//!
//! `Delivery` is the broker-independent view of a received message.

use crate::{errors::AmqpError, exchange::ExchangeConfig, queue::QueueConfig};
use async_trait::async_trait;
use lapin::protocol::basic::AMQPProperties;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Receives every delivery of a consumer started with `BrokerChannel::basic_consume`.
pub type DeliveryListener = Arc<dyn Fn(Delivery) + Send + Sync>;

/// A message received from the broker.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    /// Channel-scoped identifier used for acknowledgment
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: AMQPProperties,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: &[u8]) -> Delivery {
        Delivery {
            delivery_tag,
            body: body.to_vec(),
            ..Delivery::default()
        }
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Delivery {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            body: delivery.data,
        }
    }
}

/// Supplies reusable broker connections.
///
/// Implementations own the reconnection of the underlying connection; callers only
/// build channels on top of what they get.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn get(&self, connection_name: &str) -> Result<Arc<dyn BrokerConnection>, AmqpError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;
}

/// An open session on a broker connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Whether the channel can still be used.
    fn is_open(&self) -> bool;

    async fn exchange_declare(&self, exchange: &ExchangeConfig) -> Result<(), AmqpError>;

    async fn queue_declare(&self, queue: &QueueConfig) -> Result<(), AmqpError>;

    /// Starts consuming `queue` in manual acknowledgment mode, handing every delivery to
    /// `listener`.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        listener: DeliveryListener,
    ) -> Result<(), AmqpError>;

    /// Acknowledges exactly one delivery.
    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}
