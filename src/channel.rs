// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel
//!
//! `AmqpChannel` is the lapin-backed `BrokerChannel`. It declares the consumer topology,
//! starts manual-ack consumption and forwards every delivery of the lapin consumer stream
//! to the listener installed by the consumer.

use crate::{
    broker::{BrokerChannel, Delivery, DeliveryListener},
    errors::AmqpError,
    exchange::ExchangeConfig,
    queue::QueueConfig,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use tracing::{debug, error};

/// Reply code sent when the consumer closes a channel on purpose.
const REPLY_SUCCESS: u16 = 200;

pub struct AmqpChannel {
    channel: Channel,
}

impl AmqpChannel {
    pub fn new(channel: Channel) -> AmqpChannel {
        AmqpChannel { channel }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn exchange_declare(&self, exchange: &ExchangeConfig) -> Result<(), AmqpError> {
        debug!("declaring exchange: {}", exchange.name);

        match self
            .channel
            .exchange_declare(
                &exchange.name,
                exchange.kind.into(),
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = %exchange.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(exchange.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn queue_declare(&self, queue: &QueueConfig) -> Result<(), AmqpError> {
        debug!("declaring queue: {}", queue.name);

        match self
            .channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    nowait: false,
                },
                queue.field_table(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = %queue.name,
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(queue.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        listener: DeliveryListener,
    ) -> Result<(), AmqpError> {
        let mut consumer = match self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer_tag.to_owned();
        tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => listener(Delivery::from(delivery)),
                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }
            debug!(consumer_tag = %tag, "consumer stream ended");
        });

        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.is_open() {
            return Ok(());
        }

        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseChannelError(err.to_string()))
    }
}
