// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Consumer
//!
//! `AmqpError` represents every failure the consumer can run into while talking to the
//! broker or validating its configuration. Only configuration errors ever reach the caller
//! of the public API; everything on the tick and delivery paths is logged and swallowed.
//!
//! `HandlerError` is the failure outcome of a registered message handler.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error closing a channel
    #[error("failure to close the channel `{0}`")]
    CloseChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error starting consumption on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Rejected exchange or connection configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The consumer configuration was already set
    #[error("consumer already initialized")]
    AlreadyInitialized,

    /// The consumer was disposed
    #[error("consumer disposed")]
    Disposed,
}

/// Failure outcome returned by a message handler.
///
/// Any handler returning this error prevents the delivery from being acknowledged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler failure: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError(msg.into())
    }
}

impl From<AmqpError> for HandlerError {
    fn from(err: AmqpError) -> Self {
        HandlerError(err.to_string())
    }
}
