// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Configuration
//!
//! This module defines the exchange the consumer declares on every channel (re)build.
//! Exchanges are the routing mechanism in RabbitMQ that determine how messages are
//! distributed to queues.

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Exchange declared by the consumer before it starts consuming.
///
/// Immutable once handed to the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub(crate) name: String,
    #[serde(rename = "type", default)]
    pub(crate) kind: ExchangeKind,
}

impl ExchangeConfig {
    /// Creates a new exchange configuration with the given name.
    ///
    /// By default, the exchange is declared as a Direct exchange.
    pub fn new(name: &str) -> ExchangeConfig {
        ExchangeConfig {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(self) -> Self {
        self.kind(ExchangeKind::Direct)
    }

    pub fn fanout(self) -> Self {
        self.kind(ExchangeKind::Fanout)
    }

    pub fn topic(self) -> Self {
        self.kind(ExchangeKind::Topic)
    }

    pub fn headers(self) -> Self {
        self.kind(ExchangeKind::Headers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.kind
    }

    /// The default (nameless) exchange cannot be redeclared, so a name is mandatory.
    pub(crate) fn validate(&self) -> Result<(), AmqpError> {
        if self.name.trim().is_empty() {
            return Err(AmqpError::InvalidConfiguration(
                "exchange name must not be empty".to_owned(),
            ));
        }

        Ok(())
    }
}
