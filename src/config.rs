// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Configuration
//!
//! Named broker connections used by the connection pool. Each logical connection name maps
//! to the coordinates of a RabbitMQ server; the name `Default` is used whenever the consumer
//! is not told which connection to use.

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the connection used when none is selected.
pub const DEFAULT_CONNECTION_NAME: &str = "Default";

/// Coordinates of a single RabbitMQ server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "%2f".to_owned(),
        }
    }
}

impl ConnectionConfig {
    /// Builds the AMQP URI for this connection.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

/// All named connections known to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RabbitMqOptions {
    pub connections: HashMap<String, ConnectionConfig>,
}

impl Default for RabbitMqOptions {
    fn default() -> Self {
        let mut connections = HashMap::default();
        connections.insert(
            DEFAULT_CONNECTION_NAME.to_owned(),
            ConnectionConfig::default(),
        );
        RabbitMqOptions { connections }
    }
}

impl RabbitMqOptions {
    /// Parses the options from a JSON document.
    ///
    /// # Example
    /// ```
    /// use rabbitmq_consumer::config::RabbitMqOptions;
    ///
    /// let opts = RabbitMqOptions::from_json(
    ///     r#"{"connections":{"Default":{"host":"rabbit","port":5672}}}"#,
    /// )
    /// .unwrap();
    /// assert_eq!(opts.get("Default").unwrap().host, "rabbit");
    /// ```
    pub fn from_json(raw: &str) -> Result<RabbitMqOptions, AmqpError> {
        serde_json::from_str(raw).map_err(|err| AmqpError::InvalidConfiguration(err.to_string()))
    }

    /// Adds or replaces a named connection.
    pub fn connection(mut self, name: &str, cfg: ConnectionConfig) -> Self {
        self.connections.insert(name.to_owned(), cfg);
        self
    }

    /// Looks up a connection by name.
    pub fn get(&self, name: &str) -> Result<&ConnectionConfig, AmqpError> {
        self.connections.get(name).ok_or_else(|| {
            AmqpError::InvalidConfiguration(format!("unknown connection `{}`", name))
        })
    }
}
