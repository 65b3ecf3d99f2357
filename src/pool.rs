// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Pool
//!
//! This module keeps one lapin connection per logical connection name and hands it out to
//! whoever needs to open channels. A cached connection that is no longer connected is
//! replaced on the next `get`, so callers never deal with connection recovery themselves.

use crate::{
    broker::{BrokerChannel, BrokerConnection, ConnectionPool},
    channel::AmqpChannel,
    config::RabbitMqOptions,
    errors::AmqpError,
};
use async_trait::async_trait;
use lapin::{types::LongString, Connection, ConnectionProperties};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Lapin-backed `ConnectionPool`.
pub struct AmqpConnectionPool {
    app_name: String,
    options: RabbitMqOptions,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl AmqpConnectionPool {
    /// Creates a new, empty pool.
    ///
    /// No connection is opened until the first `get`.
    ///
    /// # Parameters
    /// * `app_name` - Client-provided connection name shown in the broker management UI
    /// * `options` - The named connections the pool may open
    ///
    /// # Returns
    /// An Arc-wrapped pool ready to be shared with consumers
    pub fn new(app_name: &str, options: RabbitMqOptions) -> Arc<AmqpConnectionPool> {
        Arc::new(AmqpConnectionPool {
            app_name: app_name.to_owned(),
            options,
            connections: Mutex::new(HashMap::default()),
        })
    }

    async fn connect(&self, connection_name: &str) -> Result<Connection, AmqpError> {
        let cfg = self.options.get(connection_name)?;

        debug!(connection = connection_name, "creating amqp connection...");
        let options = ConnectionProperties::default().with_connection_name(LongString::from(
            format!("{}:{}", self.app_name, connection_name),
        ));

        match Connection::connect(&cfg.uri(), options).await {
            Ok(conn) => {
                debug!(connection = connection_name, "amqp connected");
                Ok(conn)
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(connection_name.to_owned()))
            }
        }
    }

    /// Closes every cached connection and empties the pool.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;

        for (name, conn) in connections.drain() {
            if !conn.status().connected() {
                continue;
            }

            if let Err(err) = conn.close(200, "OK").await {
                warn!(
                    error = err.to_string(),
                    connection = %name,
                    "failure to close connection"
                );
            }
        }
    }
}

#[async_trait]
impl ConnectionPool for AmqpConnectionPool {
    async fn get(&self, connection_name: &str) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        let mut connections = self.connections.lock().await;

        if let Some(conn) = connections.get(connection_name) {
            if conn.status().connected() {
                return Ok(Arc::new(AmqpConnection { conn: conn.clone() }));
            }

            warn!(
                connection = connection_name,
                "cached connection is not connected, reconnecting"
            );
            connections.remove(connection_name);
        }

        let conn = Arc::new(self.connect(connection_name).await?);
        connections.insert(connection_name.to_owned(), conn.clone());

        Ok(Arc::new(AmqpConnection { conn }))
    }
}

/// A pooled connection handed out by `AmqpConnectionPool`.
struct AmqpConnection {
    conn: Arc<Connection>,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(AmqpChannel::new(c)))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_connection_name_fails_without_connecting() {
        let pool = AmqpConnectionPool::new("test", RabbitMqOptions::default());

        let result = pool.get("billing").await;

        assert!(matches!(
            result,
            Err(AmqpError::InvalidConfiguration(msg)) if msg == "unknown connection `billing`"
        ));
        assert!(pool.connections.lock().await.is_empty());
    }

    #[tokio::test]
    async fn close_all_on_an_empty_pool_is_a_no_op() {
        let pool = AmqpConnectionPool::new("test", RabbitMqOptions::default());

        pool.close_all().await;
        pool.close_all().await;

        assert!(pool.connections.lock().await.is_empty());
        assert!(matches!(
            pool.get("billing").await,
            Err(AmqpError::InvalidConfiguration(_))
        ));
    }
}
