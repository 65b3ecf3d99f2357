// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! `RabbitMqMessageConsumer` keeps a subscription to one queue alive across connection
//! failures and lets any number of handlers process its deliveries.
//!
//! The consumer hooks itself onto a `HealthTicker` when built. Every tick checks the
//! channel and rebuilds it when needed, so the consumer starts consuming on the first tick
//! after `initialize` and resumes on its own after a broker outage. Deliveries are only
//! acknowledged once every registered handler accepted them.
//!
//! ```no_run
//! use rabbitmq_consumer::{
//!     config::RabbitMqOptions, consumer::RabbitMqMessageConsumer, exchange::ExchangeConfig,
//!     handler::handler_fn, pool::AmqpConnectionPool, queue::QueueConfig, ticker::HealthTicker,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), rabbitmq_consumer::errors::AmqpError> {
//! let pool = AmqpConnectionPool::new("orders-service", RabbitMqOptions::default());
//! let ticker = Arc::new(HealthTicker::default());
//!
//! let consumer = RabbitMqMessageConsumer::new(pool, &ticker);
//! consumer.initialize(
//!     ExchangeConfig::new("orders").topic(),
//!     QueueConfig::new("orders.q").durable(),
//!     None,
//! )?;
//! consumer.on_message_received(handler_fn(|_channel, delivery| async move {
//!     println!("{}", String::from_utf8_lossy(&delivery.body));
//!     Ok(())
//! }));
//!
//! ticker.start();
//! # Ok(())
//! # }
//! ```

use crate::{
    broker::ConnectionPool,
    dispatcher::MessageDispatcher,
    errors::AmqpError,
    exchange::ExchangeConfig,
    handler::{CallbackRegistry, MessageHandler},
    manager::{self, ChannelManager, CheckOutcome, ConsumerConfig},
    queue::QueueConfig,
    ticker::{HealthTicker, TickHandler, DEFAULT_PERIOD},
};
use async_trait::async_trait;
use std::{
    sync::{Arc, OnceLock, Weak},
    time::Duration,
};
use tracing::{debug, warn};

/// Lifecycle of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Uninitialized,
    InitializedNoChannel,
    InitializedConnected,
    Disposed,
}

struct ConsumerInner {
    config: OnceLock<ConsumerConfig>,
    callbacks: Arc<CallbackRegistry>,
    manager: ChannelManager,
}

#[async_trait]
impl TickHandler for ConsumerInner {
    async fn on_tick(&self) {
        self.manager.check(self.config.get()).await;
    }
}

pub struct RabbitMqMessageConsumer {
    inner: Arc<ConsumerInner>,
}

impl RabbitMqMessageConsumer {
    /// Creates a consumer hooked onto `ticker`, setting the ticker period to 5 seconds.
    ///
    /// The ticker keeps running on its owner's terms; the consumer never starts or stops it.
    /// Building it resets the period of a ticker shared with other consumers (see
    /// `with_period`).
    ///
    /// # Parameters
    /// * `pool` - Source of broker connections
    /// * `ticker` - Periodic trigger driving the channel health checks
    pub fn new(pool: Arc<dyn ConnectionPool>, ticker: &HealthTicker) -> RabbitMqMessageConsumer {
        RabbitMqMessageConsumer::with_period(pool, ticker, DEFAULT_PERIOD)
    }

    /// Same as `new`, with a custom health check period.
    ///
    /// The period is a setting of the ticker, not of the consumer: when several consumers
    /// share one ticker, the period passed by the last one built applies to all of them.
    pub fn with_period(
        pool: Arc<dyn ConnectionPool>,
        ticker: &HealthTicker,
        period: Duration,
    ) -> RabbitMqMessageConsumer {
        let callbacks = Arc::new(CallbackRegistry::new());
        let dispatcher = Arc::new(MessageDispatcher::new(callbacks.clone()));

        let inner = Arc::new(ConsumerInner {
            config: OnceLock::new(),
            callbacks,
            manager: ChannelManager::new(pool, dispatcher),
        });

        ticker.set_period(period);
        ticker.subscribe(Arc::downgrade(&inner) as Weak<dyn TickHandler>);

        RabbitMqMessageConsumer { inner }
    }

    /// Sets the exchange and queue to consume from. Must be called exactly once.
    ///
    /// # Parameters
    /// * `exchange` - Exchange declared before consuming
    /// * `queue` - Queue declared and consumed
    /// * `connection_name` - Pooled connection to use; the default connection when `None`
    ///
    /// An empty queue name declares a server-named queue.
    ///
    /// # Returns
    /// `InvalidConfiguration` for an unnamed exchange, `AlreadyInitialized` on a second
    /// call, `Disposed` after `dispose`
    pub fn initialize(
        &self,
        exchange: ExchangeConfig,
        queue: QueueConfig,
        connection_name: Option<&str>,
    ) -> Result<(), AmqpError> {
        if self.inner.manager.is_disposed() {
            return Err(AmqpError::Disposed);
        }

        exchange.validate()?;

        self.inner
            .config
            .set(ConsumerConfig {
                exchange,
                queue,
                connection_name: connection_name.map(str::to_owned),
            })
            .map_err(|_| AmqpError::AlreadyInitialized)?;

        debug!("consumer initialized");
        Ok(())
    }

    /// Registers a handler. Takes effect for deliveries dispatched from now on.
    pub fn on_message_received(&self, handler: Arc<dyn MessageHandler>) {
        self.inner.callbacks.register(handler);
    }

    /// Runs one health check immediately, outside of the ticker schedule.
    pub async fn check_channel(&self) -> CheckOutcome {
        self.inner.manager.check(self.inner.config.get()).await
    }

    pub fn state(&self) -> ConsumerState {
        if self.inner.manager.is_disposed() {
            return ConsumerState::Disposed;
        }

        match self.inner.config.get() {
            None => ConsumerState::Uninitialized,
            Some(_) if self.inner.manager.is_connected() => ConsumerState::InitializedConnected,
            Some(_) => ConsumerState::InitializedNoChannel,
        }
    }

    pub fn config(&self) -> Option<&ConsumerConfig> {
        self.inner.config.get()
    }

    /// Releases the current channel. Idempotent and never fails; close errors are logged.
    pub async fn dispose(&self) {
        self.inner.manager.dispose().await;
    }
}

impl Drop for RabbitMqMessageConsumer {
    /// Disposes a consumer dropped without `dispose`, closing its channel on the current
    /// runtime.
    fn drop(&mut self) {
        let Some(channel) = self.inner.manager.detach() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(manager::close_channel(channel));
            }
            Err(_) => {
                warn!("consumer dropped outside of a runtime, channel left open");
            }
        }
    }
}
