// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Channel Manager
//!
//! Owns the single "current" channel of a consumer and rebuilds it whenever a health check
//! finds it missing or closed. A rebuild is one pass:
//! 1. Close whatever stale channel is still referenced
//! 2. Get a connection from the pool and open a channel on it
//! 3. Declare the exchange and the queue
//! 4. Start manual-ack consumption, routing deliveries to the dispatcher
//! 5. Publish the new channel as current
//!
//! Any failure abandons the pass; the channel stays absent until the next check. There is
//! no backoff and no attempt limit.
//!
//! Checks are serialized: a check that finds a rebuild already running is skipped. The
//! current channel sits behind a lock and is swapped as a whole, so readers only ever see
//! "absent" or a fully built channel.

use crate::{
    broker::{BrokerChannel, ConnectionPool},
    config::DEFAULT_CONNECTION_NAME,
    dispatcher::MessageDispatcher,
    errors::AmqpError,
    exchange::ExchangeConfig,
    queue::QueueConfig,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Topology and connection selection set once through `initialize`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub exchange: ExchangeConfig,
    pub queue: QueueConfig,
    pub connection_name: Option<String>,
}

impl ConsumerConfig {
    pub fn connection_name(&self) -> &str {
        self.connection_name
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION_NAME)
    }
}

/// Result of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The current channel is open; nothing was done
    Healthy,
    /// A new channel was built and is now current
    Rebuilt,
    /// The rebuild failed; the channel stays absent until the next check
    Failed,
    /// Another check is still rebuilding
    Skipped,
    /// No configuration yet, nothing to declare
    NotInitialized,
    /// The manager was disposed; no channel is built anymore
    Disposed,
}

pub struct ChannelManager {
    pool: Arc<dyn ConnectionPool>,
    dispatcher: Arc<MessageDispatcher>,
    current: RwLock<Option<Arc<dyn BrokerChannel>>>,
    rebuilding: Mutex<()>,
    disposed: AtomicBool,
}

impl ChannelManager {
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> ChannelManager {
        ChannelManager {
            pool,
            dispatcher,
            current: RwLock::new(None),
            rebuilding: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> Option<Arc<dyn BrokerChannel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a current channel exists and is open.
    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|channel| channel.is_open())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Verifies the current channel and rebuilds it when absent or closed.
    ///
    /// Never fails: every error is logged and reported through the outcome.
    pub async fn check(&self, config: Option<&ConsumerConfig>) -> CheckOutcome {
        if self.is_disposed() {
            return CheckOutcome::Disposed;
        }

        let Ok(_guard) = self.rebuilding.try_lock() else {
            debug!("channel rebuild in progress, skipping check");
            return CheckOutcome::Skipped;
        };

        if self.is_connected() {
            return CheckOutcome::Healthy;
        }

        let Some(config) = config else {
            debug!("consumer not initialized, nothing to declare");
            return CheckOutcome::NotInitialized;
        };

        self.dispose_stale().await;

        let channel = match self.build(config).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    queue = %config.queue.name,
                    "failure to create the channel, retrying on next check"
                );
                return CheckOutcome::Failed;
            }
        };

        let rejected = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if self.is_disposed() {
                Some(channel)
            } else {
                *current = Some(channel);
                None
            }
        };

        match rejected {
            Some(channel) => {
                debug!("consumer disposed while rebuilding, closing new channel");
                close_channel(channel).await;
                CheckOutcome::Disposed
            }
            None => {
                debug!(queue = %config.queue.name, "channel rebuilt, consuming");
                CheckOutcome::Rebuilt
            }
        }
    }

    async fn build(&self, config: &ConsumerConfig) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        let connection = self.pool.get(config.connection_name()).await?;
        let channel = connection.create_channel().await?;

        if let Err(err) = self.declare_and_consume(&channel, config).await {
            close_channel(channel).await;
            return Err(err);
        }

        Ok(channel)
    }

    async fn declare_and_consume(
        &self,
        channel: &Arc<dyn BrokerChannel>,
        config: &ConsumerConfig,
    ) -> Result<(), AmqpError> {
        channel.exchange_declare(&config.exchange).await?;
        channel.queue_declare(&config.queue).await?;

        let consumer_tag = format!("{}-{}", config.queue.name, Uuid::new_v4());
        channel
            .basic_consume(
                &config.queue.name,
                &consumer_tag,
                self.dispatcher.listener(channel.clone()),
            )
            .await
    }

    async fn dispose_stale(&self) {
        let stale = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(channel) = stale {
            close_channel(channel).await;
        }
    }

    /// Releases the current channel and stops any further rebuild. Idempotent.
    pub async fn dispose(&self) {
        if let Some(channel) = self.detach() {
            close_channel(channel).await;
        }
    }

    /// Marks the manager disposed and hands back the current channel, if any, for the
    /// caller to close.
    pub(crate) fn detach(&self) -> Option<Arc<dyn BrokerChannel>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        self.disposed.store(true, Ordering::SeqCst);
        current.take()
    }
}

/// Best-effort close: failures are logged and swallowed.
pub(crate) async fn close_channel(channel: Arc<dyn BrokerChannel>) {
    if let Err(err) = channel.close().await {
        warn!(error = err.to_string(), "failure to close the channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::{BrokerConnection, MockBrokerChannel, MockBrokerConnection},
        handler::CallbackRegistry,
    };
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Pool whose `get` blocks until released, to hold a rebuild in flight.
    struct GatedPool {
        entered: Notify,
        release: Notify,
        conn: Arc<dyn BrokerConnection>,
    }

    #[async_trait]
    impl ConnectionPool for GatedPool {
        async fn get(&self, _: &str) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.conn.clone())
        }
    }

    fn gated_pool(channel: MockBrokerChannel) -> Arc<GatedPool> {
        let channel: Arc<dyn BrokerChannel> = Arc::new(channel);
        let mut conn = MockBrokerConnection::new();
        conn.expect_create_channel()
            .times(1)
            .returning(move || Ok(channel.clone()));

        Arc::new(GatedPool {
            entered: Notify::new(),
            release: Notify::new(),
            conn: Arc::new(conn),
        })
    }

    fn consuming_channel() -> MockBrokerChannel {
        let mut channel = MockBrokerChannel::new();
        channel.expect_is_open().returning(|| true);
        channel.expect_exchange_declare().times(1).returning(|_| Ok(()));
        channel.expect_queue_declare().times(1).returning(|_| Ok(()));
        channel
            .expect_basic_consume()
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            exchange: ExchangeConfig::new("orders").topic(),
            queue: QueueConfig::new("orders.q").durable(),
            connection_name: None,
        }
    }

    fn manager(pool: Arc<dyn ConnectionPool>) -> Arc<ChannelManager> {
        let dispatcher = Arc::new(MessageDispatcher::new(Arc::new(CallbackRegistry::new())));
        Arc::new(ChannelManager::new(pool, dispatcher))
    }

    #[test]
    fn default_connection_name_when_none_selected() {
        let mut cfg = config();
        assert_eq!(cfg.connection_name(), DEFAULT_CONNECTION_NAME);

        cfg.connection_name = Some("audit".to_owned());
        assert_eq!(cfg.connection_name(), "audit");
    }

    #[tokio::test]
    async fn overlapping_check_is_skipped() {
        let pool = gated_pool(consuming_channel());
        let manager = manager(pool.clone());

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.check(Some(&config())).await })
        };
        pool.entered.notified().await;

        assert_eq!(manager.check(Some(&config())).await, CheckOutcome::Skipped);

        pool.release.notify_one();
        assert_eq!(first.await.unwrap(), CheckOutcome::Rebuilt);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn dispose_during_rebuild_closes_the_new_channel() {
        let mut channel = consuming_channel();
        channel.expect_close().times(1).returning(|| Ok(()));
        let pool = gated_pool(channel);
        let manager = manager(pool.clone());

        let rebuild = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.check(Some(&config())).await })
        };
        pool.entered.notified().await;

        manager.dispose().await;
        pool.release.notify_one();

        assert_eq!(rebuild.await.unwrap(), CheckOutcome::Disposed);
        assert!(manager.current().is_none());
        assert!(manager.is_disposed());
    }
}
