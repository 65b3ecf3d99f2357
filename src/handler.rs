// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! Handlers are registered on the consumer and invoked for every delivery. The registry is
//! append-only: handlers are never removed, and registrations may happen at any time, even
//! while deliveries are being dispatched.

use crate::{
    broker::{BrokerChannel, Delivery},
    errors::HandlerError,
};
use async_trait::async_trait;
use std::{
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

/// Processes deliveries received by the consumer.
///
/// Returning an error keeps the delivery unacknowledged.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        channel: Arc<dyn BrokerChannel>,
        delivery: &Delivery,
    ) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a `MessageHandler`. See `handler_fn`.
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async closure as a handler.
///
/// # Example
/// ```
/// use rabbitmq_consumer::handler::handler_fn;
///
/// let handler = handler_fn(|_channel, delivery| async move {
///     println!("received {} bytes", delivery.body.len());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<HandlerFn<F>>
where
    F: Fn(Arc<dyn BrokerChannel>, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Arc<dyn BrokerChannel>, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        channel: Arc<dyn BrokerChannel>,
        delivery: &Delivery,
    ) -> Result<(), HandlerError> {
        (self.f)(channel, delivery.clone()).await
    }
}

/// Append-only, thread-safe collection of handlers.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl CallbackRegistry {
    pub fn new() -> CallbackRegistry {
        CallbackRegistry::default()
    }

    /// Appends a handler. No duplicate check is performed.
    pub fn register(&self, handler: Arc<dyn MessageHandler>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Returns the handlers registered so far, in registration order.
    ///
    /// The snapshot is detached from the registry: handlers registered afterwards are not
    /// part of it, and iterating it never blocks registrations.
    pub fn snapshot(&self) -> Vec<Arc<dyn MessageHandler>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
