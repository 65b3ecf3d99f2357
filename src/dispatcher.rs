// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! This module runs every registered handler for each delivery and decides whether the
//! delivery gets acknowledged:
//! 1. Handlers registered at dispatch time run sequentially, in registration order
//! 2. The first failing (or panicking) handler stops the run and the delivery stays unacked
//! 3. When all handlers succeed, exactly this delivery is acked (non-multiple)
//!
//! No negative acknowledgment is ever sent. An unacked delivery is redelivered by the broker
//! once the channel it was received on goes away.
//!
//! Every delivery is traced with an OpenTelemetry consumer span.

use crate::{
    broker::{BrokerChannel, Delivery, DeliveryListener},
    handler::CallbackRegistry,
    otel,
};
use futures_util::FutureExt;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{borrow::Cow, panic::AssertUnwindSafe, sync::Arc};
use tracing::{debug, error};

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every handler succeeded and the delivery was acknowledged
    Acked,
    /// A handler failed or panicked; the delivery was left unacknowledged
    HandlerFailed,
    /// Every handler succeeded but the acknowledgment was rejected
    AckFailed,
}

/// Fans deliveries out to the handlers of a `CallbackRegistry`.
pub struct MessageDispatcher {
    callbacks: Arc<CallbackRegistry>,
}

impl MessageDispatcher {
    pub fn new(callbacks: Arc<CallbackRegistry>) -> MessageDispatcher {
        MessageDispatcher { callbacks }
    }

    /// Processes one delivery received on `channel`.
    ///
    /// Never panics and never returns an error: failures are logged and reported through
    /// the returned outcome.
    pub async fn dispatch(
        &self,
        channel: Arc<dyn BrokerChannel>,
        delivery: Delivery,
    ) -> DispatchOutcome {
        let tracer = global::tracer("amqp consumer");
        let span_name = if delivery.routing_key.is_empty() {
            delivery.exchange.as_str()
        } else {
            delivery.routing_key.as_str()
        };
        let (_ctx, mut span) = otel::new_span(&delivery.properties, &tracer, span_name);

        debug!(
            delivery_tag = delivery.delivery_tag,
            exchange = %delivery.exchange,
            routing_key = %delivery.routing_key,
            "received message"
        );

        for handler in self.callbacks.snapshot() {
            let result = AssertUnwindSafe(handler.handle(channel.clone(), &delivery))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(
                        error = err.to_string(),
                        delivery_tag = delivery.delivery_tag,
                        "error whiling handling msg"
                    );
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("handler failure"),
                    });
                    return DispatchOutcome::HandlerFailed;
                }
                Err(_) => {
                    error!(
                        delivery_tag = delivery.delivery_tag,
                        "handler panicked whiling handling msg"
                    );
                    span.set_status(Status::Error {
                        description: Cow::from("handler panicked"),
                    });
                    return DispatchOutcome::HandlerFailed;
                }
            }
        }

        match channel.basic_ack(delivery.delivery_tag).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    delivery_tag = delivery.delivery_tag,
                    "error whiling ack msg"
                );
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                DispatchOutcome::AckFailed
            }
            Ok(()) => {
                debug!("message successfully processed");
                span.set_status(Status::Ok);
                DispatchOutcome::Acked
            }
        }
    }

    /// Builds the listener bound to `channel` when consumption starts.
    ///
    /// Each delivery is dispatched on its own task, so a slow or failing delivery never holds
    /// up the others. The listener only holds the dispatcher weakly: once its owner is gone,
    /// deliveries are left unacked for the broker to redeliver.
    pub(crate) fn listener(self: &Arc<Self>, channel: Arc<dyn BrokerChannel>) -> DeliveryListener {
        let dispatcher = Arc::downgrade(self);

        Arc::new(move |delivery: Delivery| {
            let Some(dispatcher) = dispatcher.upgrade() else {
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    "consumer dropped, leaving message unacked"
                );
                return;
            };
            let channel = channel.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(channel, delivery).await;
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::MockBrokerChannel,
        errors::{AmqpError, HandlerError},
        handler::{handler_fn, MessageHandler},
        testing::CapturedLogs,
    };
    use mockall::predicate::eq;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tracing::Level;

    fn ok_handler(calls: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        handler_fn(move |_, _| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn failing_handler(calls: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        handler_fn(move |_, _| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::new("boom"))
            }
        })
    }

    fn dispatcher_with(handlers: Vec<Arc<dyn MessageHandler>>) -> Arc<MessageDispatcher> {
        let registry = Arc::new(CallbackRegistry::new());
        for handler in handlers {
            registry.register(handler);
        }
        Arc::new(MessageDispatcher::new(registry))
    }

    #[tokio::test]
    async fn acks_once_after_all_handlers_succeed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher =
            dispatcher_with(vec![ok_handler(calls.clone()), ok_handler(calls.clone())]);

        let mut channel = MockBrokerChannel::new();
        let seen_before_ack = calls.clone();
        channel
            .expect_basic_ack()
            .with(eq(7))
            .times(1)
            .returning(move |_| {
                assert_eq!(seen_before_ack.load(Ordering::SeqCst), 2);
                Ok(())
            });

        let outcome = dispatcher
            .dispatch(Arc::new(channel), Delivery::new(7, b"{}"))
            .await;

        assert_eq!(outcome, DispatchOutcome::Acked);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn acks_when_no_handler_is_registered() {
        let dispatcher = dispatcher_with(vec![]);

        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().with(eq(1)).times(1).returning(|_| Ok(()));

        let outcome = dispatcher
            .dispatch(Arc::new(channel), Delivery::new(1, b""))
            .await;

        assert_eq!(outcome, DispatchOutcome::Acked);
    }

    #[tokio::test]
    async fn failing_handler_stops_the_run_and_skips_ack() {
        let (logs, _guard) = CapturedLogs::install();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(vec![
            ok_handler(first.clone()),
            failing_handler(second.clone()),
            ok_handler(third.clone()),
        ]);

        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().times(0);

        let outcome = dispatcher
            .dispatch(Arc::new(channel), Delivery::new(3, b"{}"))
            .await;

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
        assert_eq!(logs.at(Level::ERROR), vec!["error whiling handling msg"]);
        assert!(logs.at(Level::WARN).is_empty());
    }

    #[tokio::test]
    async fn failure_does_not_affect_next_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fail_first = {
            let calls = calls.clone();
            handler_fn(move |_, delivery: Delivery| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if delivery.delivery_tag == 1 {
                        return Err(HandlerError::new("bad payload"));
                    }
                    Ok(())
                }
            })
        };
        let dispatcher =
            dispatcher_with(vec![ok_handler(Arc::new(AtomicUsize::new(0))), fail_first]);

        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().with(eq(1)).times(0);
        channel.expect_basic_ack().with(eq(2)).times(1).returning(|_| Ok(()));
        let channel: Arc<dyn BrokerChannel> = Arc::new(channel);

        let first = dispatcher.dispatch(channel.clone(), Delivery::new(1, b"x")).await;
        let second = dispatcher.dispatch(channel, Delivery::new(2, b"y")).await;

        assert_eq!(first, DispatchOutcome::HandlerFailed);
        assert_eq!(second, DispatchOutcome::Acked);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let (logs, _guard) = CapturedLogs::install();
        let panicking: Arc<dyn MessageHandler> = handler_fn(|_, _| async move {
            if true {
                panic!("handler bug");
            }
            Ok(())
        });
        let dispatcher = dispatcher_with(vec![panicking]);

        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().times(0);

        let outcome = dispatcher
            .dispatch(Arc::new(channel), Delivery::new(9, b"x"))
            .await;

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
        assert_eq!(
            logs.at(Level::ERROR),
            vec!["handler panicked whiling handling msg"]
        );
    }

    #[tokio::test]
    async fn ack_failure_is_reported() {
        let (logs, _guard) = CapturedLogs::install();
        let dispatcher = dispatcher_with(vec![ok_handler(Arc::new(AtomicUsize::new(0)))]);

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_basic_ack()
            .times(1)
            .returning(|_| Err(AmqpError::AckMessageError));

        let outcome = dispatcher
            .dispatch(Arc::new(channel), Delivery::new(4, b"x"))
            .await;

        assert_eq!(outcome, DispatchOutcome::AckFailed);
        assert_eq!(logs.at(Level::ERROR), vec!["error whiling ack msg"]);
    }

    #[tokio::test]
    async fn handler_registered_later_sees_later_deliveries() {
        let registry = Arc::new(CallbackRegistry::new());
        let dispatcher = Arc::new(MessageDispatcher::new(registry.clone()));

        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().times(2).returning(|_| Ok(()));
        let channel: Arc<dyn BrokerChannel> = Arc::new(channel);

        dispatcher.dispatch(channel.clone(), Delivery::new(1, b"x")).await;

        let late = Arc::new(AtomicUsize::new(0));
        registry.register(ok_handler(late.clone()));

        dispatcher.dispatch(channel, Delivery::new(2, b"y")).await;

        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listener_dispatches_each_delivery_on_its_own_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(vec![ok_handler(calls.clone())]);

        let acks = Arc::new(AtomicUsize::new(0));
        let mut channel = MockBrokerChannel::new();
        {
            let acks = acks.clone();
            channel.expect_basic_ack().times(3).returning(move |_| {
                acks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let listener = dispatcher.listener(Arc::new(channel));
        for tag in 1..=3 {
            listener(Delivery::new(tag, b"x"));
        }

        for _ in 0..100 {
            if acks.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(acks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn listener_outliving_its_dispatcher_leaves_deliveries_unacked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(vec![ok_handler(calls.clone())]);

        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().times(0);

        let listener = dispatcher.listener(Arc::new(channel));
        drop(dispatcher);

        listener(Delivery::new(1, b"x"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
