// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Health Ticker
//!
//! A fixed-period background trigger. Consumers hook themselves onto a ticker at
//! construction; whoever owns the ticker decides when it starts and stops.
//!
//! Hooks are awaited one after another on the ticker task and the next period only starts
//! once they all returned, so a slow broker round-trip delays the following tick instead of
//! overlapping with it.

use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, PoisonError, RwLock, Weak},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

/// Period used when none is configured.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(5000);

/// Invoked on every tick.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self);
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct HealthTicker {
    period: RwLock<Duration>,
    handlers: RwLock<Vec<Weak<dyn TickHandler>>>,
    running: Mutex<Option<Running>>,
}

impl Default for HealthTicker {
    fn default() -> Self {
        HealthTicker::new(DEFAULT_PERIOD)
    }
}

impl HealthTicker {
    pub fn new(period: Duration) -> HealthTicker {
        HealthTicker {
            period: RwLock::new(period),
            handlers: RwLock::new(vec![]),
            running: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        *self.period.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the period. The wait already in progress keeps the previous period.
    pub fn set_period(&self, period: Duration) {
        *self.period.write().unwrap_or_else(PoisonError::into_inner) = period;
    }

    /// Hooks a handler onto the ticker.
    ///
    /// Only a weak reference is kept: dropping the handler unhooks it.
    pub fn subscribe(&self, handler: Weak<dyn TickHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Starts firing on a background task. Must be called within a tokio runtime.
    ///
    /// Does nothing if the ticker is already running.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let ticker = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                let Some(period) = ticker.upgrade().map(|t| t.period()) else {
                    break;
                };

                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown_rx.changed() => break,
                }

                let Some(ticker) = ticker.upgrade() else {
                    break;
                };
                ticker.fire().await;
            }
            debug!("health ticker stopped");
        });

        *running = Some(Running { shutdown, handle });
    }

    /// Stops firing. A tick already in progress is allowed to finish.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            drop(running.handle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Runs every live handler once, pruning the ones that were dropped.
    pub async fn fire(&self) {
        let handlers: Vec<Arc<dyn TickHandler>> = {
            let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
            handlers.retain(|h| h.strong_count() > 0);
            handlers.iter().filter_map(Weak::upgrade).collect()
        };

        for handler in handlers {
            handler.on_tick().await;
        }
    }
}

impl Drop for HealthTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
