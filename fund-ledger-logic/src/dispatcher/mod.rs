mod middleware;

pub use middleware::{FnMiddleware, LoggingMiddleware};

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use alloy::primitives::B256;
use async_trait::async_trait;
use futures::{FutureExt, future};
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use crate::{
    events::{EventKind, ParsedEvent},
    metrics,
};

/// Consumer of decoded events of the kinds it is registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &ParsedEvent) -> anyhow::Result<()>;
}

/// Runs for every event before its handlers. Errors never block handlers.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, event: &ParsedEvent) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: String,
    pub kind: EventKind,
    pub tx_hash: B256,
    pub log_index: u64,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// At least one handler completed without error.
    pub handled: bool,
    pub handler_errors: Vec<HandlerFailure>,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub handled_count: usize,
    pub failures: Vec<HandlerFailure>,
}

impl BatchOutcome {
    pub(crate) fn record(&mut self, outcome: DispatchOutcome) {
        if outcome.handled {
            self.handled_count += 1;
        }
        self.failures.extend(outcome.handler_errors);
    }

    pub(crate) fn merge(&mut self, other: BatchOutcome) {
        self.handled_count += other.handled_count;
        self.failures.extend(other.failures);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub dispatched: u64,
    pub handled: u64,
    pub handler_errors: u64,
    pub middleware_errors: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    handled: AtomicU64,
    handler_errors: AtomicU64,
    middleware_errors: AtomicU64,
}

#[derive(Clone)]
struct Registration {
    priority: i32,
    seq: u64,
    handler: Arc<dyn EventHandler>,
}

/// Priority-ordered fan-out of events to handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    next_seq: AtomicU64,
    counters: Counters,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Higher priority runs first; equal priorities keep registration order.
    pub fn register_handler(&self, kind: EventKind, handler: Arc<dyn EventHandler>, priority: i32) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.write();
        let list = handlers.entry(kind).or_default();
        tracing::debug!(event = %kind, handler = handler.name(), priority, "registered event handler");
        list.push(Registration {
            priority,
            seq,
            handler,
        });
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Removes the handler registered under `name`; returns whether one was removed.
    pub fn unregister_handler(&self, kind: EventKind, name: &str) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|registration| registration.handler.name() != name);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().push(middleware);
    }

    pub fn handler_names(&self, kind: EventKind) -> Vec<String> {
        self.handlers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|r| r.handler.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            handled: self.counters.handled.load(Ordering::Relaxed),
            handler_errors: self.counters.handler_errors.load(Ordering::Relaxed),
            middleware_errors: self.counters.middleware_errors.load(Ordering::Relaxed),
        }
    }

    pub async fn dispatch(&self, event: &ParsedEvent) -> DispatchOutcome {
        let started = Instant::now();
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let middlewares = self.middlewares.read().clone();
        for middleware in middlewares {
            let result = AssertUnwindSafe(middleware.process(event))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("middleware panicked")));
            if let Err(err) = result {
                self.counters.middleware_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    middleware = middleware.name(),
                    event = %event.kind,
                    tx_hash = %event.tx_hash,
                    log_index = event.log_index,
                    err = ?err,
                    "middleware failed"
                );
            }
        }

        let registrations = self
            .handlers
            .read()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();
        if registrations.is_empty() {
            tracing::debug!(event = %event.kind, "no handlers registered for event");
        }

        let kind_label: &'static str = event.kind.into();
        let mut outcome = DispatchOutcome::default();
        for registration in registrations {
            let handler = registration.handler;
            let result = AssertUnwindSafe(handler.handle(event))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("handler panicked")));
            match result {
                Ok(()) => {
                    outcome.handled = true;
                    metrics::DISPATCH_HANDLER_TOTAL
                        .with_label_values(&[kind_label, "ok"])
                        .inc();
                }
                Err(error) => {
                    self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::DISPATCH_HANDLER_TOTAL
                        .with_label_values(&[kind_label, "error"])
                        .inc();
                    tracing::error!(
                        handler = handler.name(),
                        event = %event.kind,
                        tx_hash = %event.tx_hash,
                        log_index = event.log_index,
                        err = ?error,
                        "event handler failed"
                    );
                    outcome.handler_errors.push(HandlerFailure {
                        handler: handler.name().to_string(),
                        kind: event.kind,
                        tx_hash: event.tx_hash,
                        log_index: event.log_index,
                        error,
                    });
                }
            }
        }

        if outcome.handled {
            self.counters.handled.fetch_add(1, Ordering::Relaxed);
        }
        metrics::DISPATCH_DURATION_SECONDS
            .with_label_values(&[kind_label])
            .observe(started.elapsed().as_secs_f64());
        outcome
    }

    /// Dispatches events one after another in input order.
    pub async fn dispatch_batch(&self, events: &[ParsedEvent]) -> BatchOutcome {
        let mut batch = BatchOutcome::default();
        for event in events {
            batch.record(self.dispatch(event).await);
        }
        batch
    }

    /// Dispatches events with at most `max_concurrent` in flight. Events are
    /// not ordered relative to each other; the call returns once all finished.
    pub async fn dispatch_parallel(
        &self,
        events: &[ParsedEvent],
        max_concurrent: usize,
    ) -> BatchOutcome {
        let semaphore = Semaphore::new(max_concurrent.max(1));
        let outcomes = future::join_all(events.iter().map(|event| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.dispatch(event).await
            }
        }))
        .await;

        let mut batch = BatchOutcome::default();
        for outcome in outcomes {
            batch.record(outcome);
        }
        batch
    }
}
