//! Typed in-process publish/subscribe.
//!
//! The bus is the sole synchronization point between pipeline components.
//! In [`DispatchMode::Direct`] a publish dispatches to every subscriber
//! before returning. In [`DispatchMode::Queued`] publishes append to a
//! FIFO queue drained by a single flusher; a re-entrant publish from
//! inside a handler is appended and drained by the same flusher, which
//! guarantees total order without recursion or deadlock.
//!
//! Handler failures are quarantined per delivery: the error is logged,
//! an `audit.event` tagged `events.handler.<event-name>` is synthesized
//! with the canonical hash of the offending payload, and delivery
//! continues with the remaining subscribers.

mod events;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::error;

use crate::domain::{hash_of, AuditEvent, AuditLevel};
use crate::error::Result;

pub use events::{Event, EventName, PositionClosed, RiskApproval, RiskRejection};

/// A subscriber callback. Handlers receive the event by value and report
/// failures through `Result`; the bus owns quarantine.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Token returned by [`EventBus::subscribe`]; pass to
/// [`EventBus::unsubscribe`] to detach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// How `publish` delivers events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Dispatch synchronously to all handlers in subscription order.
    Direct,
    /// Enqueue and drain FIFO with at most one flusher at a time.
    Queued,
}

/// The typed event bus.
pub struct EventBus {
    mode: DispatchMode,
    subscribers: RwLock<HashMap<EventName, Vec<(u64, EventHandler)>>>,
    queue: Mutex<VecDeque<Event>>,
    flushing: AtomicBool,
    next_subscription: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            subscribers: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            flushing: AtomicBool::new(false),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Attach a handler to an event name. Handlers run in subscription
    /// order within a delivery.
    pub fn subscribe(&self, name: EventName, handler: EventHandler) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(name)
            .or_default()
            .push((id, handler));
        SubscriptionId(id)
    }

    /// Detach a previously registered handler.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write();
        for handlers in subscribers.values_mut() {
            handlers.retain(|(handler_id, _)| *handler_id != id.0);
        }
    }

    /// Number of events waiting in the queued-mode FIFO.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Publish an event.
    ///
    /// Direct mode dispatches before returning. Queued mode enqueues and,
    /// unless a flusher is already draining, drains the queue to empty;
    /// re-entrant publishes land on the same queue and are drained by the
    /// running flusher.
    pub async fn publish(&self, event: Event) {
        match self.mode {
            DispatchMode::Direct => self.dispatch(event).await,
            DispatchMode::Queued => {
                self.queue.lock().push_back(event);
                loop {
                    if self
                        .flushing
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        // A flusher is active; it will drain what we enqueued.
                        return;
                    }
                    loop {
                        let next = self.queue.lock().pop_front();
                        match next {
                            Some(event) => self.dispatch(event).await,
                            None => break,
                        }
                    }
                    self.flushing.store(false, Ordering::Release);
                    // Re-check: a publish may have raced the release.
                    if self.queue.lock().is_empty() {
                        return;
                    }
                }
            }
        }
    }

    fn handlers_for(&self, name: EventName) -> Vec<(u64, EventHandler)> {
        self.subscribers
            .read()
            .get(&name)
            .cloned()
            .unwrap_or_default()
    }

    async fn dispatch(&self, event: Event) {
        let name = event.name();
        for (id, handler) in self.handlers_for(name) {
            if let Err(err) = handler(event.clone()).await {
                error!(
                    event = %name,
                    subscription = id,
                    error = %err,
                    "Event handler failed; quarantining this delivery"
                );
                if name != EventName::AuditEvent {
                    let audit = Self::handler_failure_audit(name, &event, &err);
                    match self.mode {
                        // Inside the flusher already: append keeps FIFO order.
                        DispatchMode::Queued => {
                            self.queue.lock().push_back(Event::AuditEvent(audit));
                        }
                        DispatchMode::Direct => self.deliver_audit(audit).await,
                    }
                }
            }
        }
    }

    /// Deliver a synthesized audit without further error synthesis, so a
    /// failing audit handler cannot start a feedback loop.
    async fn deliver_audit(&self, audit: AuditEvent) {
        let event = Event::AuditEvent(audit);
        for (id, handler) in self.handlers_for(EventName::AuditEvent) {
            if let Err(err) = handler(event.clone()).await {
                error!(
                    subscription = id,
                    error = %err,
                    "Audit handler failed while reporting a handler failure"
                );
            }
        }
    }

    fn handler_failure_audit(
        name: EventName,
        event: &Event,
        err: &crate::error::Error,
    ) -> AuditEvent {
        let payload_hash = hash_of(event).unwrap_or_default();
        AuditEvent::new(
            Utc::now().timestamp_millis(),
            format!("events.handler.{name}"),
            AuditLevel::Error,
            err.to_string(),
        )
        .with_inputs_hash(payload_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, Symbol, Timeframe};
    use crate::error::Error;
    use parking_lot::Mutex as PlMutex;

    fn candle(close_time: i64) -> Candle {
        Candle {
            symbol: Symbol::new("BTCUSDT"),
            timeframe: Timeframe::M1,
            close_time,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1.0,
        }
    }

    fn recording_handler(log: Arc<PlMutex<Vec<String>>>, tag: &'static str) -> EventHandler {
        Arc::new(move |event| {
            let log = log.clone();
            Box::pin(async move {
                let label = match &event {
                    Event::CandleClosed(c) => format!("{tag}:candle:{}", c.close_time),
                    Event::AuditEvent(a) => format!("{tag}:audit:{}", a.step),
                    other => format!("{tag}:{}", other.name()),
                };
                log.lock().push(label);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn direct_mode_dispatches_in_subscription_order() {
        let bus = EventBus::new(DispatchMode::Direct);
        let log = Arc::new(PlMutex::new(Vec::new()));
        bus.subscribe(EventName::CandleClosed, recording_handler(log.clone(), "a"));
        bus.subscribe(EventName::CandleClosed, recording_handler(log.clone(), "b"));

        bus.publish(Event::CandleClosed(candle(1))).await;

        assert_eq!(*log.lock(), vec!["a:candle:1", "b:candle:1"]);
    }

    #[tokio::test]
    async fn queued_mode_preserves_fifo_for_reentrant_publishes() {
        let bus = Arc::new(EventBus::new(DispatchMode::Queued));
        let log = Arc::new(PlMutex::new(Vec::new()));

        // First handler re-publishes a second candle from inside delivery.
        let reentrant = {
            let bus = bus.clone();
            let log = log.clone();
            let handler: EventHandler = Arc::new(move |event| {
                let bus = bus.clone();
                let log = log.clone();
                Box::pin(async move {
                    if let Event::CandleClosed(c) = &event {
                        log.lock().push(format!("seen:{}", c.close_time));
                        if c.close_time == 1 {
                            bus.publish(Event::CandleClosed(candle(2))).await;
                            // The nested publish must not have run handlers yet.
                            log.lock().push("after-nested-publish".to_string());
                        }
                    }
                    Ok(())
                })
            });
            handler
        };
        bus.subscribe(EventName::CandleClosed, reentrant);

        bus.publish(Event::CandleClosed(candle(1))).await;

        assert_eq!(
            *log.lock(),
            vec!["seen:1", "after-nested-publish", "seen:2"]
        );
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn handler_failure_does_not_abort_delivery() {
        let bus = EventBus::new(DispatchMode::Direct);
        let log = Arc::new(PlMutex::new(Vec::new()));

        let failing: EventHandler = Arc::new(|_| {
            Box::pin(async { Err(Error::Execution("boom".to_string())) })
        });
        bus.subscribe(EventName::CandleClosed, failing);
        bus.subscribe(EventName::CandleClosed, recording_handler(log.clone(), "b"));
        bus.subscribe(EventName::AuditEvent, recording_handler(log.clone(), "audit"));

        bus.publish(Event::CandleClosed(candle(7))).await;

        let entries = log.lock().clone();
        assert!(entries.contains(&"b:candle:7".to_string()));
        assert!(entries
            .iter()
            .any(|e| e == "audit:audit:events.handler.candle.closed"));
    }

    #[tokio::test]
    async fn queued_mode_synthesizes_audit_after_source_event() {
        let bus = EventBus::new(DispatchMode::Queued);
        let log = Arc::new(PlMutex::new(Vec::new()));

        let failing: EventHandler = Arc::new(|_| {
            Box::pin(async { Err(Error::Execution("boom".to_string())) })
        });
        bus.subscribe(EventName::CandleClosed, failing);
        bus.subscribe(EventName::AuditEvent, recording_handler(log.clone(), "audit"));

        bus.publish(Event::CandleClosed(candle(9))).await;

        assert_eq!(
            *log.lock(),
            vec!["audit:audit:events.handler.candle.closed"]
        );
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn failing_audit_handler_does_not_loop() {
        let bus = EventBus::new(DispatchMode::Direct);
        let failing_audit: EventHandler = Arc::new(|_| {
            Box::pin(async { Err(Error::Execution("audit down".to_string())) })
        });
        let failing: EventHandler = Arc::new(|_| {
            Box::pin(async { Err(Error::Execution("boom".to_string())) })
        });
        bus.subscribe(EventName::CandleClosed, failing);
        bus.subscribe(EventName::AuditEvent, failing_audit);

        // Must terminate: the audit failure is logged, not re-audited.
        bus.publish(Event::CandleClosed(candle(3))).await;
    }

    #[tokio::test]
    async fn unsubscribe_detaches_handler() {
        let bus = EventBus::new(DispatchMode::Direct);
        let log = Arc::new(PlMutex::new(Vec::new()));
        let id = bus.subscribe(EventName::CandleClosed, recording_handler(log.clone(), "a"));
        bus.unsubscribe(id);

        bus.publish(Event::CandleClosed(candle(1))).await;

        assert!(log.lock().is_empty());
    }
}
