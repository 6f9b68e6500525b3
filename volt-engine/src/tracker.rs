//! Bridges push-based order events to pull-based completion waits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use volt_core::{OrderId, OrderStatus, OrderUpdate};

use crate::stop::StopToken;

/// Result of waiting for one order to resolve.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// Terminal status was `FILLED`.
    Filled,
    /// Terminal status was anything else.
    NotFilled(OrderStatus),
    /// No terminal update arrived before the timeout. The safety net for
    /// events missed across stream reconnects.
    TimedOut,
    /// The stop signal fired first.
    Interrupted,
}

struct OrderSlot {
    latest: Option<OrderUpdate>,
    notify: Arc<Notify>,
}

impl OrderSlot {
    fn new() -> Self {
        Self {
            latest: None,
            notify: Arc::new(Notify::new()),
        }
    }

    fn terminal(&self) -> Option<&OrderUpdate> {
        self.latest
            .as_ref()
            .filter(|update| update.status.is_terminal())
    }
}

/// Maps exchange order ids to their latest observed status and lets callers
/// await terminal states.
///
/// Updates may arrive before the order is registered: a fast-filling
/// exchange can push `FILLED` while the placement response is still in
/// flight. `observe` therefore buffers the last update per id, and
/// `register`/`await_completion` consult that buffer first.
#[derive(Default)]
pub struct OrderTracker {
    slots: Mutex<HashMap<OrderId, OrderSlot>>,
}

impl OrderTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce interest in an order id. Idempotent; safe before or after
    /// the first update for the id has been observed.
    pub fn register(&self, order_id: &str) {
        let mut slots = self.slots.lock().expect("tracker lock");
        slots.entry(order_id.to_string()).or_insert_with(OrderSlot::new);
    }

    /// Record an update pushed by the event stream. Terminal states latch:
    /// once one is stored, later updates for the id are ignored.
    pub fn observe(&self, update: OrderUpdate) {
        let mut slots = self.slots.lock().expect("tracker lock");
        let slot = slots
            .entry(update.order_id.clone())
            .or_insert_with(OrderSlot::new);
        if slot.terminal().is_some() {
            trace!(order_id = %update.order_id, "ignoring update after terminal state");
            return;
        }
        let is_terminal = update.status.is_terminal();
        slot.latest = Some(update);
        if is_terminal {
            slot.notify.notify_waiters();
        }
    }

    /// Drop state for an order that is no longer awaited.
    pub fn forget(&self, order_id: &str) {
        let mut slots = self.slots.lock().expect("tracker lock");
        slots.remove(order_id);
    }

    /// Current status of an order, if any update has been observed.
    #[must_use]
    pub fn status(&self, order_id: &str) -> Option<OrderStatus> {
        let slots = self.slots.lock().expect("tracker lock");
        slots
            .get(order_id)
            .and_then(|slot| slot.latest.as_ref())
            .map(|update| update.status)
    }

    /// Wait until the order reaches a terminal state, the timeout elapses,
    /// or the stop token fires. Multiple concurrent waiters on the same id
    /// all observe the same outcome.
    pub async fn await_completion(
        &self,
        order_id: &str,
        timeout: Duration,
        stop: &StopToken,
    ) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let notify = {
                let mut slots = self.slots.lock().expect("tracker lock");
                let slot = slots
                    .entry(order_id.to_string())
                    .or_insert_with(OrderSlot::new);
                if let Some(update) = slot.terminal() {
                    return outcome_for(update.status);
                }
                slot.notify.clone()
            };
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Re-check: the terminal update may have landed between
            // releasing the lock and registering the waiter.
            if let Some(status) = self.terminal_status(order_id) {
                return outcome_for(status);
            }
            tokio::select! {
                _ = &mut notified => continue,
                _ = stop.cancelled() => return WaitOutcome::Interrupted,
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
            }
        }
    }

    fn terminal_status(&self, order_id: &str) -> Option<OrderStatus> {
        let slots = self.slots.lock().expect("tracker lock");
        slots
            .get(order_id)
            .and_then(OrderSlot::terminal)
            .map(|update| update.status)
    }
}

fn outcome_for(status: OrderStatus) -> WaitOutcome {
    if status == OrderStatus::Filled {
        WaitOutcome::Filled
    } else {
        WaitOutcome::NotFilled(status)
    }
}
