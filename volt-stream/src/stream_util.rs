//! Stop-flag helpers shared by the connector and the listen-key refresher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Resolves once the stop flag is raised. The waiter is registered before
/// the flag is checked, so a notification between check and await cannot be
/// lost.
pub(crate) async fn wait_stop(stopped: &AtomicBool, notify: &Notify) {
    let notified = notify.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();
    if stopped.load(Ordering::SeqCst) {
        return;
    }
    notified.await;
}

/// Sleep that the stop flag can interrupt. Returns `true` when the full
/// duration elapsed.
pub(crate) async fn stoppable_sleep(
    duration: Duration,
    stopped: &AtomicBool,
    notify: &Notify,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = wait_stop(stopped, notify) => false,
    }
}
