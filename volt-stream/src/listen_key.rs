//! Keeps one user's listen key alive for the duration of a run.
//!
//! The key itself never rotates here: keep-alive extends the same key, and
//! a refresh that cannot be completed is terminal for the user (equivalent
//! to the stream giving up), so the subscription never needs to move to a
//! new topic mid-run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use volt_core::UserCredentials;
use volt_exchange::ExchangeApi;

use crate::stream_util::stoppable_sleep;
use crate::StreamError;

/// Refresh cadence and failure thresholds.
#[derive(Clone, Debug)]
pub struct ListenKeyConfig {
    pub refresh_interval: Duration,
    pub retry_backoff: Duration,
    pub max_retry_attempts: u32,
}

impl Default for ListenKeyConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
            retry_backoff: Duration::from_secs(120),
            max_retry_attempts: 3,
        }
    }
}

/// Observable lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListenKeyState {
    Active,
    /// Refreshing failed past the retry threshold; the key will expire and
    /// the subscription with it.
    Failed,
}

/// Owns the listen key and its background refresh task.
pub struct ListenKeyLifecycle {
    api: Arc<dyn ExchangeApi>,
    creds: UserCredentials,
    key: String,
    state_rx: watch::Receiver<ListenKeyState>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ListenKeyLifecycle {
    /// Obtain an initial key and schedule periodic keep-alives.
    pub async fn start(
        api: Arc<dyn ExchangeApi>,
        creds: UserCredentials,
        config: ListenKeyConfig,
    ) -> Result<Self, StreamError> {
        let key = api
            .obtain_listen_key(&creds)
            .await
            .map_err(|err| StreamError::ListenKey(err.to_string()))?;
        let (state_tx, state_rx) = watch::channel(ListenKeyState::Active);
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());
        let handle = tokio::spawn(refresh_loop(
            api.clone(),
            creds.clone(),
            key.clone(),
            config,
            state_tx,
            stopped.clone(),
            stop_notify.clone(),
        ));
        Ok(Self {
            api,
            creds,
            key,
            state_rx,
            stopped,
            stop_notify,
            handle: Mutex::new(Some(handle)),
        })
    }

    #[must_use]
    pub fn current_key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn state(&self) -> ListenKeyState {
        *self.state_rx.borrow()
    }

    /// Resolves once the lifecycle reaches [`ListenKeyState::Failed`].
    pub async fn wait_failed(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow() == ListenKeyState::Failed {
                return;
            }
            if rx.changed().await.is_err() {
                // Refresh task is gone without flagging failure: a clean
                // stop. Never resolve.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Cancel the refresh schedule and release the key. Idempotent; the
    /// venue answering "not found" counts as released.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_waiters();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        if let Err(err) = self.api.close_listen_key(&self.creds, &self.key).await {
            debug!(error = %err, "listen key close was best-effort");
        }
    }
}

impl Drop for ListenKeyLifecycle {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }
}

async fn refresh_loop(
    api: Arc<dyn ExchangeApi>,
    creds: UserCredentials,
    key: String,
    config: ListenKeyConfig,
    state_tx: watch::Sender<ListenKeyState>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) {
    loop {
        if !stoppable_sleep(config.refresh_interval, &stopped, &stop_notify).await {
            return;
        }
        let mut attempt = 0;
        loop {
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            attempt += 1;
            match api.keep_alive_listen_key(&creds, &key).await {
                Ok(()) => {
                    debug!("listen key refreshed");
                    break;
                }
                Err(err) if err.is_auth_failure() => {
                    error!(error = %err, "listen key refresh hit revoked credentials");
                    let _ = state_tx.send(ListenKeyState::Failed);
                    return;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "listen key refresh failed");
                    if attempt >= config.max_retry_attempts {
                        let _ = state_tx.send(ListenKeyState::Failed);
                        return;
                    }
                    if !stoppable_sleep(config.retry_backoff, &stopped, &stop_notify).await {
                        return;
                    }
                }
            }
        }
    }
}
