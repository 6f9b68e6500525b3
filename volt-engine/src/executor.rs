//! Strategy-level fan-out: pre-filter, per-user supervision, teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use volt_core::{StrategyConfig, StrategyId, TerminalCause, UserCredentials, UserId, UserStatus};
use volt_exchange::ExchangeApi;
use volt_stream::{
    ConnectionEvent, ListenKeyConfig, ListenKeyLifecycle, OrderEventStream,
    OrderEventStreamConfig,
};

use crate::batch::{run_batch_loop, BatchEnd};
use crate::credentials::CredentialsStore;
use crate::status::StatusBoard;
use crate::stop::StopToken;
use crate::tracker::OrderTracker;
use crate::trade::TradeError;
use crate::EngineError;

/// Operator-facing hint attached to every authentication failure.
pub const AUTH_REFRESH_HINT: &str = "refresh the stored credentials";

/// Runtime knobs for the engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Order-event WebSocket endpoint.
    pub ws_url: String,
    /// How long `stop` waits for per-user loops before aborting them.
    pub teardown_grace: Duration,
    pub listen_key: ListenKeyConfig,
    pub stream_max_reconnect_attempts: u32,
    pub stream_ack_timeout: Duration,
}

impl EngineConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            teardown_grace: Duration::from_secs(10),
            listen_key: ListenKeyConfig::default(),
            stream_max_reconnect_attempts: 10,
            stream_ack_timeout: Duration::from_secs(10),
        }
    }
}

struct RunningStrategy {
    stop: StopToken,
    handle: JoinHandle<()>,
}

/// Owns every running strategy and the status board behind the read-only
/// queries. `start`, `stop` and `stop_all` are idempotent.
pub struct StrategyEngine {
    api: Arc<dyn ExchangeApi>,
    store: Arc<dyn CredentialsStore>,
    config: Arc<EngineConfig>,
    board: StatusBoard,
    running: Mutex<HashMap<StrategyId, RunningStrategy>>,
}

impl StrategyEngine {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        store: Arc<dyn CredentialsStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            api,
            store,
            config: Arc::new(config),
            board: StatusBoard::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to the shared status registry.
    #[must_use]
    pub fn status_board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Launch a strategy. A second call while it is still running is a
    /// no-op.
    pub async fn start(&self, cfg: StrategyConfig) -> Result<(), EngineError> {
        if !cfg.enabled {
            return Err(EngineError::Disabled(cfg.id));
        }
        if cfg.user_ids.is_empty() {
            return Err(EngineError::NoUsers(cfg.id));
        }
        let mut running = self.running.lock().await;
        if let Some(existing) = running.get(&cfg.id) {
            if !existing.handle.is_finished() {
                warn!(strategy_id = %cfg.id, "strategy already running; start ignored");
                return Ok(());
            }
        }
        let stop = StopToken::new();
        let handle = tokio::spawn(run_strategy(
            self.api.clone(),
            self.store.clone(),
            self.config.clone(),
            self.board.clone(),
            Arc::new(cfg.clone()),
            stop.clone(),
        ));
        running.insert(cfg.id, RunningStrategy { stop, handle });
        Ok(())
    }

    /// Signal a strategy to stop and wait out the teardown grace period.
    /// Unknown or already-stopped ids are a no-op.
    pub async fn stop(&self, strategy_id: &str) {
        let entry = self.running.lock().await.remove(strategy_id);
        let Some(RunningStrategy { stop, handle }) = entry else {
            return;
        };
        stop.set();
        let mut handle = handle;
        if timeout(self.config.teardown_grace, &mut handle).await.is_err() {
            warn!(strategy_id, "teardown grace expired; aborting strategy task");
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Stop every running strategy.
    pub async fn stop_all(&self) {
        let ids: Vec<StrategyId> = self.running.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    pub async fn is_running(&self, strategy_id: &str) -> bool {
        let running = self.running.lock().await;
        running
            .get(strategy_id)
            .is_some_and(|entry| !entry.handle.is_finished())
    }
}

async fn run_strategy(
    api: Arc<dyn ExchangeApi>,
    store: Arc<dyn CredentialsStore>,
    config: Arc<EngineConfig>,
    board: StatusBoard,
    cfg: Arc<StrategyConfig>,
    stop: StopToken,
) {
    info!(
        strategy_id = %cfg.id,
        name = %cfg.display_name,
        token = %cfg.target_token_symbol,
        target = %cfg.target_volume,
        users = cfg.user_ids.len(),
        "strategy starting"
    );

    let mut resolved = Vec::new();
    for user_id in &cfg.user_ids {
        board.set_status(&cfg.id, *user_id, UserStatus::NotStarted);
        match store.credentials(*user_id).await {
            Some(creds) => resolved.push((*user_id, creds)),
            None => {
                warn!(user_id, strategy_id = %cfg.id, "no stored credentials");
                let message = format!("user {user_id}: no stored credentials");
                board.finish(
                    &cfg.id,
                    *user_id,
                    &TerminalCause::Error(message.clone()),
                    Some(message),
                );
            }
        }
    }

    // Pre-filter: users the exchange already reports as satisfied consume
    // no further resources, not even a listen key.
    let checks = join_all(resolved.into_iter().map(|(user_id, creds)| {
        let api = api.clone();
        let symbol = cfg.target_token_symbol.clone();
        async move {
            let volume = api
                .fetch_user_volume(&creds)
                .await
                .map(|snapshot| snapshot.volume_for(&symbol));
            (user_id, creds, volume)
        }
    }))
    .await;

    let mut active = Vec::new();
    for (user_id, creds, volume) in checks {
        match volume {
            Ok(current) => {
                board.record_volume(&cfg.id, user_id, current);
                if current >= cfg.target_volume {
                    info!(
                        user_id,
                        strategy_id = %cfg.id,
                        %current,
                        "target already met; user filtered"
                    );
                    board.set_status(&cfg.id, user_id, UserStatus::FilteredSatisfied);
                } else {
                    active.push((user_id, creds));
                }
            }
            Err(err) if err.is_auth_failure() => {
                let message =
                    format!("user {user_id}: authentication failed ({err}); {AUTH_REFRESH_HINT}");
                error!(user_id, strategy_id = %cfg.id, "{message}");
                board.finish(&cfg.id, user_id, &TerminalCause::AuthFailed, Some(message));
            }
            Err(err) => {
                // Not provably satisfied; the batch loop re-queries anyway.
                warn!(user_id, error = %err, "pre-filter volume query failed; keeping user");
                active.push((user_id, creds));
            }
        }
    }

    let mut tasks = Vec::new();
    for (user_id, creds) in active {
        let handle = tokio::spawn(run_user(
            api.clone(),
            config.clone(),
            board.clone(),
            cfg.clone(),
            user_id,
            creds,
            stop.child(),
        ));
        tasks.push((user_id, handle));
    }

    for (user_id, handle) in tasks {
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => {
                let message = format!("user task panicked: {err}");
                error!(user_id, strategy_id = %cfg.id, "{message}");
                board.finish(
                    &cfg.id,
                    user_id,
                    &TerminalCause::Error(message.clone()),
                    Some(message),
                );
            }
            Err(_) => {}
        }
    }
    info!(strategy_id = %cfg.id, "strategy finished");
}

/// Everything one user needs, owned by one task: listen key, event stream,
/// tracker, batch loop. Failure here never leaves this function.
async fn run_user(
    api: Arc<dyn ExchangeApi>,
    config: Arc<EngineConfig>,
    board: StatusBoard,
    cfg: Arc<StrategyConfig>,
    user_id: UserId,
    creds: UserCredentials,
    stop: StopToken,
) {
    board.set_status(&cfg.id, user_id, UserStatus::Running);

    let lifecycle = match ListenKeyLifecycle::start(
        api.clone(),
        creds.clone(),
        config.listen_key.clone(),
    )
    .await
    {
        Ok(lifecycle) => lifecycle,
        Err(err) => {
            error!(user_id, strategy_id = %cfg.id, error = %err, "listen key unavailable");
            board.finish(
                &cfg.id,
                user_id,
                &TerminalCause::ListenKeyFailed,
                Some(err.to_string()),
            );
            return;
        }
    };

    let (update_tx, mut update_rx) = mpsc::channel(256);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let mut stream_config = OrderEventStreamConfig::new(
        config.ws_url.clone(),
        lifecycle.current_key(),
        user_id,
    );
    stream_config.max_reconnect_attempts = config.stream_max_reconnect_attempts;
    stream_config.ack_timeout = config.stream_ack_timeout;
    let stream = OrderEventStream::start(stream_config, update_tx, event_tx);

    let tracker = Arc::new(OrderTracker::new());
    let feeder = tokio::spawn({
        let tracker = tracker.clone();
        async move {
            while let Some(update) = update_rx.recv().await {
                tracker.observe(update);
            }
        }
    });

    let (cause, message) = tokio::select! {
        result = run_batch_loop(api.as_ref(), &tracker, &cfg, &creds, user_id, &stop, &board) => {
            match result {
                Ok(BatchEnd::TargetReached { final_volume }) => {
                    info!(user_id, strategy_id = %cfg.id, %final_volume, "user run complete");
                    (TerminalCause::Success, None)
                }
                Ok(BatchEnd::Stopped) => (TerminalCause::Canceled, None),
                Err(TradeError::Auth(err)) => {
                    let message = format!(
                        "user {user_id}: authentication failed ({err}); {AUTH_REFRESH_HINT}"
                    );
                    error!(user_id, strategy_id = %cfg.id, "{message}");
                    (TerminalCause::AuthFailed, Some(message))
                }
                Err(TradeError::Config(err)) => {
                    error!(user_id, strategy_id = %cfg.id, error = %err, "configuration error");
                    (TerminalCause::ConfigError, Some(err.to_string()))
                }
            }
        }
        reason = stream_gave_up(&mut event_rx, user_id) => {
            error!(user_id, strategy_id = %cfg.id, %reason, "order event stream failed");
            (TerminalCause::StreamFailed, Some(reason))
        }
        _ = lifecycle.wait_failed() => {
            error!(user_id, strategy_id = %cfg.id, "listen key lifecycle failed");
            (
                TerminalCause::ListenKeyFailed,
                Some("listen key refresh failed".to_string()),
            )
        }
    };

    // Unblock any wait still parked on this user before tearing down.
    stop.set();
    stream.stop().await;
    lifecycle.stop().await;
    feeder.abort();
    board.finish(&cfg.id, user_id, &cause, message);
}

/// Resolves with the reason once the stream gives up for good. Routine
/// transitions are logged and swallowed; a cleanly-stopped stream closes
/// the channel and this future never resolves.
async fn stream_gave_up(events: &mut mpsc::Receiver<ConnectionEvent>, user_id: UserId) -> String {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::GaveUp { reason } => return reason,
            ConnectionEvent::Disconnected { reason } => {
                warn!(user_id, %reason, "order stream disconnected");
            }
            ConnectionEvent::Reconnecting { attempt, backoff } => {
                info!(
                    user_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "order stream reconnecting"
                );
            }
            ConnectionEvent::Connected => {}
        }
    }
    std::future::pending::<String>().await
}
