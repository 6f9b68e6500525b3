//! WebSocket connector delivering one user's `executionReport` events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use volt_core::{OrderStatus, OrderUpdate, Side, UserId};

use crate::stream_util::{stoppable_sleep, wait_stop};
use crate::StreamError;

type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const SUBSCRIBE_ID: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 60;

/// Connection parameters for one user's order-event subscription.
#[derive(Clone, Debug)]
pub struct OrderEventStreamConfig {
    pub ws_url: String,
    pub listen_key: String,
    pub user_id: UserId,
    pub max_reconnect_attempts: u32,
    pub ack_timeout: Duration,
}

impl OrderEventStreamConfig {
    pub fn new(ws_url: impl Into<String>, listen_key: impl Into<String>, user_id: UserId) -> Self {
        Self {
            ws_url: ws_url.into(),
            listen_key: listen_key.into(),
            user_id,
            max_reconnect_attempts: 10,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection-state transitions surfaced alongside order updates.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, backoff: Duration },
    /// Reconnection attempts are exhausted; the stream is dead. Fatal for
    /// the owning user.
    GaveUp { reason: String },
}

/// Handle over the background connector task.
///
/// Exactly one of these exists per user per run; dropping it closes the
/// socket.
pub struct OrderEventStream {
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OrderEventStream {
    /// Spawn the connector. Decoded order updates flow into `updates`,
    /// connection-state transitions into `events`.
    pub fn start(
        config: OrderEventStreamConfig,
        updates: mpsc::Sender<OrderUpdate>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());
        let handle = tokio::spawn(run(
            config,
            updates,
            events,
            stopped.clone(),
            stop_notify.clone(),
        ));
        Self {
            stopped,
            stop_notify,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Close the socket and wait for in-flight sink writes to drain.
    /// Idempotent.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for OrderEventStream {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }
}

enum SessionEnd {
    Stopped,
    Remote(String),
}

async fn run(
    config: OrderEventStreamConfig,
    updates: mpsc::Sender<OrderUpdate>,
    events: mpsc::Sender<ConnectionEvent>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) {
    let mut attempt: u32 = 0;
    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        let outcome =
            run_session(&config, &updates, &events, &stopped, &stop_notify, &mut attempt).await;
        let reason = match outcome {
            Ok(SessionEnd::Stopped) => return,
            Ok(SessionEnd::Remote(reason)) => {
                let _ = events
                    .send(ConnectionEvent::Disconnected {
                        reason: reason.clone(),
                    })
                    .await;
                reason
            }
            Err(err) => err.to_string(),
        };
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            warn!(
                user_id = config.user_id,
                %reason,
                "order event stream exhausted reconnect attempts"
            );
            let _ = events.send(ConnectionEvent::GaveUp { reason }).await;
            return;
        }
        let backoff = backoff_delay(attempt);
        debug!(
            user_id = config.user_id,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            %reason,
            "order event stream reconnecting"
        );
        let _ = events
            .send(ConnectionEvent::Reconnecting { attempt, backoff })
            .await;
        if !stoppable_sleep(backoff, &stopped, &stop_notify).await {
            return;
        }
    }
}

async fn run_session(
    config: &OrderEventStreamConfig,
    updates: &mpsc::Sender<OrderUpdate>,
    events: &mpsc::Sender<ConnectionEvent>,
    stopped: &AtomicBool,
    stop_notify: &Notify,
    attempt: &mut u32,
) -> Result<SessionEnd, StreamError> {
    let (ws, _) = connect_async(&config.ws_url)
        .await
        .map_err(|err| StreamError::Transport(err.to_string()))?;
    let (mut sink, mut source) = ws.split();
    sink.send(Message::Text(subscribe_frame(
        &config.listen_key,
        SUBSCRIBE_ID,
    )))
    .await
    .map_err(|err| StreamError::Transport(err.to_string()))?;
    await_ack(&mut source, config.ack_timeout).await?;
    *attempt = 0;
    let _ = events.send(ConnectionEvent::Connected).await;
    info!(user_id = config.user_id, "order event stream connected");

    loop {
        tokio::select! {
            _ = wait_stop(stopped, stop_notify) => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(SessionEnd::Stopped);
            }
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(update) = parse_order_update(&text) {
                        if updates.send(update).await.is_err() {
                            // Consumer is gone; nothing left to deliver to.
                            return Ok(SessionEnd::Stopped);
                        }
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Ok(text) = String::from_utf8(bytes) {
                        if let Some(update) = parse_order_update(&text) {
                            if updates.send(update).await.is_err() {
                                return Ok(SessionEnd::Stopped);
                            }
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(err) = sink.send(Message::Pong(payload)).await {
                        return Ok(SessionEnd::Remote(err.to_string()));
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return Ok(SessionEnd::Remote("closed by server".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Ok(SessionEnd::Remote(err.to_string())),
                None => return Ok(SessionEnd::Remote("stream ended".into())),
            }
        }
    }
}

async fn await_ack(source: &mut WsSource, ack_timeout: Duration) -> Result<(), StreamError> {
    let wait = async {
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(_) => continue,
                Err(err) => return Err(StreamError::Transport(err.to_string())),
            };
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                if is_subscription_ack(&value, SUBSCRIBE_ID) {
                    return Ok(());
                }
            }
        }
        Err(StreamError::Subscription(
            "socket closed before acknowledgement".into(),
        ))
    };
    match tokio::time::timeout(ack_timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(StreamError::Subscription(
            "acknowledgement timed out".into(),
        )),
    }
}

/// The user-topic subscription frame.
pub(crate) fn subscribe_frame(listen_key: &str, id: u64) -> String {
    json!({
        "method": "SUBSCRIBE",
        "params": [format!("alpha@{listen_key}")],
        "id": id,
    })
    .to_string()
}

fn is_subscription_ack(value: &Value, id: u64) -> bool {
    value.get("id").and_then(Value::as_u64) == Some(id) && value.get("result").is_some()
}

/// Decode one frame into an [`OrderUpdate`]. Data frames arrive either bare
/// or wrapped as `{"stream": ..., "data": {...}}`; everything that is not an
/// `executionReport` is ignored.
pub fn parse_order_update(text: &str) -> Option<OrderUpdate> {
    let value: Value = serde_json::from_str(text).ok()?;
    let data = if value.get("stream").is_some() {
        value.get("data")?
    } else {
        &value
    };
    if data.get("e")?.as_str()? != "executionReport" {
        return None;
    }
    let order_id = match data.get("i")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let status = OrderStatus::from_wire(data.get("X")?.as_str()?)?;
    let side = Side::from_wire(data.get("S")?.as_str()?)?;
    let executed_quantity = data
        .get("z")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    let event_time = data.get("T").and_then(Value::as_i64).unwrap_or_default();
    Some(OrderUpdate {
        order_id,
        status,
        executed_quantity,
        side,
        event_time,
    })
}

/// Exponential backoff: 1 s doubling per attempt, capped at 60 s.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    Duration::from_secs((1u64 << exponent).min(BACKOFF_CAP_SECS))
}
