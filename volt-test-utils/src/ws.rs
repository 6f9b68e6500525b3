//! Mock WebSocket server speaking the SUBSCRIBE/ack/executionReport
//! protocol.

use std::net::SocketAddr;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::state::MockAlphaState;

pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockWsServer {
    pub async fn spawn(state: MockAlphaState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let state = state.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_socket(state, stream).await {
                                    warn!(%peer, error = %err, "mock ws connection ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "mock ws accept failed");
                            break;
                        }
                    }
                }
            }
        });
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn handle_socket(state: MockAlphaState, stream: TcpStream) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    // The first frame must be the SUBSCRIBE naming the user topic.
    let (auth_token, sub_id) = loop {
        let Some(message) = source.next().await else {
            return Ok(());
        };
        let text = match message? {
            Message::Text(text) => text,
            Message::Ping(payload) => {
                sink.send(Message::Pong(payload)).await?;
                continue;
            }
            Message::Close(_) => return Ok(()),
            _ => continue,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if value["method"].as_str() != Some("SUBSCRIBE") {
            continue;
        }
        let sub_id = value["id"].as_u64().unwrap_or(1);
        let topic = value["params"][0].as_str().unwrap_or_default();
        let Some(listen_key) = topic.strip_prefix("alpha@") else {
            warn!(topic, "subscription for unrecognized topic");
            continue;
        };
        match state.listen_key_account(listen_key).await {
            Some(token) => break (token, sub_id),
            None => {
                warn!(listen_key, "subscription with unknown listen key");
                sink.send(Message::Close(None)).await?;
                return Ok(());
            }
        }
    };

    sink.send(Message::Text(
        json!({ "result": Value::Null, "id": sub_id }).to_string(),
    ))
    .await?;
    debug!(%auth_token, "mock ws subscription acknowledged");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Value>();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();
    let generation = state.register_conn(&auth_token, event_tx, close_tx).await;

    loop {
        tokio::select! {
            payload = event_rx.recv() => match payload {
                Some(payload) => {
                    if sink.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = close_rx.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            message = source.next() => match message {
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "mock ws read error");
                    break;
                }
            }
        }
    }

    state.clear_conn(&auth_token, generation).await;
    Ok(())
}
