//! Push-side plumbing for one user: the order-event WebSocket connector and
//! the listen-key lifecycle that authorizes it.

use thiserror::Error;

mod listen_key;
mod stream;
mod stream_util;

pub use listen_key::{ListenKeyConfig, ListenKeyLifecycle, ListenKeyState};
pub use stream::{ConnectionEvent, OrderEventStream, OrderEventStreamConfig};

/// Errors raised while bringing stream resources up.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket transport: {0}")]
    Transport(String),
    #[error("subscription not acknowledged: {0}")]
    Subscription(String),
    #[error("listen key: {0}")]
    ListenKey(String),
}
