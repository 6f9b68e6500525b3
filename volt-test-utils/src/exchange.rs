//! High-level handle bundling the mock REST and WebSocket servers.

use anyhow::Result;

use crate::rest::MockRestApi;
use crate::state::{MockAlphaConfig, MockAlphaState};
use crate::ws::MockWsServer;

/// One in-process mock Alpha exchange.
pub struct MockAlphaExchange {
    state: MockAlphaState,
    rest: MockRestApi,
    ws: MockWsServer,
}

impl MockAlphaExchange {
    /// Spawn REST and WebSocket servers backed by the provided
    /// configuration.
    pub async fn start(config: MockAlphaConfig) -> Result<Self> {
        let state = MockAlphaState::new(config);
        let rest = MockRestApi::spawn(state.clone()).await?;
        let ws = MockWsServer::spawn(state.clone()).await?;
        Ok(Self { state, rest, ws })
    }

    #[must_use]
    pub fn rest_url(&self) -> String {
        self.rest.base_url()
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        self.ws.base_url()
    }

    #[must_use]
    pub fn state(&self) -> MockAlphaState {
        self.state.clone()
    }

    pub async fn shutdown(&mut self) {
        self.rest.shutdown().await;
        self.ws.shutdown().await;
    }
}
