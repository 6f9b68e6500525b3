//! Shared mutable state behind the mock exchange's REST and WebSocket
//! servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use volt_core::{Side, TokenCatalogEntry, Volume};

use crate::scenario::{ScenarioAction, ScenarioManager, ScenarioTrigger};

/// Value of the `x-alpha-token` header identifying a mock account.
pub type AuthToken = String;

/// Record of one accepted OTO placement.
#[derive(Clone, Debug)]
pub struct PlacedOto {
    pub working_order_id: String,
    pub pending_order_id: String,
    pub base_asset: String,
    pub quantity: String,
    pub buy_price: String,
    pub sell_price: String,
}

pub(crate) struct AccountState {
    pub volumes: HashMap<String, Volume>,
    pub volume_increment: HashMap<String, Volume>,
    pub placements: Vec<PlacedOto>,
    pub listen_key_requests: usize,
    pub last_listen_key: Option<String>,
}

struct ConnHandle {
    generation: u64,
    sender: mpsc::UnboundedSender<Value>,
    close: mpsc::UnboundedSender<()>,
}

struct Inner {
    catalog: Vec<TokenCatalogEntry>,
    accounts: HashMap<AuthToken, AccountState>,
    listen_keys: HashMap<String, AuthToken>,
    conns: HashMap<AuthToken, ConnHandle>,
    conn_seq: u64,
    order_seq: u64,
    listen_seq: u64,
    working_fill_delay: Duration,
    pending_fill_delay: Duration,
}

/// Declarative bootstrap for one mock account.
#[derive(Clone, Debug, Default)]
pub struct MockAccountConfig {
    pub auth_token: AuthToken,
    pub volumes: HashMap<String, Volume>,
    pub volume_increment: HashMap<String, Volume>,
}

impl MockAccountConfig {
    pub fn new(auth_token: impl Into<AuthToken>) -> Self {
        Self {
            auth_token: auth_token.into(),
            ..Self::default()
        }
    }

    /// Seed the exchange-reported volume for a token.
    #[must_use]
    pub fn with_volume(mut self, symbol: impl Into<String>, volume: Volume) -> Self {
        self.volumes.insert(symbol.into(), volume);
        self
    }

    /// Advance the reported volume by this much every time a working leg
    /// fills for the symbol.
    #[must_use]
    pub fn with_volume_increment(mut self, symbol: impl Into<String>, step: Volume) -> Self {
        self.volume_increment.insert(symbol.into(), step);
        self
    }
}

/// Configuration passed into [`MockAlphaState::new`].
#[derive(Clone, Default)]
pub struct MockAlphaConfig {
    pub tokens: Vec<TokenCatalogEntry>,
    pub accounts: Vec<MockAccountConfig>,
    pub scenarios: ScenarioManager,
    pub working_fill_delay: Option<Duration>,
    pub pending_fill_delay: Option<Duration>,
}

impl MockAlphaConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, entry: TokenCatalogEntry) -> Self {
        self.tokens.push(entry);
        self
    }

    #[must_use]
    pub fn with_account(mut self, account: MockAccountConfig) -> Self {
        self.accounts.push(account);
        self
    }

    #[must_use]
    pub fn with_scenarios(mut self, scenarios: ScenarioManager) -> Self {
        self.scenarios = scenarios;
        self
    }

    #[must_use]
    pub fn with_fill_delays(mut self, working: Duration, pending: Duration) -> Self {
        self.working_fill_delay = Some(working);
        self.pending_fill_delay = Some(pending);
        self
    }
}

/// Handle over the mock exchange's in-memory state. Cheap to clone.
#[derive(Clone)]
pub struct MockAlphaState {
    inner: Arc<Mutex<Inner>>,
    scenarios: ScenarioManager,
}

impl MockAlphaState {
    #[must_use]
    pub fn new(config: MockAlphaConfig) -> Self {
        let accounts = config
            .accounts
            .into_iter()
            .map(|account| {
                (
                    account.auth_token.clone(),
                    AccountState {
                        volumes: account.volumes,
                        volume_increment: account.volume_increment,
                        placements: Vec::new(),
                        listen_key_requests: 0,
                        last_listen_key: None,
                    },
                )
            })
            .collect();
        let inner = Inner {
            catalog: config.tokens,
            accounts,
            listen_keys: HashMap::new(),
            conns: HashMap::new(),
            conn_seq: 0,
            order_seq: 1,
            listen_seq: 1,
            working_fill_delay: config
                .working_fill_delay
                .unwrap_or(Duration::from_millis(25)),
            pending_fill_delay: config
                .pending_fill_delay
                .unwrap_or(Duration::from_millis(25)),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            scenarios: config.scenarios,
        }
    }

    #[must_use]
    pub fn scenarios(&self) -> ScenarioManager {
        self.scenarios.clone()
    }

    pub async fn authenticate(&self, auth_token: &str) -> bool {
        let guard = self.inner.lock().await;
        guard.accounts.contains_key(auth_token)
    }

    pub async fn catalog_payload(&self) -> Value {
        let guard = self.inner.lock().await;
        Value::Array(
            guard
                .catalog
                .iter()
                .map(|entry| {
                    let mut wire = json!({
                        "symbol": entry.symbol,
                        "price": entry.last_price.to_string(),
                        "mulPoint": entry.mul_point,
                        "priceScale": entry.price_scale,
                        "quantityScale": entry.quantity_scale,
                    });
                    if let Some(step) = entry.lot_step {
                        wire["stepSize"] = Value::String(step.to_string());
                    }
                    wire
                })
                .collect(),
        )
    }

    pub async fn volume_payload(&self, auth_token: &str) -> Result<Value> {
        let guard = self.inner.lock().await;
        let account = guard
            .accounts
            .get(auth_token)
            .ok_or_else(|| anyhow!("unknown account {auth_token}"))?;
        let total: Decimal = account.volumes.values().copied().sum();
        let list: Vec<Value> = account
            .volumes
            .iter()
            .map(|(token, volume)| {
                json!({ "tokenName": token, "volume": volume })
            })
            .collect();
        Ok(json!({
            "totalVolume": total,
            "tradeVolumeInfoList": list,
        }))
    }

    pub async fn set_volume(&self, auth_token: &str, symbol: &str, volume: Volume) {
        let mut guard = self.inner.lock().await;
        if let Some(account) = guard.accounts.get_mut(auth_token) {
            account.volumes.insert(symbol.to_string(), volume);
        }
    }

    /// Record a placement and hand back fresh leg ids.
    pub async fn place_oto(
        &self,
        auth_token: &str,
        base_asset: &str,
        quantity: &str,
        buy_price: &str,
        sell_price: &str,
    ) -> Result<PlacedOto> {
        let mut guard = self.inner.lock().await;
        let working = guard.order_seq;
        let pending = guard.order_seq + 1;
        guard.order_seq += 2;
        let placed = PlacedOto {
            working_order_id: working.to_string(),
            pending_order_id: pending.to_string(),
            base_asset: base_asset.to_string(),
            quantity: quantity.to_string(),
            buy_price: buy_price.to_string(),
            sell_price: sell_price.to_string(),
        };
        let account = guard
            .accounts
            .get_mut(auth_token)
            .ok_or_else(|| anyhow!("unknown account {auth_token}"))?;
        account.placements.push(placed.clone());
        Ok(placed)
    }

    pub async fn placements(&self, auth_token: &str) -> Vec<PlacedOto> {
        let guard = self.inner.lock().await;
        guard
            .accounts
            .get(auth_token)
            .map(|account| account.placements.clone())
            .unwrap_or_default()
    }

    pub async fn placement_count(&self, auth_token: &str) -> usize {
        self.placements(auth_token).await.len()
    }

    pub async fn fill_delays(&self) -> (Duration, Duration) {
        let guard = self.inner.lock().await;
        (guard.working_fill_delay, guard.pending_fill_delay)
    }

    pub async fn obtain_listen_key(&self, auth_token: &str) -> Result<String> {
        let mut guard = self.inner.lock().await;
        let key = format!("mock-listen-key-{}", guard.listen_seq);
        guard.listen_seq += 1;
        guard.listen_keys.insert(key.clone(), auth_token.to_string());
        let account = guard
            .accounts
            .get_mut(auth_token)
            .ok_or_else(|| anyhow!("unknown account {auth_token}"))?;
        account.listen_key_requests += 1;
        account.last_listen_key = Some(key.clone());
        Ok(key)
    }

    pub async fn listen_key_request_count(&self, auth_token: &str) -> usize {
        let guard = self.inner.lock().await;
        guard
            .accounts
            .get(auth_token)
            .map(|account| account.listen_key_requests)
            .unwrap_or_default()
    }

    pub async fn listen_key_account(&self, listen_key: &str) -> Option<AuthToken> {
        let guard = self.inner.lock().await;
        guard.listen_keys.get(listen_key).cloned()
    }

    /// Returns whether the key was known; closing twice reports not-found.
    pub async fn close_listen_key(&self, _auth_token: &str, listen_key: &str) -> bool {
        let mut guard = self.inner.lock().await;
        guard.listen_keys.remove(listen_key).is_some()
    }

    pub(crate) async fn register_conn(
        &self,
        auth_token: &str,
        sender: mpsc::UnboundedSender<Value>,
        close: mpsc::UnboundedSender<()>,
    ) -> u64 {
        let mut guard = self.inner.lock().await;
        guard.conn_seq += 1;
        let generation = guard.conn_seq;
        guard.conns.insert(
            auth_token.to_string(),
            ConnHandle {
                generation,
                sender,
                close,
            },
        );
        generation
    }

    pub(crate) async fn clear_conn(&self, auth_token: &str, generation: u64) {
        let mut guard = self.inner.lock().await;
        if guard
            .conns
            .get(auth_token)
            .is_some_and(|conn| conn.generation == generation)
        {
            guard.conns.remove(auth_token);
        }
    }

    /// Force-close the account's current order-event connection; the
    /// connector under test is expected to reconnect.
    pub async fn disconnect_stream(&self, auth_token: &str) {
        let guard = self.inner.lock().await;
        if let Some(conn) = guard.conns.get(auth_token) {
            let _ = conn.close.send(());
        }
    }

    /// Push one `executionReport` to the account's live connection, wrapped
    /// in the stream envelope when a listen key is known.
    pub async fn emit_execution(
        &self,
        auth_token: &str,
        order_id: &str,
        side: Side,
        status: &str,
        executed_quantity: &str,
    ) {
        let guard = self.inner.lock().await;
        let report = json!({
            "e": "executionReport",
            "i": order_id,
            "S": side.as_wire(),
            "X": status,
            "z": executed_quantity,
            "T": Utc::now().timestamp_millis(),
        });
        let frame = match guard
            .accounts
            .get(auth_token)
            .and_then(|account| account.last_listen_key.as_ref())
        {
            Some(key) => json!({ "stream": format!("alpha@{key}"), "data": report }),
            None => report,
        };
        if let Some(conn) = guard.conns.get(auth_token) {
            if conn.sender.send(frame).is_err() {
                debug!(auth_token, "dropping execution report; connection gone");
            }
        } else {
            debug!(auth_token, "no live connection for execution report");
        }
    }

    /// Advance the account's reported volume for a symbol by its configured
    /// increment, unless a `SkipVolumeBump` scenario eats this one.
    pub async fn apply_volume_bump(&self, auth_token: &str, symbol: &str) {
        if let Some(ScenarioAction::SkipVolumeBump) = self
            .scenarios
            .take_for(ScenarioTrigger::VolumeBump, auth_token)
            .await
        {
            debug!(auth_token, symbol, "volume bump skipped by scenario");
            return;
        }
        let mut guard = self.inner.lock().await;
        if let Some(account) = guard.accounts.get_mut(auth_token) {
            let Some(step) = account.volume_increment.get(symbol).copied() else {
                return;
            };
            let entry = account
                .volumes
                .entry(symbol.to_string())
                .or_insert(Decimal::ZERO);
            *entry += step;
        }
    }
}
