#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use rust_decimal::Decimal;

use volt_core::{StrategyConfig, UserCredentials, UserId, UserStatus};
use volt_engine::{EngineConfig, MemoryCredentialsStore, StatusBoard, StrategyEngine};
use volt_exchange::{AlphaClient, AlphaClientConfig, ExchangeApi};
use volt_stream::ListenKeyConfig;
use volt_test_utils::MockAlphaExchange;

pub const AUTH_HEADER: &str = "x-alpha-token";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

pub fn credentials(auth_token: &str) -> UserCredentials {
    UserCredentials::new(
        [(AUTH_HEADER.to_string(), auth_token.to_string())].into(),
        "",
    )
}

/// Scenario-A-shaped strategy: KOGE, target 60, 30 USDT per trade, 10%
/// offsets, no pacing.
pub fn strategy(id: &str, users: &[UserId]) -> StrategyConfig {
    StrategyConfig {
        id: id.into(),
        display_name: id.into(),
        enabled: true,
        target_token_symbol: "KOGE".into(),
        target_chain: "BSC".into(),
        target_volume: Decimal::from(60),
        single_trade_amount_usdt: Decimal::from(30),
        trade_interval_seconds: 0,
        buy_offset_percentage: Decimal::from(10),
        sell_profit_percentage: Decimal::from(10),
        order_timeout_seconds: 2,
        retry_delay_seconds: 0,
        user_ids: users.to_vec(),
    }
}

pub fn engine(exchange: &MockAlphaExchange, store: MemoryCredentialsStore) -> StrategyEngine {
    let api: Arc<dyn ExchangeApi> = Arc::new(
        AlphaClient::new(AlphaClientConfig {
            base_url: exchange.rest_url(),
            request_timeout: Duration::from_secs(5),
            catalog_cache_ttl: Duration::from_secs(1),
        })
        .expect("client"),
    );
    let mut config = EngineConfig::new(exchange.ws_url());
    config.teardown_grace = Duration::from_secs(5);
    config.listen_key = ListenKeyConfig {
        refresh_interval: Duration::from_secs(60),
        retry_backoff: Duration::from_millis(50),
        max_retry_attempts: 3,
    };
    StrategyEngine::new(api, Arc::new(store), config)
}

/// Poll the board until the user reaches `expected`, failing fast when a
/// different terminal status lands first.
pub async fn wait_for_status(
    board: &StatusBoard,
    strategy_id: &str,
    user_id: UserId,
    expected: UserStatus,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(record) = board.user(strategy_id, user_id) {
            if record.status == expected {
                return Ok(());
            }
            if record.status.is_terminal() {
                bail!(
                    "user {user_id} ended as {} (wanted {expected}); last_error={:?}",
                    record.status,
                    record.last_error
                );
            }
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "timed out waiting for {expected}; current={:?}",
                board.user(strategy_id, user_id)
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the account has at least `count` recorded placements.
pub async fn wait_for_placements(
    exchange: &MockAlphaExchange,
    auth_token: &str,
    count: usize,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if exchange.state().placement_count(auth_token).await >= count {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "timed out waiting for {count} placements; have {}",
                exchange.state().placement_count(auth_token).await
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
