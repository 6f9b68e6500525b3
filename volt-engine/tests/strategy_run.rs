//! End-to-end runs against the mock exchange: a cold-start user trading up
//! to target, and a user the pre-filter excludes.

mod common;

use std::time::Duration;

use anyhow::Result;
use rust_decimal_macros::dec;

use volt_core::{TokenCatalogEntry, UserStatus};
use volt_engine::MemoryCredentialsStore;
use volt_test_utils::{MockAccountConfig, MockAlphaConfig, MockAlphaExchange};

use common::{credentials, engine, init_tracing, strategy, wait_for_status};

#[tokio::test(flavor = "multi_thread")]
async fn cold_start_user_reaches_target_in_two_trades() -> Result<()> {
    init_tracing();
    let mut exchange = MockAlphaExchange::start(
        MockAlphaConfig::new()
            .with_token(TokenCatalogEntry::new("KOGE", dec!(1.00)))
            .with_account(
                MockAccountConfig::new("user-1").with_volume_increment("KOGE", dec!(30)),
            ),
    )
    .await?;

    let store = MemoryCredentialsStore::new();
    store.insert(1, credentials("user-1"));
    let engine = engine(&exchange, store);

    let cfg = strategy("alpha-a", &[1]);
    engine.start(cfg.clone()).await?;
    // A second start while running must be a no-op.
    engine.start(cfg).await?;

    let board = engine.status_board();
    wait_for_status(
        &board,
        "alpha-a",
        1,
        UserStatus::StoppedSuccess,
        Duration::from_secs(15),
    )
    .await?;

    let placements = exchange.state().placements("user-1").await;
    assert_eq!(placements.len(), 2, "expected exactly two OTO placements");
    for placed in &placements {
        assert_eq!(placed.base_asset, "KOGE");
        assert_eq!(placed.buy_price, "1.10000000");
        assert_eq!(placed.sell_price, "0.99000000");
        assert_eq!(placed.quantity, "27.27272727");
    }

    let record = board.user("alpha-a", 1).expect("record");
    assert_eq!(record.last_volume, Some(dec!(60)));

    // The run is already finished; stop must be a harmless no-op.
    engine.stop("alpha-a").await;
    engine.stop("alpha-a").await;
    assert_eq!(exchange.state().placement_count("user-1").await, 2);

    exchange.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn satisfied_user_is_filtered_without_resources() -> Result<()> {
    init_tracing();
    let mut exchange = MockAlphaExchange::start(
        MockAlphaConfig::new()
            .with_token(TokenCatalogEntry::new("KOGE", dec!(1.00)))
            .with_account(MockAccountConfig::new("user-1").with_volume("KOGE", dec!(100))),
    )
    .await?;

    let store = MemoryCredentialsStore::new();
    store.insert(1, credentials("user-1"));
    let engine = engine(&exchange, store);
    engine.start(strategy("alpha-f", &[1])).await?;

    let board = engine.status_board();
    wait_for_status(
        &board,
        "alpha-f",
        1,
        UserStatus::FilteredSatisfied,
        Duration::from_secs(10),
    )
    .await?;

    assert_eq!(exchange.state().placement_count("user-1").await, 0);
    assert_eq!(
        exchange.state().listen_key_request_count("user-1").await,
        0,
        "a filtered user must not obtain a listen key"
    );

    exchange.shutdown().await;
    Ok(())
}
