//! Stop must preempt pacing sleeps promptly and place nothing further.

mod common;

use std::time::{Duration, Instant};

use anyhow::Result;
use rust_decimal_macros::dec;

use volt_core::{TokenCatalogEntry, UserStatus};
use volt_engine::MemoryCredentialsStore;
use volt_test_utils::{MockAccountConfig, MockAlphaConfig, MockAlphaExchange};

use common::{credentials, engine, init_tracing, strategy, wait_for_placements, wait_for_status};

#[tokio::test(flavor = "multi_thread")]
async fn stop_during_trade_interval_cancels_promptly() -> Result<()> {
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

    // Far-away target and a long inter-trade pause: the loop will be midway
    // through that sleep when stop arrives.
    let mut cfg = strategy("alpha-d", &[1]);
    cfg.target_volume = dec!(100000);
    cfg.trade_interval_seconds = 5;
    engine.start(cfg).await?;

    wait_for_placements(&exchange, "user-1", 1, Duration::from_secs(10)).await?;
    // Let the first round trip finish so the loop is parked in the
    // interval sleep.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let placed_before = exchange.state().placement_count("user-1").await;
    let started = Instant::now();
    engine.stop("alpha-d").await;
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_secs(2),
        "stop should not wait out the 5 s interval; took {elapsed:?}"
    );

    let board = engine.status_board();
    wait_for_status(
        &board,
        "alpha-d",
        1,
        UserStatus::StoppedCanceled,
        Duration::from_secs(2),
    )
    .await?;

    // No further placements after the stop.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        exchange.state().placement_count("user-1").await,
        placed_before
    );

    // Stopping again is a no-op.
    let started = Instant::now();
    engine.stop("alpha-d").await;
    assert!(started.elapsed() < Duration::from_millis(100));

    exchange.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_all_reaches_every_strategy() -> Result<()> {
    init_tracing();
    let mut exchange = MockAlphaExchange::start(
        MockAlphaConfig::new()
            .with_token(TokenCatalogEntry::new("KOGE", dec!(1.00)))
            .with_account(
                MockAccountConfig::new("user-1").with_volume_increment("KOGE", dec!(30)),
            )
            .with_account(
                MockAccountConfig::new("user-2").with_volume_increment("KOGE", dec!(30)),
            ),
    )
    .await?;

    let store = MemoryCredentialsStore::new();
    store.insert(1, credentials("user-1"));
    store.insert(2, credentials("user-2"));
    let engine = engine(&exchange, store);

    let mut first = strategy("alpha-one", &[1]);
    first.target_volume = dec!(100000);
    first.trade_interval_seconds = 5;
    let mut second = strategy("alpha-two", &[2]);
    second.target_volume = dec!(100000);
    second.trade_interval_seconds = 5;
    engine.start(first).await?;
    engine.start(second).await?;

    wait_for_placements(&exchange, "user-1", 1, Duration::from_secs(10)).await?;
    wait_for_placements(&exchange, "user-2", 1, Duration::from_secs(10)).await?;

    engine.stop_all().await;
    assert!(!engine.is_running("alpha-one").await);
    assert!(!engine.is_running("alpha-two").await);

    let board = engine.status_board();
    wait_for_status(
        &board,
        "alpha-one",
        1,
        UserStatus::StoppedCanceled,
        Duration::from_secs(2),
    )
    .await?;
    wait_for_status(
        &board,
        "alpha-two",
        2,
        UserStatus::StoppedCanceled,
        Duration::from_secs(2),
    )
    .await?;

    exchange.shutdown().await;
    Ok(())
}
