//! Volume-multiplier sizing and re-anchoring against ledger lag.

mod common;

use std::time::Duration;

use anyhow::Result;
use rust_decimal_macros::dec;

use volt_core::{TokenCatalogEntry, UserStatus};
use volt_engine::MemoryCredentialsStore;
use volt_test_utils::{
    MockAccountConfig, MockAlphaConfig, MockAlphaExchange, Scenario, ScenarioAction,
    ScenarioTrigger,
};

use common::{credentials, engine, init_tracing, strategy, wait_for_status};

/// mul_point 4 makes each 30 USDT trade worth 7.5 of real volume. The
/// first batch sizes to four trades; one ledger bump goes missing, so the
/// re-anchoring query finds 22.5 and schedules exactly one more trade.
#[tokio::test(flavor = "multi_thread")]
async fn multiplier_batch_recovers_from_ledger_lag() -> Result<()> {
    init_tracing();
    let mut exchange = MockAlphaExchange::start(
        MockAlphaConfig::new()
            .with_token(TokenCatalogEntry::new("KOGE", dec!(1.00)).with_mul_point(4))
            .with_account(
                MockAccountConfig::new("user-1").with_volume_increment("KOGE", dec!(7.5)),
            ),
    )
    .await?;
    exchange
        .state()
        .scenarios()
        .push(
            Scenario::new(
                "ledger-lag",
                ScenarioTrigger::VolumeBump,
                ScenarioAction::SkipVolumeBump,
            )
            .for_account("user-1"),
        )
        .await;

    let store = MemoryCredentialsStore::new();
    store.insert(1, credentials("user-1"));
    let engine = engine(&exchange, store);

    let mut cfg = strategy("alpha-b", &[1]);
    cfg.target_volume = dec!(30);
    engine.start(cfg).await?;

    let board = engine.status_board();
    wait_for_status(
        &board,
        "alpha-b",
        1,
        UserStatus::StoppedSuccess,
        Duration::from_secs(20),
    )
    .await?;

    assert_eq!(
        exchange.state().placement_count("user-1").await,
        5,
        "four trades in the first batch plus one re-anchored top-up"
    );
    let record = board.user("alpha-b", 1).expect("record");
    assert_eq!(record.last_volume, Some(dec!(30)));

    exchange.shutdown().await;
    Ok(())
}
