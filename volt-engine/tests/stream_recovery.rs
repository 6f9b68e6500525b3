//! A dropped WebSocket mid-wait: the order timeout is the safety net, and
//! the authoritative volume query repairs the bookkeeping.

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

use common::{credentials, engine, init_tracing, strategy, wait_for_placements, wait_for_status};

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_during_order_wait_falls_back_to_timeout() -> Result<()> {
    init_tracing();
    let mut exchange = MockAlphaExchange::start(
        MockAlphaConfig::new()
            .with_token(TokenCatalogEntry::new("KOGE", dec!(1.00)))
            .with_account(
                MockAccountConfig::new("user-1").with_volume_increment("KOGE", dec!(30)),
            ),
    )
    .await?;
    // The first placement never gets fills on the wire; its FILLED would
    // have been missed during the reconnect gap anyway.
    exchange
        .state()
        .scenarios()
        .push(
            Scenario::new(
                "lost-fill",
                ScenarioTrigger::PlaceOto,
                ScenarioAction::WithholdFills,
            )
            .for_account("user-1"),
        )
        .await;

    let store = MemoryCredentialsStore::new();
    store.insert(1, credentials("user-1"));
    let engine = engine(&exchange, store);

    let mut cfg = strategy("alpha-e", &[1]);
    cfg.target_volume = dec!(30);
    cfg.order_timeout_seconds = 1;
    engine.start(cfg).await?;

    // While the batch loop waits on the withheld buy leg, kill the socket.
    wait_for_placements(&exchange, "user-1", 1, Duration::from_secs(10)).await?;
    exchange.state().disconnect_stream("user-1").await;

    // The wait times out, the trade counts as failed, and the loop carries
    // on: the next placement (whose volume still lands on the exchange
    // ledger) plus the re-anchoring query finish the job.
    let board = engine.status_board();
    wait_for_status(
        &board,
        "alpha-e",
        1,
        UserStatus::StoppedSuccess,
        Duration::from_secs(30),
    )
    .await?;

    let placements = exchange.state().placement_count("user-1").await;
    assert!(
        (2..=4).contains(&placements),
        "expected the withheld trade plus at most a few timeout retries, got {placements}"
    );
    let record = board.user("alpha-e", 1).expect("record");
    assert_eq!(record.last_volume, Some(dec!(30)));

    exchange.shutdown().await;
    Ok(())
}
