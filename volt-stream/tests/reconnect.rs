//! Connector behavior against the mock venue: subscribe/ack, update
//! delivery, reconnection after a dropped socket, idempotent stop.

use std::time::Duration;

use anyhow::Result;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio::time::timeout;

use volt_core::{OrderStatus, Side, TokenCatalogEntry, UserCredentials};
use volt_exchange::{AlphaClient, AlphaClientConfig, ExchangeApi};
use volt_stream::{ConnectionEvent, OrderEventStream, OrderEventStreamConfig};
use volt_test_utils::{MockAccountConfig, MockAlphaConfig, MockAlphaExchange};

fn creds(token: &str) -> UserCredentials {
    UserCredentials::new(
        [("x-alpha-token".to_string(), token.to_string())].into(),
        "",
    )
}

async fn connected_stream(
    exchange: &MockAlphaExchange,
) -> Result<(
    OrderEventStream,
    mpsc::Receiver<volt_core::OrderUpdate>,
    mpsc::Receiver<ConnectionEvent>,
)> {
    let client = AlphaClient::new(AlphaClientConfig::new(exchange.rest_url()))?;
    let key = client.obtain_listen_key(&creds("user-1")).await?;
    let (update_tx, update_rx) = mpsc::channel(64);
    let (event_tx, mut event_rx) = mpsc::channel(32);
    let stream = OrderEventStream::start(
        OrderEventStreamConfig::new(exchange.ws_url(), key, 1),
        update_tx,
        event_tx,
    );
    loop {
        match timeout(Duration::from_secs(5), event_rx.recv()).await? {
            Some(ConnectionEvent::Connected) => break,
            Some(other) => anyhow::bail!("unexpected event before connect: {other:?}"),
            None => anyhow::bail!("event channel closed before connect"),
        }
    }
    Ok((stream, update_rx, event_rx))
}

fn base_config() -> MockAlphaConfig {
    MockAlphaConfig::new()
        .with_token(TokenCatalogEntry::new("KOGE", dec!(1.00)))
        .with_account(MockAccountConfig::new("user-1"))
}

#[tokio::test(flavor = "multi_thread")]
async fn delivers_execution_reports_in_order() -> Result<()> {
    let mut exchange = MockAlphaExchange::start(base_config()).await?;
    let (stream, mut updates, _events) = connected_stream(&exchange).await?;

    let state = exchange.state();
    state
        .emit_execution("user-1", "101", Side::Buy, "NEW", "0")
        .await;
    state
        .emit_execution("user-1", "101", Side::Buy, "FILLED", "27.27")
        .await;

    let first = timeout(Duration::from_secs(5), updates.recv())
        .await?
        .expect("first update");
    assert_eq!(first.order_id, "101");
    assert_eq!(first.status, OrderStatus::New);
    let second = timeout(Duration::from_secs(5), updates.recv())
        .await?
        .expect("second update");
    assert_eq!(second.status, OrderStatus::Filled);
    assert_eq!(second.executed_quantity, dec!(27.27));

    stream.stop().await;
    stream.stop().await;
    exchange.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnects_after_server_drop() -> Result<()> {
    let mut exchange = MockAlphaExchange::start(base_config()).await?;
    let (stream, mut updates, mut events) = connected_stream(&exchange).await?;

    exchange.state().disconnect_stream("user-1").await;

    let mut saw_disconnect = false;
    let mut saw_reconnecting = false;
    loop {
        match timeout(Duration::from_secs(10), events.recv()).await? {
            Some(ConnectionEvent::Disconnected { .. }) => saw_disconnect = true,
            Some(ConnectionEvent::Reconnecting { attempt, backoff }) => {
                saw_reconnecting = true;
                assert_eq!(attempt, 1);
                assert_eq!(backoff, Duration::from_secs(1));
            }
            Some(ConnectionEvent::Connected) => break,
            Some(ConnectionEvent::GaveUp { reason }) => {
                anyhow::bail!("stream gave up instead of reconnecting: {reason}")
            }
            None => anyhow::bail!("event channel closed mid-reconnect"),
        }
    }
    assert!(saw_disconnect);
    assert!(saw_reconnecting);

    // The new session delivers again.
    exchange
        .state()
        .emit_execution("user-1", "202", Side::Sell, "FILLED", "1")
        .await;
    let update = timeout(Duration::from_secs(5), updates.recv())
        .await?
        .expect("post-reconnect update");
    assert_eq!(update.order_id, "202");

    stream.stop().await;
    exchange.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn gives_up_when_the_endpoint_is_gone() -> Result<()> {
    let mut exchange = MockAlphaExchange::start(base_config()).await?;
    let client = AlphaClient::new(AlphaClientConfig::new(exchange.rest_url()))?;
    let key = client.obtain_listen_key(&creds("user-1")).await?;
    let ws_url = exchange.ws_url();
    exchange.shutdown().await;

    let (update_tx, _update_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let mut config = OrderEventStreamConfig::new(ws_url, key, 1);
    config.max_reconnect_attempts = 2;
    let stream = OrderEventStream::start(config, update_tx, event_tx);

    let gave_up = loop {
        match timeout(Duration::from_secs(15), event_rx.recv()).await? {
            Some(ConnectionEvent::GaveUp { .. }) => break true,
            Some(_) => continue,
            None => break false,
        }
    };
    assert!(gave_up, "expected a GaveUp event");

    stream.stop().await;
    Ok(())
}
