//! One round-trip OTO: price it, place it, wait the legs out.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use volt_core::{pricing, StrategyConfig, TokenCatalogEntry, UserCredentials, UserId, Volume};
use volt_exchange::{ExchangeApi, ExchangeError, OtoOrderRequest};

use crate::stop::StopToken;
use crate::tracker::{OrderTracker, WaitOutcome};

/// Failures that end the user's run. Anything else is an ordinary failed
/// trade the batch loop absorbs with its retry pacing.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result of one attempted round trip.
#[derive(Clone, Debug)]
pub struct TradeOutcome {
    /// The buy leg filled, so the notional was consumed and the volume
    /// contribution counts even when the sell leg is still unresolved.
    pub completed: bool,
    pub real_volume: Volume,
}

impl TradeOutcome {
    fn failed() -> Self {
        Self {
            completed: false,
            real_volume: Decimal::ZERO,
        }
    }
}

/// Execute exactly one buy+sell OTO for `user_id`.
pub(crate) async fn execute_single_trade(
    api: &dyn ExchangeApi,
    tracker: &OrderTracker,
    cfg: &StrategyConfig,
    creds: &UserCredentials,
    user_id: UserId,
    stop: &StopToken,
) -> Result<TradeOutcome, TradeError> {
    let catalog = match api.fetch_token_catalog().await {
        Ok(catalog) => catalog,
        Err(err) => return transient_or_fatal(err, user_id, "catalog fetch"),
    };
    let entry = resolve_entry(&catalog, &cfg.target_token_symbol)?;

    let buy_price = pricing::truncate_to_scale(
        pricing::buy_price(entry.last_price, cfg.buy_offset_percentage),
        entry.price_scale,
    );
    let sell_price = pricing::truncate_to_scale(
        pricing::sell_price(buy_price, cfg.sell_profit_percentage),
        entry.price_scale,
    );
    let quantity = pricing::order_quantity(
        cfg.single_trade_amount_usdt,
        buy_price,
        entry.quantity_scale,
        entry.lot_step,
    );
    if quantity <= Decimal::ZERO {
        return Err(TradeError::Config(format!(
            "trade amount {} at price {buy_price} yields no quantity",
            cfg.single_trade_amount_usdt
        )));
    }

    let request = OtoOrderRequest {
        base_asset: entry.symbol.clone(),
        quantity,
        buy_price,
        sell_price,
        price_scale: entry.price_scale,
        quantity_scale: entry.quantity_scale,
    };
    let placement = match api.place_oto_order(creds, &request).await {
        Ok(placement) => placement,
        Err(err) => return transient_or_fatal(err, user_id, "oto placement"),
    };
    // Register both legs before yielding back to the event loop; updates
    // that raced the placement response are already buffered by the
    // tracker.
    tracker.register(&placement.working_order_id);
    tracker.register(&placement.pending_order_id);
    info!(
        user_id,
        strategy_id = %cfg.id,
        symbol = %entry.symbol,
        %quantity,
        %buy_price,
        %sell_price,
        working_order_id = %placement.working_order_id,
        pending_order_id = %placement.pending_order_id,
        "oto order placed"
    );

    let timeout = Duration::from_secs(cfg.order_timeout_seconds);
    let buy_wait = tracker
        .await_completion(&placement.working_order_id, timeout, stop)
        .await;
    if buy_wait != WaitOutcome::Filled {
        warn!(
            user_id,
            order_id = %placement.working_order_id,
            outcome = ?buy_wait,
            "buy leg did not fill"
        );
        tracker.forget(&placement.working_order_id);
        tracker.forget(&placement.pending_order_id);
        return Ok(TradeOutcome::failed());
    }

    let real_volume = pricing::real_volume(cfg.single_trade_amount_usdt, entry.mul_point);
    let sell_wait = tracker
        .await_completion(&placement.pending_order_id, timeout, stop)
        .await;
    match sell_wait {
        WaitOutcome::Filled => {
            info!(
                user_id,
                working_order_id = %placement.working_order_id,
                pending_order_id = %placement.pending_order_id,
                %real_volume,
                "oto round trip complete"
            );
        }
        outcome => {
            // The buy leg consumed the notional; the contribution counts
            // and the next authoritative volume query re-anchors reality.
            warn!(
                user_id,
                order_id = %placement.pending_order_id,
                ?outcome,
                "sell leg unresolved; counting volume and moving on"
            );
        }
    }
    tracker.forget(&placement.working_order_id);
    tracker.forget(&placement.pending_order_id);
    Ok(TradeOutcome {
        completed: true,
        real_volume,
    })
}

pub(crate) fn resolve_entry<'a>(
    catalog: &'a [TokenCatalogEntry],
    symbol: &str,
) -> Result<&'a TokenCatalogEntry, TradeError> {
    catalog
        .iter()
        .find(|entry| entry.symbol.eq_ignore_ascii_case(symbol))
        .ok_or_else(|| TradeError::Config(format!("token {symbol} is not in the catalog")))
}

/// Auth failures escalate immediately; everything else counts as a failed
/// trade for the caller's retry pacing.
fn transient_or_fatal(
    err: ExchangeError,
    user_id: UserId,
    operation: &str,
) -> Result<TradeOutcome, TradeError> {
    if err.is_auth_failure() {
        return Err(TradeError::Auth(err.to_string()));
    }
    warn!(user_id, operation, error = %err, "trade step failed");
    Ok(TradeOutcome::failed())
}
