//! The per-user control loop: size a batch from authoritative volume, trade
//! it down, re-anchor, repeat.

use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use volt_core::{pricing, StrategyConfig, UserCredentials, UserId, Volume};
use volt_exchange::ExchangeApi;

use crate::status::StatusBoard;
use crate::stop::StopToken;
use crate::tracker::OrderTracker;
use crate::trade::{execute_single_trade, resolve_entry, TradeError};

/// How a batch loop ended, absent a fatal error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchEnd {
    /// The authoritative volume query confirmed the target.
    TargetReached { final_volume: Volume },
    /// The stop signal fired.
    Stopped,
}

/// Batch size for the remaining volume. Never zero while work remains: a
/// single trade may overshoot, and the re-query afterwards settles it.
pub(crate) fn loop_count(remaining: Decimal, single_real: Decimal) -> u64 {
    if single_real <= Decimal::ZERO {
        return 1;
    }
    (remaining / single_real)
        .ceil()
        .to_u64()
        .unwrap_or(1)
        .max(1)
}

/// Drive one user until the target volume is met, the stop signal fires, or
/// a fatal error surfaces.
pub(crate) async fn run_batch_loop(
    api: &dyn ExchangeApi,
    tracker: &OrderTracker,
    cfg: &StrategyConfig,
    creds: &UserCredentials,
    user_id: UserId,
    stop: &StopToken,
    board: &StatusBoard,
) -> Result<BatchEnd, TradeError> {
    let retry_delay = Duration::from_secs(cfg.retry_delay_seconds);
    let trade_interval = Duration::from_secs(cfg.trade_interval_seconds);

    loop {
        if stop.is_set() {
            return Ok(BatchEnd::Stopped);
        }

        let current = match api.fetch_user_volume(creds).await {
            Ok(snapshot) => snapshot.volume_for(&cfg.target_token_symbol),
            Err(err) if err.is_auth_failure() => {
                return Err(TradeError::Auth(err.to_string()));
            }
            Err(err) => {
                warn!(user_id, error = %err, "volume query failed; backing off");
                if !stop.sleep(retry_delay).await {
                    return Ok(BatchEnd::Stopped);
                }
                continue;
            }
        };
        board.record_volume(&cfg.id, user_id, current);

        if current >= cfg.target_volume {
            info!(
                user_id,
                strategy_id = %cfg.id,
                %current,
                target = %cfg.target_volume,
                "target volume reached"
            );
            return Ok(BatchEnd::TargetReached {
                final_volume: current,
            });
        }

        let remaining = cfg.target_volume - current;
        let mul_point = match api.fetch_token_catalog().await {
            Ok(catalog) => resolve_entry(&catalog, &cfg.target_token_symbol)?.mul_point,
            Err(err) if err.is_auth_failure() => {
                return Err(TradeError::Auth(err.to_string()));
            }
            Err(err) => {
                warn!(user_id, error = %err, "catalog fetch failed; backing off");
                if !stop.sleep(retry_delay).await {
                    return Ok(BatchEnd::Stopped);
                }
                continue;
            }
        };
        let single_real = pricing::real_volume(cfg.single_trade_amount_usdt, mul_point);
        let batch_size = loop_count(remaining, single_real);
        info!(
            user_id,
            strategy_id = %cfg.id,
            %current,
            %remaining,
            %single_real,
            batch_size,
            "starting trade batch"
        );

        for attempt in 1..=batch_size {
            if stop.is_set() {
                return Ok(BatchEnd::Stopped);
            }
            debug!(user_id, attempt, batch_size, "executing trade");
            let outcome = execute_single_trade(api, tracker, cfg, creds, user_id, stop).await?;
            let pause = if outcome.completed {
                trade_interval
            } else {
                retry_delay
            };
            if !stop.sleep(pause).await {
                return Ok(BatchEnd::Stopped);
            }
        }
        // Batch done; fall through to re-anchor against the exchange's
        // ledger before deciding whether more work remains.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn loop_count_rounds_up() {
        assert_eq!(loop_count(dec!(30), dec!(7.5)), 4);
        assert_eq!(loop_count(dec!(10), dec!(7.5)), 2);
        assert_eq!(loop_count(dec!(60), dec!(30)), 2);
    }

    #[test]
    fn loop_count_is_at_least_one() {
        assert_eq!(loop_count(dec!(5), dec!(30)), 1);
        assert_eq!(loop_count(dec!(0.0001), dec!(30)), 1);
        assert_eq!(loop_count(dec!(10), Decimal::ZERO), 1);
    }
}
