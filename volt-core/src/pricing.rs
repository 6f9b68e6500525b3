//! Decimal price, quantity and volume arithmetic.
//!
//! All outbound values are truncated toward zero to the venue-declared
//! scale, matching how the exchange itself quantizes order parameters.

use rust_decimal::{Decimal, RoundingStrategy};

/// Buy price: last traded price raised by the configured offset percentage.
#[must_use]
pub fn buy_price(last_price: Decimal, buy_offset_percentage: Decimal) -> Decimal {
    last_price * (Decimal::ONE + buy_offset_percentage / Decimal::ONE_HUNDRED)
}

/// Sell price: the buy price discounted by the configured profit percentage.
///
/// The "profit" accrues to the counterparty; the round trip intentionally
/// sells below the buy to fill quickly.
#[must_use]
pub fn sell_price(buy_price: Decimal, sell_profit_percentage: Decimal) -> Decimal {
    buy_price * (Decimal::ONE - sell_profit_percentage / Decimal::ONE_HUNDRED)
}

/// Truncate toward zero to `scale` decimal places.
#[must_use]
pub fn truncate_to_scale(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::ToZero)
}

/// Snap a quantity down onto a lot-step grid.
#[must_use]
pub fn snap_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

/// Order quantity for a notional amount at a buy price, truncated to the
/// venue quantity scale and optionally snapped to the lot step.
#[must_use]
pub fn order_quantity(
    amount_usdt: Decimal,
    buy_price: Decimal,
    quantity_scale: u32,
    lot_step: Option<Decimal>,
) -> Decimal {
    if buy_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut quantity = truncate_to_scale(amount_usdt / buy_price, quantity_scale);
    if let Some(step) = lot_step {
        quantity = truncate_to_scale(snap_to_step(quantity, step), quantity_scale);
    }
    quantity
}

/// Real volume contribution of one trade: nominal notional divided by the
/// token's display multiplier.
#[must_use]
pub fn real_volume(amount_usdt: Decimal, mul_point: u32) -> Decimal {
    amount_usdt / Decimal::from(mul_point.max(1))
}

/// Render a value as a fixed-point payload string with exactly `scale`
/// fractional digits, truncating first so no rounding happens at render
/// time.
#[must_use]
pub fn format_fixed(value: Decimal, scale: u32) -> String {
    let truncated = truncate_to_scale(value, scale);
    format!("{truncated:.prec$}", prec = scale as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_offsets_return_the_input_price() {
        let last = dec!(1.23456789);
        let buy = buy_price(last, Decimal::ZERO);
        let sell = sell_price(buy, Decimal::ZERO);
        assert_eq!(sell, last);
    }

    #[test]
    fn offsets_move_prices_in_opposite_directions() {
        let buy = buy_price(dec!(1.00), dec!(10));
        assert_eq!(buy, dec!(1.10));
        let sell = sell_price(buy, dec!(10));
        assert_eq!(sell, dec!(0.99));
    }

    #[test]
    fn truncation_never_rounds_up() {
        assert_eq!(truncate_to_scale(dec!(1.999999999), 8), dec!(1.99999999));
        assert_eq!(truncate_to_scale(dec!(-1.999999999), 8), dec!(-1.99999999));
        assert_eq!(truncate_to_scale(dec!(27.2727272727), 6), dec!(27.272727));
    }

    #[test]
    fn quantity_uses_scale_and_lot_step() {
        let quantity = order_quantity(dec!(30), dec!(1.10), 6, None);
        assert_eq!(quantity, dec!(27.272727));

        let stepped = order_quantity(dec!(30), dec!(1.10), 6, Some(dec!(0.5)));
        assert_eq!(stepped, dec!(27.0));
    }

    #[test]
    fn quantity_is_zero_for_degenerate_price() {
        assert_eq!(order_quantity(dec!(30), Decimal::ZERO, 8, None), Decimal::ZERO);
    }

    #[test]
    fn real_volume_divides_by_mul_point() {
        assert_eq!(real_volume(dec!(30), 1), dec!(30));
        assert_eq!(real_volume(dec!(30), 4), dec!(7.5));
        // A zero multiplier from a malformed catalog entry is clamped.
        assert_eq!(real_volume(dec!(30), 0), dec!(30));
    }

    #[test]
    fn fixed_formatting_pads_and_truncates() {
        assert_eq!(format_fixed(dec!(1.1), 4), "1.1000");
        assert_eq!(format_fixed(dec!(1.123456789), 4), "1.1234");
        assert_eq!(format_fixed(dec!(27), 2), "27.00");
    }
}
