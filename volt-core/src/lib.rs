//! Fundamental data types shared across the entire workspace.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod pricing;

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for quantity precision.
pub type Quantity = Decimal;
/// Alias for exchange-reported trading volume.
pub type Volume = Decimal;

/// Unique identifier assigned to orders by the exchange.
pub type OrderId = String;
/// Identifier of an enrolled user.
pub type UserId = i64;
/// Identifier of a configured strategy.
pub type StrategyId = String;

/// The side of an order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Order lifecycle states as reported by the exchange.
///
/// `Filled`, `Canceled`, `Rejected` and `Expired` are terminal: once one of
/// them is observed, no further transition is recorded for that order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Pending,
}

impl OrderStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" => Some(Self::Canceled),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            "PENDING" => Some(Self::Pending),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::Pending => "PENDING",
        }
    }
}

/// One decoded `executionReport` event from the order event stream.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub executed_quantity: Quantity,
    pub side: Side,
    /// Exchange event time, milliseconds since epoch.
    pub event_time: i64,
}

/// Order ids returned by a successful OTO placement.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OtoPlacement {
    /// The buy (working) leg.
    pub working_order_id: OrderId,
    /// The sell (pending) leg, activated when the working leg fills.
    pub pending_order_id: OrderId,
}

/// Catalog entry for one tradable Alpha token.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenCatalogEntry {
    pub symbol: String,
    pub last_price: Price,
    /// Exchange-side volume display multiplier. Reported volume for a trade
    /// equals nominal notional times this factor; always >= 1.
    pub mul_point: u32,
    /// Decimal places accepted for outbound prices.
    pub price_scale: u32,
    /// Decimal places accepted for outbound quantities.
    pub quantity_scale: u32,
    /// Minimum quantity increment, when the venue declares one.
    pub lot_step: Option<Quantity>,
}

impl TokenCatalogEntry {
    pub fn new(symbol: impl Into<String>, last_price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            last_price,
            mul_point: 1,
            price_scale: 8,
            quantity_scale: 8,
            lot_step: None,
        }
    }

    #[must_use]
    pub fn with_mul_point(mut self, mul_point: u32) -> Self {
        self.mul_point = mul_point.max(1);
        self
    }

    #[must_use]
    pub fn with_scales(mut self, price_scale: u32, quantity_scale: u32) -> Self {
        self.price_scale = price_scale;
        self.quantity_scale = quantity_scale;
        self
    }

    #[must_use]
    pub fn with_lot_step(mut self, step: Quantity) -> Self {
        self.lot_step = Some(step);
        self
    }
}

/// Per-token trading volume as reported by the exchange.
///
/// This is the only input to the stopping decision; the engine never keeps a
/// local accumulator.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UserVolumeSnapshot {
    pub total_volume: Volume,
    volumes: HashMap<String, Volume>,
}

impl UserVolumeSnapshot {
    pub fn new(total_volume: Volume, volumes: impl IntoIterator<Item = (String, Volume)>) -> Self {
        Self {
            total_volume,
            volumes: volumes.into_iter().collect(),
        }
    }

    /// Volume for one token, zero when the exchange reports none.
    #[must_use]
    pub fn volume_for(&self, symbol: &str) -> Volume {
        self.volumes
            .iter()
            .find(|(token, _)| token.eq_ignore_ascii_case(symbol))
            .map(|(_, volume)| *volume)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Volume)> {
        self.volumes.iter()
    }
}

/// Opaque per-user session credentials: raw header map plus a cookie blob.
///
/// The contents authenticate every private call and must never appear in
/// logs, so `Debug` is deliberately blind.
#[derive(Clone, Default)]
pub struct UserCredentials {
    pub headers: HashMap<String, String>,
    pub cookies: String,
}

impl UserCredentials {
    pub fn new(headers: HashMap<String, String>, cookies: impl Into<String>) -> Self {
        Self {
            headers,
            cookies: cookies.into(),
        }
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("headers", &format_args!("<{} redacted>", self.headers.len()))
            .field("cookies", &format_args!("<redacted>"))
            .finish()
    }
}

/// Fully resolved configuration for one strategy, immutable for a run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub id: StrategyId,
    pub display_name: String,
    pub enabled: bool,
    pub target_token_symbol: String,
    pub target_chain: String,
    pub target_volume: Volume,
    pub single_trade_amount_usdt: Decimal,
    pub trade_interval_seconds: u64,
    pub buy_offset_percentage: Decimal,
    pub sell_profit_percentage: Decimal,
    pub order_timeout_seconds: u64,
    pub retry_delay_seconds: u64,
    pub user_ids: Vec<UserId>,
}

/// Why a user's run ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TerminalCause {
    Success,
    Canceled,
    AuthFailed,
    StreamFailed,
    ListenKeyFailed,
    ConfigError,
    Error(String),
}

impl TerminalCause {
    /// The observable status a user lands in for this cause.
    #[must_use]
    pub fn status(&self) -> UserStatus {
        match self {
            Self::Success => UserStatus::StoppedSuccess,
            Self::Canceled => UserStatus::StoppedCanceled,
            Self::AuthFailed => UserStatus::StoppedAuthFailed,
            Self::StreamFailed | Self::ListenKeyFailed => UserStatus::StoppedStreamFailed,
            Self::ConfigError | Self::Error(_) => UserStatus::StoppedError,
        }
    }
}

impl fmt::Display for TerminalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Canceled => write!(f, "canceled"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::StreamFailed => write!(f, "order event stream failed"),
            Self::ListenKeyFailed => write!(f, "listen key lifecycle failed"),
            Self::ConfigError => write!(f, "configuration error"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Observable per-user run state, as exposed by the status queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserStatus {
    NotStarted,
    FilteredSatisfied,
    Running,
    StoppedSuccess,
    StoppedCanceled,
    StoppedAuthFailed,
    StoppedStreamFailed,
    StoppedError,
}

impl UserStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not-started",
            Self::FilteredSatisfied => "filtered-satisfied",
            Self::Running => "running",
            Self::StoppedSuccess => "stopped-success",
            Self::StoppedCanceled => "stopped-canceled",
            Self::StoppedAuthFailed => "stopped-auth-failed",
            Self::StoppedStreamFailed => "stopped-stream-failed",
            Self::StoppedError => "stopped-error",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_statuses_match_contract() {
        for status in [
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert!(status.is_terminal(), "{status:?} should be terminal");
        }
        for status in [
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::Pending,
        ] {
            assert!(!status.is_terminal(), "{status:?} should not be terminal");
        }
    }

    #[test]
    fn order_status_wire_round_trip() {
        for status in [
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
            OrderStatus::Pending,
        ] {
            assert_eq!(OrderStatus::from_wire(status.as_wire()), Some(status));
        }
        assert_eq!(OrderStatus::from_wire("PENDING_NEW"), None);
    }

    #[test]
    fn volume_snapshot_defaults_to_zero() {
        let snapshot = UserVolumeSnapshot::new(dec!(100), [("KOGE".to_string(), dec!(100))]);
        assert_eq!(snapshot.volume_for("KOGE"), dec!(100));
        assert_eq!(snapshot.volume_for("koge"), dec!(100));
        assert_eq!(snapshot.volume_for("AOP"), Decimal::ZERO);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = UserCredentials::new(
            [("x-token".to_string(), "secret-value".to_string())].into(),
            "session=abc123",
        );
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret-value"));
        assert!(!rendered.contains("abc123"));
    }

    #[test]
    fn terminal_causes_map_to_statuses() {
        assert_eq!(TerminalCause::Success.status(), UserStatus::StoppedSuccess);
        assert_eq!(
            TerminalCause::ListenKeyFailed.status(),
            UserStatus::StoppedStreamFailed
        );
        assert_eq!(
            TerminalCause::Error("boom".into()).status(),
            UserStatus::StoppedError
        );
    }
}
