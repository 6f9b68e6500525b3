//! Layered strategy-configuration loading.
//!
//! Sources (lowest to highest precedence):
//! 1. The configuration file handed to [`StrategyBook::load`]
//! 2. Environment variables prefixed with `VOLT_` (separator `__`)
//!
//! Values resolve global defaults → per-strategy settings → per-user
//! overrides into the flat [`StrategyConfig`] the engine consumes.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use volt_core::{StrategyConfig, StrategyId, UserId};

#[derive(Debug, Default, Deserialize)]
struct RawAppConfig {
    #[serde(default)]
    global: GlobalSettings,
    #[serde(default)]
    strategies: Vec<RawStrategy>,
}

/// Workspace-wide defaults a strategy may override.
#[derive(Clone, Debug, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_buy_offset_percentage")]
    pub default_buy_offset_percentage: Decimal,
    #[serde(default = "default_sell_profit_percentage")]
    pub default_sell_profit_percentage: Decimal,
    #[serde(default = "default_trade_interval_seconds")]
    pub default_trade_interval_seconds: u64,
    #[serde(default = "default_single_trade_amount_usdt")]
    pub default_single_trade_amount_usdt: Decimal,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_order_timeout_seconds")]
    pub order_timeout_seconds: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_buy_offset_percentage: default_buy_offset_percentage(),
            default_sell_profit_percentage: default_sell_profit_percentage(),
            default_trade_interval_seconds: default_trade_interval_seconds(),
            default_single_trade_amount_usdt: default_single_trade_amount_usdt(),
            retry_delay_seconds: default_retry_delay_seconds(),
            order_timeout_seconds: default_order_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    id: StrategyId,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    enabled: bool,
    target_token_symbol: String,
    #[serde(default = "default_target_chain")]
    target_chain: String,
    target_volume: Decimal,
    #[serde(default)]
    single_trade_amount_usdt: Option<Decimal>,
    #[serde(default)]
    trade_interval_seconds: Option<u64>,
    #[serde(default)]
    buy_offset_percentage: Option<Decimal>,
    #[serde(default)]
    sell_profit_percentage: Option<Decimal>,
    #[serde(default)]
    order_timeout_seconds: Option<u64>,
    #[serde(default)]
    retry_delay_seconds: Option<u64>,
    #[serde(default)]
    user_ids: Vec<UserId>,
    #[serde(default)]
    user_overrides: HashMap<String, UserOverride>,
}

/// Per-user tweaks on top of a strategy's resolved values.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserOverride {
    #[serde(default)]
    pub single_trade_amount_usdt: Option<Decimal>,
    #[serde(default)]
    pub trade_interval_seconds: Option<u64>,
}

#[derive(Debug)]
struct ResolvedStrategy {
    base: StrategyConfig,
    user_overrides: HashMap<UserId, UserOverride>,
}

/// All configured strategies, fully resolved and validated.
#[derive(Debug)]
pub struct StrategyBook {
    strategies: Vec<ResolvedStrategy>,
}

impl StrategyBook {
    /// Load and resolve configuration from a file plus `VOLT_`-prefixed
    /// environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawAppConfig = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("VOLT")
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()
            .with_context(|| format!("failed to read config from {}", path.display()))?
            .try_deserialize()
            .context("configuration did not match the expected shape")?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawAppConfig) -> Result<Self> {
        let global = raw.global;
        let mut strategies: Vec<ResolvedStrategy> = Vec::with_capacity(raw.strategies.len());
        for strategy in raw.strategies {
            if strategies
                .iter()
                .any(|existing| existing.base.id == strategy.id)
            {
                bail!("duplicate strategy id {}", strategy.id);
            }
            let base = StrategyConfig {
                display_name: strategy
                    .display_name
                    .unwrap_or_else(|| strategy.id.clone()),
                id: strategy.id,
                enabled: strategy.enabled,
                target_token_symbol: strategy.target_token_symbol,
                target_chain: strategy.target_chain,
                target_volume: strategy.target_volume,
                single_trade_amount_usdt: strategy
                    .single_trade_amount_usdt
                    .unwrap_or(global.default_single_trade_amount_usdt),
                trade_interval_seconds: strategy
                    .trade_interval_seconds
                    .unwrap_or(global.default_trade_interval_seconds),
                buy_offset_percentage: strategy
                    .buy_offset_percentage
                    .unwrap_or(global.default_buy_offset_percentage),
                sell_profit_percentage: strategy
                    .sell_profit_percentage
                    .unwrap_or(global.default_sell_profit_percentage),
                order_timeout_seconds: strategy
                    .order_timeout_seconds
                    .unwrap_or(global.order_timeout_seconds),
                retry_delay_seconds: strategy
                    .retry_delay_seconds
                    .unwrap_or(global.retry_delay_seconds),
                user_ids: strategy.user_ids,
            };
            validate(&base)?;
            let mut user_overrides = HashMap::new();
            for (key, value) in strategy.user_overrides {
                let user_id: UserId = key
                    .parse()
                    .with_context(|| format!("user override key {key} is not a user id"))?;
                if !base.user_ids.contains(&user_id) {
                    bail!(
                        "strategy {} overrides user {user_id} who is not enrolled",
                        base.id
                    );
                }
                user_overrides.insert(user_id, value);
            }
            strategies.push(ResolvedStrategy {
                base,
                user_overrides,
            });
        }
        Ok(Self { strategies })
    }

    pub fn strategies(&self) -> impl Iterator<Item = &StrategyConfig> {
        self.strategies.iter().map(|entry| &entry.base)
    }

    #[must_use]
    pub fn enabled(&self) -> Vec<&StrategyConfig> {
        self.strategies()
            .filter(|strategy| strategy.enabled)
            .collect()
    }

    #[must_use]
    pub fn get(&self, strategy_id: &str) -> Option<&StrategyConfig> {
        self.strategies().find(|strategy| strategy.id == strategy_id)
    }

    /// Strategy configuration as seen by one user, with any per-user
    /// override folded in.
    #[must_use]
    pub fn for_user(&self, strategy_id: &str, user_id: UserId) -> Option<StrategyConfig> {
        let entry = self
            .strategies
            .iter()
            .find(|entry| entry.base.id == strategy_id)?;
        if !entry.base.user_ids.contains(&user_id) {
            return None;
        }
        let mut resolved = entry.base.clone();
        if let Some(overrides) = entry.user_overrides.get(&user_id) {
            if let Some(amount) = overrides.single_trade_amount_usdt {
                resolved.single_trade_amount_usdt = amount;
            }
            if let Some(interval) = overrides.trade_interval_seconds {
                resolved.trade_interval_seconds = interval;
            }
        }
        Some(resolved)
    }
}

fn validate(cfg: &StrategyConfig) -> Result<()> {
    if cfg.target_volume <= Decimal::ZERO {
        bail!("strategy {}: target_volume must be positive", cfg.id);
    }
    if cfg.single_trade_amount_usdt <= Decimal::ZERO {
        bail!(
            "strategy {}: single_trade_amount_usdt must be positive",
            cfg.id
        );
    }
    if cfg.buy_offset_percentage < Decimal::ZERO {
        bail!(
            "strategy {}: buy_offset_percentage must not be negative",
            cfg.id
        );
    }
    if cfg.sell_profit_percentage < Decimal::ZERO {
        bail!(
            "strategy {}: sell_profit_percentage must not be negative",
            cfg.id
        );
    }
    Ok(())
}

fn default_buy_offset_percentage() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_sell_profit_percentage() -> Decimal {
    Decimal::ONE
}

fn default_trade_interval_seconds() -> u64 {
    1
}

fn default_single_trade_amount_usdt() -> Decimal {
    Decimal::from(30u8)
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_order_timeout_seconds() -> u64 {
    300
}

fn default_target_chain() -> String {
    "BSC".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use rust_decimal_macros::dec;

    fn load_yaml(contents: &str) -> Result<StrategyBook> {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        StrategyBook::load(file.path())
    }

    #[test]
    fn strategies_inherit_global_defaults() {
        let book = load_yaml(
            r#"
global:
  default_single_trade_amount_usdt: 25
  default_trade_interval_seconds: 3
strategies:
  - id: koge-volume
    enabled: true
    target_token_symbol: KOGE
    target_volume: 1000
    user_ids: [1, 2]
  - id: aop-volume
    enabled: false
    target_token_symbol: AOP
    target_volume: 500
    single_trade_amount_usdt: 60
    user_ids: [3]
"#,
        )
        .expect("load");

        let koge = book.get("koge-volume").expect("strategy");
        assert_eq!(koge.single_trade_amount_usdt, dec!(25));
        assert_eq!(koge.trade_interval_seconds, 3);
        assert_eq!(koge.order_timeout_seconds, 300);
        assert_eq!(koge.display_name, "koge-volume");

        let aop = book.get("aop-volume").expect("strategy");
        assert_eq!(aop.single_trade_amount_usdt, dec!(60));

        let enabled = book.enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "koge-volume");
    }

    #[test]
    fn user_overrides_apply_only_to_their_user() {
        let book = load_yaml(
            r#"
strategies:
  - id: s1
    enabled: true
    target_token_symbol: KOGE
    target_volume: 100
    user_ids: [1, 2]
    user_overrides:
      "2":
        single_trade_amount_usdt: 10
        trade_interval_seconds: 9
"#,
        )
        .expect("load");

        let for_one = book.for_user("s1", 1).expect("user 1");
        assert_eq!(for_one.single_trade_amount_usdt, dec!(30));
        let for_two = book.for_user("s1", 2).expect("user 2");
        assert_eq!(for_two.single_trade_amount_usdt, dec!(10));
        assert_eq!(for_two.trade_interval_seconds, 9);
        assert!(book.for_user("s1", 5).is_none());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let err = load_yaml(
            r#"
strategies:
  - id: bad
    target_token_symbol: KOGE
    target_volume: 0
    user_ids: [1]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("target_volume"));

        let err = load_yaml(
            r#"
strategies:
  - id: bad
    target_token_symbol: KOGE
    target_volume: 10
    user_ids: [1]
    user_overrides:
      "9":
        single_trade_amount_usdt: 5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not enrolled"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = load_yaml(
            r#"
strategies:
  - id: twice
    target_token_symbol: KOGE
    target_volume: 10
    user_ids: [1]
  - id: twice
    target_token_symbol: AOP
    target_volume: 10
    user_ids: [1]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
