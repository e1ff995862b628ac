//! Risk policy configuration, loaded from environment variables the way
//! the reference engine's `RiskEnvConfig` loads risk parameters: one
//! `from_env()` constructor, per-field `parse_*` helpers, explicit
//! defaults.

use crate::application::risk::RiskConfig;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

pub fn risk_config_from_env() -> Result<RiskConfig> {
    Ok(RiskConfig {
        symbol_allowlist: parse_symbol_set("RISK_SYMBOL_ALLOWLIST")?,
        max_position_notional_per_symbol: parse_decimal(
            "RISK_MAX_POSITION_NOTIONAL_PER_SYMBOL",
            Decimal::from(100_000),
        )?,
        max_aggregate_notional: parse_decimal(
            "RISK_MAX_AGGREGATE_NOTIONAL",
            Decimal::from(1_000_000),
        )?,
        min_order_notional: parse_decimal("RISK_MIN_ORDER_NOTIONAL", Decimal::from(5))?,
        max_order_notional: parse_decimal("RISK_MAX_ORDER_NOTIONAL", Decimal::from(50_000))?,
        max_orders_per_minute: parse::<u32>("RISK_MAX_ORDERS_PER_MINUTE", 30)?,
        max_open_orders_per_strategy: parse::<u32>("RISK_MAX_OPEN_ORDERS_PER_STRATEGY", 50)?,
        min_confidence: parse::<f64>("RISK_MIN_CONFIDENCE", 0.5)?,
    })
}

fn parse_symbol_set(key: &str) -> Result<HashSet<String>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()),
        _ => Ok(HashSet::new()),
    }
}

fn parse_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => Decimal::from_str(&raw).with_context(|| format!("failed to parse {key}")),
        Err(_) => Ok(default),
    }
}

fn parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().with_context(|| format!("failed to parse {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_vars_fall_back_to_defaults() {
        // SAFETY: test-only, single-threaded env mutation scoped to this
        // function's keys, no other test reads them.
        unsafe {
            env::remove_var("RISK_MIN_ORDER_NOTIONAL");
        }
        let config = risk_config_from_env().unwrap();
        assert_eq!(config.min_order_notional, Decimal::from(5));
    }
}
