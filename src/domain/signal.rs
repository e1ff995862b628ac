//! Incoming trading signal and its deduplication fingerprint.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
    Close,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "buy"),
            SignalAction::Sell => write!(f, "sell"),
            SignalAction::Close => write!(f, "close"),
        }
    }
}

/// An intent to trade, produced by an upstream strategy. Immutable once
/// constructed — every pipeline stage reads it, none mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub action: SignalAction,
    /// Limit price; absent means market.
    pub price: Option<Decimal>,
    /// Explicit quantity; absent means computed from notional target.
    pub quantity: Option<Decimal>,
    pub confidence: f64,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

/// Deterministic dedup key, per `spec.md` §3: `(strategy_id, symbol,
/// action, rounded price, timeframe, coarse timestamp bucket)`.
///
/// Price is rounded to 8 decimal places and the timestamp is bucketed to
/// the minute — tight enough that two signals a strategy emits for the
/// same intent collide, loose enough that genuinely distinct signals
/// a few seconds apart don't.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalFingerprint(pub String);

impl fmt::Display for SignalFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const PRICE_ROUNDING_SCALE: u32 = 8;
const TIMESTAMP_BUCKET_SECS: i64 = 60;

pub fn fingerprint(signal: &Signal) -> SignalFingerprint {
    let rounded_price = signal
        .price
        .map(|p| p.round_dp(PRICE_ROUNDING_SCALE).to_string())
        .unwrap_or_else(|| "market".to_string());
    let bucket = signal.timestamp.timestamp() / TIMESTAMP_BUCKET_SECS;

    SignalFingerprint(format!(
        "{}|{}|{}|{}|{}|{}",
        signal.strategy_id, signal.symbol, signal.action, rounded_price, signal.timeframe, bucket
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_signal() -> Signal {
        Signal {
            strategy_id: "ema".into(),
            symbol: "BTCUSDT".into(),
            action: SignalAction::Buy,
            price: Some(dec!(50000)),
            quantity: Some(dec!(0.002)),
            confidence: 0.8,
            timeframe: "1h".into(),
            timestamp: Utc::now(),
            stop_loss: None,
            take_profit: None,
            meta: HashMap::new(),
        }
    }

    #[test]
    fn identical_signals_fingerprint_equal() {
        let a = base_signal();
        let b = base_signal();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn differing_symbol_fingerprints_differ() {
        let a = base_signal();
        let mut b = base_signal();
        b.symbol = "ETHUSDT".into();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn price_within_rounding_collapses() {
        let mut a = base_signal();
        let mut b = base_signal();
        a.price = Some(dec!(50000.000000001));
        b.price = Some(dec!(50000.000000002));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn timestamp_outside_bucket_differs() {
        let mut a = base_signal();
        let mut b = base_signal();
        a.timestamp = Utc::now();
        b.timestamp = a.timestamp + chrono::Duration::seconds(TIMESTAMP_BUCKET_SECS + 5);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
