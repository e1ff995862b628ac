//! Pure risk policy (`spec.md` §4.2). Given a proposed order and the
//! current position view, returns allow/deny — no I/O, no mutable
//! state, deterministic on identical inputs, in the same spirit as the
//! reference engine's `RiskManager` checks but expressed as a free
//! function over plain data rather than an actor with a channel.

use crate::domain::position::Position;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub symbol_allowlist: HashSet<String>,
    pub max_position_notional_per_symbol: Decimal,
    pub max_aggregate_notional: Decimal,
    pub min_order_notional: Decimal,
    pub max_order_notional: Decimal,
    pub max_orders_per_minute: u32,
    pub max_open_orders_per_strategy: u32,
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DenyReason {
    SymbolNotAllowed,
    MaxPositionNotionalExceeded,
    MaxAggregateNotionalExceeded,
    MaxOrderNotionalExceeded,
    MinOrderNotionalNotMet,
    OrdersPerMinuteExceeded,
    OpenOrdersLimitExceeded,
    ConfidenceTooLow,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::SymbolNotAllowed => "symbol not on allow-list",
            DenyReason::MaxPositionNotionalExceeded => "max per-symbol position notional exceeded",
            DenyReason::MaxAggregateNotionalExceeded => "max aggregate notional exceeded",
            DenyReason::MaxOrderNotionalExceeded => "max single-order notional exceeded",
            DenyReason::MinOrderNotionalNotMet => "below minimum order notional",
            DenyReason::OrdersPerMinuteExceeded => "per-strategy orders-per-minute cap exceeded",
            DenyReason::OpenOrdersLimitExceeded => "per-strategy open-orders cap exceeded",
            DenyReason::ConfidenceTooLow => "confidence below minimum threshold",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    Allow,
    Deny(DenyReason),
}

/// Everything the policy needs about the order being proposed, besides
/// config and the position view.
pub struct ProposedOrder<'a> {
    pub symbol: &'a str,
    pub notional: Decimal,
    pub confidence: f64,
    pub strategy_orders_this_minute: u32,
    pub strategy_open_orders: u32,
    pub aggregate_notional_excluding_symbol: Decimal,
}

/// Evaluates the checks of `spec.md` §4.2 in order, short-circuiting on
/// the first deny.
pub fn evaluate(
    order: &ProposedOrder,
    position: &Position,
    config: &RiskConfig,
) -> RiskVerdict {
    if !config.symbol_allowlist.is_empty() && !config.symbol_allowlist.contains(order.symbol) {
        return RiskVerdict::Deny(DenyReason::SymbolNotAllowed);
    }

    let prospective_symbol_notional = position.open_orders_notional + order.notional;
    if prospective_symbol_notional > config.max_position_notional_per_symbol {
        return RiskVerdict::Deny(DenyReason::MaxPositionNotionalExceeded);
    }

    let prospective_aggregate =
        order.aggregate_notional_excluding_symbol + prospective_symbol_notional;
    if prospective_aggregate > config.max_aggregate_notional {
        return RiskVerdict::Deny(DenyReason::MaxAggregateNotionalExceeded);
    }

    if order.notional > config.max_order_notional {
        return RiskVerdict::Deny(DenyReason::MaxOrderNotionalExceeded);
    }

    if order.notional < config.min_order_notional {
        return RiskVerdict::Deny(DenyReason::MinOrderNotionalNotMet);
    }

    if order.strategy_orders_this_minute > config.max_orders_per_minute {
        return RiskVerdict::Deny(DenyReason::OrdersPerMinuteExceeded);
    }

    if order.strategy_open_orders > config.max_open_orders_per_strategy {
        return RiskVerdict::Deny(DenyReason::OpenOrdersLimitExceeded);
    }

    if order.confidence < config.min_confidence {
        return RiskVerdict::Deny(DenyReason::ConfidenceTooLow);
    }

    RiskVerdict::Allow
}
