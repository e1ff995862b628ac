//! Read model over current per-symbol exposure.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed: positive is net long, negative is net short.
    pub net_quantity: Decimal,
    pub average_entry: Decimal,
    pub open_orders_notional: Decimal,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            net_quantity: Decimal::ZERO,
            average_entry: Decimal::ZERO,
            open_orders_notional: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_quantity.is_zero()
    }

    pub fn notional(&self, mark_price: Decimal) -> Decimal {
        self.net_quantity.abs() * mark_price
    }
}
