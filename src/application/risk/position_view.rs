//! Read model over current per-symbol exposure (`spec.md` §4 item 6,
//! §3 `Position`).
//!
//! `net_quantity` tracks the signed sum of fills the dispatcher/OCO
//! manager observe; `open_orders_notional` tracks notional reserved by
//! orders that are live but not yet filled, so the Risk Manager can
//! reject a new order that would push aggregate exposure (filled +
//! pending) over a limit even before the pending order fills.

use crate::domain::order::OrderSide;
use crate::domain::position::Position;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

pub struct PositionView {
    positions: RwLock<HashMap<String, Position>>,
}

impl PositionView {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, symbol: &str) -> Position {
        self.positions
            .read()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol))
    }

    pub fn reserve_notional(&self, symbol: &str, notional: Decimal) {
        let mut positions = self.positions.write().unwrap();
        let entry = positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));
        entry.open_orders_notional += notional;
    }

    /// Sum of open-orders notional across every symbol other than
    /// `symbol`, for the Risk Manager's aggregate-exposure check
    /// (`spec.md` §4.2 check 3).
    pub fn aggregate_open_orders_notional_excluding(&self, symbol: &str) -> Decimal {
        self.positions
            .read()
            .unwrap()
            .iter()
            .filter(|(sym, _)| sym.as_str() != symbol)
            .map(|(_, position)| position.open_orders_notional)
            .sum()
    }

    pub fn release_notional(&self, symbol: &str, notional: Decimal) {
        let mut positions = self.positions.write().unwrap();
        if let Some(entry) = positions.get_mut(symbol) {
            entry.open_orders_notional = (entry.open_orders_notional - notional).max(Decimal::ZERO);
        }
    }

    /// Apply a fill, updating net quantity and volume-weighted average
    /// entry (`spec.md` §3 invariant: net_quantity is the signed sum of
    /// fills).
    pub fn apply_fill(&self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) {
        let mut positions = self.positions.write().unwrap();
        let entry = positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));

        let signed_qty = match side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };

        let new_net = entry.net_quantity + signed_qty;
        // Only accumulate a weighted average while a position is being
        // built in one direction; a flip or reduction resets the basis.
        if entry.net_quantity.signum() == signed_qty.signum() || entry.net_quantity.is_zero() {
            let total_cost = entry.average_entry * entry.net_quantity.abs() + price * qty;
            entry.average_entry = if new_net.is_zero() {
                Decimal::ZERO
            } else {
                total_cost / new_net.abs()
            };
        } else if new_net.is_zero() {
            entry.average_entry = Decimal::ZERO;
        }
        entry.net_quantity = new_net;
    }
}

impl Default for PositionView {
    fn default() -> Self {
        Self::new()
    }
}
