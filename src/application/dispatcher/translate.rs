//! Signal → proposed-order translation (`spec.md` §4.3 step 6–7).

use crate::domain::order::{OrderSide, OrderType};
use crate::domain::position::Position;
use crate::domain::signal::{Signal, SignalAction};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct ProposedOrderPlan {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

impl ProposedOrderPlan {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price.unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct OcoPlan {
    pub stop: ProposedOrderPlan,
    pub take_profit: ProposedOrderPlan,
}

#[derive(Debug, Clone)]
pub struct TranslationPlan {
    pub entry: ProposedOrderPlan,
    pub oco: Option<OcoPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// `close` on a symbol with no open position, or a market order with
    /// neither an explicit quantity nor a price to size it against.
    NoActionableQuantity(String),
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::NoActionableQuantity(reason) => write!(f, "{reason}"),
        }
    }
}

const PRICE_ROUNDING_SCALE: u32 = 8;

/// Translates a signal into an entry order plan plus an optional OCO
/// pair plan. `position` is the current Position View read for this
/// signal's symbol.
pub fn translate(
    signal: &Signal,
    position: &Position,
    default_target_notional: Decimal,
    min_order_notional: Decimal,
) -> Result<TranslationPlan, TranslateError> {
    let (side, order_type) = match signal.action {
        SignalAction::Buy => (
            OrderSide::Buy,
            if signal.price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
        ),
        SignalAction::Sell => (
            OrderSide::Sell,
            if signal.price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
        ),
        SignalAction::Close => {
            if position.is_flat() {
                return Err(TranslateError::NoActionableQuantity(
                    "close signal for a symbol with no open position".into(),
                ));
            }
            let side = if position.net_quantity > Decimal::ZERO {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let quantity = position.net_quantity.abs();
            return Ok(TranslationPlan {
                entry: ProposedOrderPlan {
                    symbol: signal.symbol.clone(),
                    side,
                    order_type: if signal.price.is_some() {
                        OrderType::Limit
                    } else {
                        OrderType::Market
                    },
                    quantity,
                    price: signal.price,
                },
                oco: None,
            });
        }
    };

    let quantity = match signal.quantity {
        Some(quantity) => quantity,
        None => {
            let price = signal.price.ok_or_else(|| {
                TranslateError::NoActionableQuantity(
                    "cannot size a market order with neither explicit quantity nor price".into(),
                )
            })?;
            let target_notional = if default_target_notional > Decimal::ZERO {
                default_target_notional
            } else {
                Decimal::from(10).max(min_order_notional)
            };
            round_up_to_min_notional(target_notional / price, price, min_order_notional)
        }
    };

    let quantity = match signal.price {
        Some(price) => round_up_to_min_notional(quantity, price, min_order_notional),
        None => quantity,
    };

    let entry = ProposedOrderPlan {
        symbol: signal.symbol.clone(),
        side,
        order_type,
        quantity,
        price: signal.price,
    };

    let oco = match (signal.stop_loss, signal.take_profit) {
        (Some(stop_loss), Some(take_profit)) => Some(OcoPlan {
            stop: ProposedOrderPlan {
                symbol: signal.symbol.clone(),
                side: side.opposite(),
                order_type: OrderType::Stop,
                quantity: entry.quantity,
                price: Some(stop_loss),
            },
            take_profit: ProposedOrderPlan {
                symbol: signal.symbol.clone(),
                side: side.opposite(),
                order_type: OrderType::TakeProfit,
                quantity: entry.quantity,
                price: Some(take_profit),
            },
        }),
        _ => None,
    };

    Ok(TranslationPlan { entry, oco })
}

/// If `quantity * price` falls short of `min_order_notional`, rounds the
/// quantity up (to the same 8-dp scale the fingerprint uses) to the
/// smallest increment that clears the floor (`spec.md` §4.3 tie-break).
fn round_up_to_min_notional(quantity: Decimal, price: Decimal, min_order_notional: Decimal) -> Decimal {
    if price <= Decimal::ZERO || quantity * price >= min_order_notional {
        return quantity;
    }
    let required = (min_order_notional / price).round_dp_with_strategy(
        PRICE_ROUNDING_SCALE,
        rust_decimal::RoundingStrategy::AwayFromZero,
    );
    required.max(quantity)
}
