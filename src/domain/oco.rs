//! One-cancels-other pairing of a stop-loss and take-profit order.

use crate::domain::order::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OcoGroupId(pub String);

impl fmt::Display for OcoGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OcoGroupId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for OcoGroupId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcoState {
    Arming,
    Armed,
    OneFilled,
    Completed,
    Failed,
}

impl OcoState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OcoState::Completed | OcoState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcoSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcoPair {
    pub group_id: OcoGroupId,
    pub symbol: String,
    pub side: OcoSide,
    pub stop_order_id: OrderId,
    pub take_profit_order_id: OrderId,
    pub state: OcoState,
    pub created_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    /// Which leg filled first, set when transitioning into `OneFilled`.
    /// Lets a later event on this pair be checked against the actual
    /// sibling rather than assumed to be the cancel confirmation.
    #[serde(default)]
    pub filled_order_id: Option<OrderId>,
}

impl OcoPair {
    pub fn new(symbol: impl Into<String>, side: OcoSide, stop: OrderId, take_profit: OrderId) -> Self {
        let now = Utc::now();
        Self {
            group_id: OcoGroupId::new(),
            symbol: symbol.into(),
            side,
            stop_order_id: stop,
            take_profit_order_id: take_profit,
            state: OcoState::Arming,
            created_at: now,
            last_event_at: now,
            filled_order_id: None,
        }
    }

    /// The leg opposite `order_id`, if `order_id` belongs to this pair.
    pub fn sibling_of(&self, order_id: OrderId) -> Option<OrderId> {
        if order_id == self.stop_order_id {
            Some(self.take_profit_order_id)
        } else if order_id == self.take_profit_order_id {
            Some(self.stop_order_id)
        } else {
            None
        }
    }

    pub fn transition(&mut self, state: OcoState) {
        self.state = state;
        self.last_event_at = Utc::now();
    }
}
