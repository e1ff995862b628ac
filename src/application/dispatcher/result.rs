//! The dispatcher's closed outcome type (`spec.md` §4.3).

use crate::domain::order::OrderId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchResult {
    Executed { order_id: OrderId },
    Duplicate,
    LockDenied,
    RiskRejected { reason: String },
    ExchangeFailed { reason: String },
    Invalid { reason: String },
}

impl DispatchResult {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchResult::Executed { .. } => "executed",
            DispatchResult::Duplicate => "duplicate",
            DispatchResult::LockDenied => "lock_denied",
            DispatchResult::RiskRejected { .. } => "risk_rejected",
            DispatchResult::ExchangeFailed { .. } => "exchange_failed",
            DispatchResult::Invalid { .. } => "invalid",
        }
    }
}
