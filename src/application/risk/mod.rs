//! Risk subsystem: a pure policy (`risk_manager`) evaluated against a
//! live read model of per-symbol exposure (`position_view`).

pub mod position_view;
pub mod risk_manager;
pub mod strategy_activity;

pub use position_view::PositionView;
pub use risk_manager::{evaluate, DenyReason, ProposedOrder, RiskConfig, RiskVerdict};
pub use strategy_activity::StrategyActivityTracker;
