//! Concrete adapters for the abstract contracts in `domain::ports`, plus
//! cross-cutting infrastructure primitives (`core`) and observability.

pub mod audit;
pub mod core;
pub mod exchange;
pub mod observability;
pub mod state_store;
