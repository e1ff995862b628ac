//! Core domain: signals, orders, OCO pairs, locks, and the abstract
//! ports the dispatcher's collaborators are injected through.

pub mod errors;
pub mod lock;
pub mod oco;
pub mod order;
pub mod ports;
pub mod position;
pub mod signal;
