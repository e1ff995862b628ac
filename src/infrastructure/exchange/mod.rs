//! `ExchangeGateway` adapters.

pub mod mock;
