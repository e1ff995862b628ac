//! `StateStore` adapters. `in_memory` backs tests and local runs;
//! `sqlite` is the durable option, grounded on the reference engine's
//! `sqlx`-based persistence layer (`infrastructure::persistence`).

pub mod in_memory;
pub mod sqlite;
