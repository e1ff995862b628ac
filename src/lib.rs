//! Dispatcher subsystem for a cryptocurrency order execution engine:
//! deduplication, distributed locking, risk gating, signal translation,
//! exchange submission, audit logging, and OCO lifecycle management.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
