//! Configuration module, organized by domain the way the reference
//! engine organizes its own `config/` directory: one sub-module per
//! concern, each with a `from_env()` constructor, aggregated into a
//! single `Config` the composition root loads once.

mod dedup_config;
mod exec_config;
mod lock_config;
mod oco_config;
mod risk_config;

pub use dedup_config::DedupConfig;
pub use exec_config::ExecConfig;
pub use lock_config::LockConfig;
pub use oco_config::OcoConfig;

use crate::application::risk::RiskConfig;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub risk: RiskConfig,
    pub exec: ExecConfig,
    pub lock: LockConfig,
    pub dedup: DedupConfig,
    pub oco: OcoConfig,
    pub database_url: String,
    pub audit_log_path: String,
    pub reconciler_poll_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            risk: risk_config::risk_config_from_env()?,
            exec: exec_config::exec_config_from_env()?,
            lock: lock_config::lock_config_from_env()?,
            dedup: dedup_config::dedup_config_from_env()?,
            oco: oco_config::oco_config_from_env()?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://dispatcher.db".to_string()),
            audit_log_path: std::env::var("AUDIT_LOG_PATH")
                .unwrap_or_else(|_| "audit.jsonl".to_string()),
            reconciler_poll_interval_ms: std::env::var("RECONCILER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(30_000),
        })
    }
}
