//! Lock TTL configuration (`spec.md` §6 `lock.*`).

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    pub default_ttl: Duration,
}

pub fn lock_config_from_env() -> Result<LockConfig> {
    let ttl_ms = match env::var("LOCK_DEFAULT_TTL_MS") {
        Ok(raw) => raw
            .parse::<u64>()
            .context("failed to parse LOCK_DEFAULT_TTL_MS")?,
        Err(_) => 30_000,
    };
    Ok(LockConfig {
        default_ttl: Duration::from_millis(ttl_ms),
    })
}
