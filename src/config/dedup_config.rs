//! Deduplication retention configuration (`spec.md` §6 `dedup.*`).

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub retention_hours: i64,
}

pub fn dedup_config_from_env() -> Result<DedupConfig> {
    let retention_hours = match env::var("DEDUP_RETENTION_HOURS") {
        Ok(raw) => raw
            .parse::<i64>()
            .context("failed to parse DEDUP_RETENTION_HOURS")?,
        Err(_) => 24,
    };
    Ok(DedupConfig { retention_hours })
}
