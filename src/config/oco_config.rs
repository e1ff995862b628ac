//! OCO manager configuration (`spec.md` §6 `oco.*`).

use crate::infrastructure::core::retry::RetryPolicy;
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OcoConfig {
    pub cancel_retry: RetryPolicy,
}

pub fn oco_config_from_env() -> Result<OcoConfig> {
    let cancel_retry_budget = match env::var("OCO_CANCEL_RETRY_BUDGET") {
        Ok(raw) => raw
            .parse::<u32>()
            .context("failed to parse OCO_CANCEL_RETRY_BUDGET")?,
        Err(_) => 10,
    };
    Ok(OcoConfig {
        cancel_retry: RetryPolicy::new(cancel_retry_budget, Duration::from_millis(250)),
    })
}
