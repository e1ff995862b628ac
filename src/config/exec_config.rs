//! Dispatcher execution configuration (`spec.md` §6 `exec.*`).

use crate::infrastructure::core::retry::RetryPolicy;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub default_target_notional: Decimal,
    pub retry: RetryPolicy,
    pub request_deadline: Duration,
    pub dispatch_workers: usize,
    /// Bound on how long shutdown waits for in-flight dispatches to
    /// drain before aborting whatever remains (`spec.md` §5).
    pub shutdown_grace_period: Duration,
}

pub fn exec_config_from_env() -> Result<ExecConfig> {
    let max_attempts = parse::<u32>("EXEC_RETRY_MAX_ATTEMPTS", 5)?;
    let base_backoff_ms = parse::<u64>("EXEC_RETRY_BASE_BACKOFF_MS", 250)?;

    Ok(ExecConfig {
        default_target_notional: parse_decimal("EXEC_DEFAULT_TARGET_NOTIONAL", Decimal::from(10))?,
        retry: RetryPolicy::new(max_attempts, Duration::from_millis(base_backoff_ms)),
        request_deadline: Duration::from_millis(parse::<u64>("EXEC_REQUEST_DEADLINE_MS", 5000)?),
        dispatch_workers: parse::<usize>("EXEC_DISPATCH_WORKERS", 4)?,
        shutdown_grace_period: Duration::from_millis(parse::<u64>("EXEC_SHUTDOWN_GRACE_MS", 10_000)?),
    })
}

fn parse_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => Decimal::from_str(&raw).with_context(|| format!("failed to parse {key}")),
        Err(_) => Ok(default),
    }
}

fn parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().with_context(|| format!("failed to parse {key}")),
        Err(_) => Ok(default),
    }
}
