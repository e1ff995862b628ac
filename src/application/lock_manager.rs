//! Distributed lock manager (`spec.md` §4.1).
//!
//! Backed by the `StateStore`'s conditional-update primitives. Atomicity
//! comes entirely from the store; this module just sequences the calls
//! and owns the TTL/holder-id bookkeeping callers shouldn't have to.

use crate::domain::errors::{LockError, StateStoreError};
use crate::domain::lock::Lock;
use crate::domain::ports::StateStore;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted { fencing_token: i64 },
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Ok,
    Lost,
}

pub struct DistributedLockManager {
    store: Arc<dyn StateStore>,
    metrics: Option<Metrics>,
}

impl DistributedLockManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store, metrics: None }
    }

    /// Attaches a `Metrics` instance so acquire attempts are counted.
    /// Optional — tests and ad-hoc callers are free to omit it.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        holder_id: &str,
    ) -> Result<AcquireOutcome, LockError> {
        let now = Utc::now();
        let lock = Lock {
            name: name.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        };

        let granted = self
            .store
            .put_lock_if_absent_or_expired(&lock, now)
            .await
            .map_err(store_err_to_lock_err)?;

        debug!(
            lock.name = name,
            lock.holder_id = holder_id,
            lock.outcome = if granted { "granted" } else { "denied" },
            "lock acquire attempt"
        );
        if let Some(metrics) = &self.metrics {
            metrics
                .lock_acquire_total
                .with_label_values(&[if granted { "granted" } else { "denied" }])
                .inc();
        }

        if granted {
            Ok(AcquireOutcome::Granted {
                fencing_token: lock.fencing_token(),
            })
        } else {
            Ok(AcquireOutcome::Denied)
        }
    }

    pub async fn renew(
        &self,
        name: &str,
        holder_id: &str,
        new_ttl: Duration,
    ) -> Result<RenewOutcome, LockError> {
        let new_expires_at = Utc::now()
            + chrono::Duration::from_std(new_ttl).unwrap_or(chrono::Duration::zero());

        let renewed = self
            .store
            .renew_lock(name, holder_id, new_expires_at)
            .await
            .map_err(store_err_to_lock_err)?;

        debug!(
            lock.name = name,
            lock.holder_id = holder_id,
            lock.outcome = if renewed { "renewed" } else { "lost" },
            "lock renew attempt"
        );

        Ok(if renewed {
            RenewOutcome::Ok
        } else {
            RenewOutcome::Lost
        })
    }

    pub async fn release(&self, name: &str, holder_id: &str) -> Result<(), LockError> {
        self.store
            .delete_lock_if_holder(name, holder_id)
            .await
            .map_err(store_err_to_lock_err)?;
        debug!(lock.name = name, lock.holder_id = holder_id, "lock released");
        Ok(())
    }

    /// Whether a lock is currently held (for diagnostics/tests only — not
    /// a substitute for going through `acquire`).
    pub async fn is_held(&self, name: &str, now: DateTime<Utc>) -> Result<bool, LockError> {
        match self.store.get_lock(name).await.map_err(store_err_to_lock_err)? {
            Some(lock) => Ok(!lock.is_expired_at(now)),
            None => Ok(false),
        }
    }
}

fn store_err_to_lock_err(err: StateStoreError) -> LockError {
    match err {
        StateStoreError::Transient { reason } => LockError::Transient { reason },
        other => LockError::Transient {
            reason: other.to_string(),
        },
    }
}

/// Runs `body` while holding `name`, releasing on every exit path
/// (including panics inside `body`, via the async drop-equivalent
/// explicit release in both branches). Per `spec.md` §4.1 "Scoped use."
pub async fn with_lock<F, Fut, T>(
    manager: &DistributedLockManager,
    name: &str,
    ttl: Duration,
    holder_id: &str,
    body: F,
) -> Result<Option<T>, LockError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    match manager.acquire(name, ttl, holder_id).await? {
        AcquireOutcome::Denied => Ok(None),
        AcquireOutcome::Granted { .. } => {
            let result = body().await;
            manager.release(name, holder_id).await?;
            Ok(Some(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::state_store::in_memory::InMemoryStateStore;

    #[tokio::test]
    async fn second_acquire_before_expiry_is_denied() {
        let store = Arc::new(InMemoryStateStore::new());
        let manager = DistributedLockManager::new(store);

        let first = manager
            .acquire("signal:abc", Duration::from_secs(30), "worker-1")
            .await
            .unwrap();
        assert!(matches!(first, AcquireOutcome::Granted { .. }));

        let second = manager
            .acquire("signal:abc", Duration::from_secs(30), "worker-2")
            .await
            .unwrap();
        assert_eq!(second, AcquireOutcome::Denied);
    }

    #[tokio::test]
    async fn release_then_acquire_succeeds() {
        let store = Arc::new(InMemoryStateStore::new());
        let manager = DistributedLockManager::new(store);

        manager
            .acquire("signal:abc", Duration::from_secs(30), "worker-1")
            .await
            .unwrap();
        manager.release("signal:abc", "worker-1").await.unwrap();

        let second = manager
            .acquire("signal:abc", Duration::from_secs(30), "worker-2")
            .await
            .unwrap();
        assert!(matches!(second, AcquireOutcome::Granted { .. }));
    }

    #[tokio::test]
    async fn release_with_wrong_holder_is_noop() {
        let store = Arc::new(InMemoryStateStore::new());
        let manager = DistributedLockManager::new(store);

        manager
            .acquire("signal:abc", Duration::from_secs(30), "worker-1")
            .await
            .unwrap();
        manager.release("signal:abc", "worker-2").await.unwrap();

        let second = manager
            .acquire("signal:abc", Duration::from_secs(30), "worker-2")
            .await
            .unwrap();
        assert_eq!(second, AcquireOutcome::Denied);
    }

    #[tokio::test]
    async fn renew_by_non_holder_reports_lost() {
        let store = Arc::new(InMemoryStateStore::new());
        let manager = DistributedLockManager::new(store);

        manager
            .acquire("signal:abc", Duration::from_secs(30), "worker-1")
            .await
            .unwrap();

        let outcome = manager
            .renew("signal:abc", "worker-2", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, RenewOutcome::Lost);
    }

    #[tokio::test]
    async fn with_lock_releases_after_body_runs() {
        let store = Arc::new(InMemoryStateStore::new());
        let manager = DistributedLockManager::new(store);

        let result = with_lock(&manager, "oco:g1", Duration::from_secs(30), "w1", || async {
            42
        })
        .await
        .unwrap();
        assert_eq!(result, Some(42));

        assert!(!manager.is_held("oco:g1", Utc::now()).await.unwrap());
    }
}
