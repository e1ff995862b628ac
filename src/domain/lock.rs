//! Distributed lock record and processed-signal dedup record.

use crate::domain::signal::SignalFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub name: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Fencing token: the acquisition instant in monotonic (millisecond)
    /// units, per `spec.md` §4.1.
    pub fn fencing_token(&self) -> i64 {
        self.acquired_at.timestamp_millis()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedSignalRecord {
    pub fingerprint: SignalFingerprint,
    pub first_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProcessedSignalRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
