//! Append-only newline-delimited JSON file audit sink — the systems-
//! language equivalent of an append-only log/topic (`spec.md` §4.5).
//! Flushes on every write so a crash after `record()` returns cannot
//! lose an entry the dispatcher has already acted on.

use crate::domain::errors::AuditError;
use crate::domain::ports::{AuditEntry, AuditSink};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
    next_event_id: AtomicU64,
}

impl JsonlAuditSink {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // Touch the file so a fresh deployment has something to tail.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            next_event_id: AtomicU64::new(1),
        })
    }

    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(&entry).map_err(|e| AuditError::WriteFailed {
            reason: e.to_string(),
        })?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AuditError::WriteFailed {
                reason: e.to_string(),
            })?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AuditError::WriteFailed {
                reason: e.to_string(),
            })?;
        file.write_all(b"\n").await.map_err(|e| AuditError::WriteFailed {
            reason: e.to_string(),
        })?;
        file.flush().await.map_err(|e| AuditError::WriteFailed {
            reason: e.to_string(),
        })?;

        Ok(())
    }

    fn next_event_id(&self) -> u64 {
        JsonlAuditSink::next_event_id(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::AuditKind;
    use chrono::Utc;

    #[tokio::test]
    async fn records_are_appended_as_jsonl() {
        let dir = std::env::temp_dir().join(format!("dispatch-core-audit-test-{}", ulid::Ulid::new()));
        let path = dir.join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).await.unwrap();

        for _ in 0..3 {
            sink.record(AuditEntry {
                event_id: sink.next_event_id(),
                timestamp: Utc::now(),
                kind: AuditKind::Dispatch,
                signal_fingerprint: None,
                order_id: None,
                exchange_order_id: None,
                oco_group_id: None,
                outcome: "executed".into(),
                reason: None,
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 3);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
