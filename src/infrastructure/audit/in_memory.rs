//! In-memory `AuditSink`, for tests: collects entries so assertions can
//! inspect exactly what was written and in what order.

use crate::domain::errors::AuditError;
use crate::domain::ports::{AuditEntry, AuditSink};
use async_trait::async_trait;
use std::sync::Mutex;

pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    next_event_id: Mutex<u64>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_event_id: Mutex::new(1),
        }
    }

    pub fn next_event_id(&self) -> u64 {
        let mut id = self.next_event_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn next_event_id(&self) -> u64 {
        InMemoryAuditSink::next_event_id(self)
    }
}
