//! Closed error taxonomies for the dispatcher subsystem's collaborators.
//!
//! Domain outcomes that are part of normal control flow (duplicate,
//! risk-rejected, lock-denied) live as variants of `DispatchResult`
//! instead — these enums are for collaborator failures the dispatcher
//! has to classify as retriable or terminal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock '{name}' already held by another holder")]
    Denied { name: String },

    #[error("lock store unavailable: {reason}")]
    Transient { reason: String },
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store unavailable: {reason}")]
    Transient { reason: String },

    #[error("record not found: {key}")]
    NotFound { key: String },

    #[error("optimistic concurrency conflict on {key}")]
    Conflict { key: String },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink write failed: {reason}")]
    WriteFailed { reason: String },
}

/// Outcome of a single call to the Exchange Gateway, per `spec.md` §4.6.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rejected by exchange: {reason}")]
    Rejected { reason: String },

    #[error("transient exchange failure: {reason}")]
    Transient { reason: String },

    #[error("order not found: {exchange_order_id}")]
    NotFound { exchange_order_id: String },
}

impl GatewayError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GatewayError::Transient { .. })
    }
}

/// An invariant violation that must not silently corrupt state, e.g. two
/// accepted orders surfacing for the same fingerprint. The affected
/// entity is poisoned; other entities keep being served (`spec.md` §7).
#[derive(Debug, Error)]
#[error("fatal inconsistency on {entity}: {reason}")]
pub struct FatalInconsistency {
    pub entity: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_transient_is_retriable() {
        let err = GatewayError::Transient {
            reason: "timeout".into(),
        };
        assert!(err.is_retriable());
    }

    #[test]
    fn gateway_rejected_is_not_retriable() {
        let err = GatewayError::Rejected {
            reason: "invalid quantity".into(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn fatal_inconsistency_formats_entity_and_reason() {
        let err = FatalInconsistency {
            entity: "order/01ABC".into(),
            reason: "duplicate accepted order".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("01ABC"));
        assert!(msg.contains("duplicate accepted order"));
    }
}
