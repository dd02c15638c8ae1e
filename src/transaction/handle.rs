//! Transaction handle: the real transaction plus its savepoint stack.
//!
//! Lifecycle:
//!
//! ```text
//! ABSENT ──begin / adopt──▶ ROOT_ACTIVE ──savepoint──▶ NESTED_ACTIVE
//!                              │   ▲                         │
//!                              │   └──release / rollback to──┘
//!                       commit / rollback
//!                              ▼
//!                          FINALIZED
//! ```
//!
//! A finalized handle has given its transaction back to the driver. Contexts
//! that still reference it treat it as absent.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::transaction::context::{CoordinatorId, TransactionId};
use crate::transaction::statement::SavepointPrefix;

/// How the real transaction came under coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Begun by the coordinator on its connection.
    Begun,
    /// Supplied by the caller through `adopt`.
    Adopted,
}

/// Mutable part of a handle, guarded by the handle's mutex.
pub(crate) struct HandleState<T> {
    /// `None` once finalized.
    pub(crate) tx: Option<T>,
    /// Numbers of the open savepoints, innermost last.
    pub(crate) open: Vec<u64>,
    /// Highest savepoint number ever issued on this handle.
    pub(crate) last_savepoint: u64,
}

impl<T> HandleState<T> {
    pub(crate) fn depth(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.tx.is_none()
    }
}

pub(crate) struct TxHandle<T> {
    id: TransactionId,
    origin: Origin,
    started_at: DateTime<Utc>,
    state: Mutex<HandleState<T>>,
}

impl<T> TxHandle<T> {
    pub(crate) fn new(id: TransactionId, tx: T, origin: Origin) -> Self {
        Self {
            id,
            origin,
            started_at: Utc::now(),
            state: Mutex::new(HandleState {
                tx: Some(tx),
                open: Vec::new(),
                last_savepoint: 0,
            }),
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HandleState<T>> {
        self.state.lock()
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.state.lock().is_finalized()
    }

    /// Snapshot of a live handle.
    pub(crate) fn info(
        &self,
        coordinator: CoordinatorId,
        prefix: &SavepointPrefix,
    ) -> Option<TransactionInfo> {
        let state = self.state.lock();
        if state.is_finalized() {
            return None;
        }

        Some(TransactionInfo {
            id: self.id,
            coordinator,
            origin: self.origin,
            depth: state.depth(),
            savepoints: state
                .open
                .iter()
                .map(|n| prefix.savepoint(*n).as_str().to_string())
                .collect(),
            started_at: self.started_at,
        })
    }
}

/// Point-in-time description of an active transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub coordinator: CoordinatorId,
    pub origin: Origin,
    /// Number of open savepoints.
    pub depth: usize,
    /// Open savepoint names, outermost first.
    pub savepoints: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_root_active() {
        let handle = TxHandle::new(TransactionId::generate(), "tx", Origin::Begun);
        assert!(handle.is_live());

        let info = handle
            .info(CoordinatorId::generate(), &SavepointPrefix::default())
            .unwrap();
        assert_eq!(info.depth, 0);
        assert!(info.savepoints.is_empty());
        assert_eq!(info.origin, Origin::Begun);
    }

    #[test]
    fn test_finalized_handle_has_no_info() {
        let handle = TxHandle::new(TransactionId::generate(), "tx", Origin::Adopted);
        {
            let mut state = handle.lock();
            state.open.push(1);
            state.last_savepoint = 1;
            assert_eq!(state.depth(), 1);
            state.tx.take();
        }

        assert!(!handle.is_live());
        assert!(handle
            .info(CoordinatorId::generate(), &SavepointPrefix::default())
            .is_none());
    }

    #[test]
    fn test_info_serializes() {
        let handle = TxHandle::new(TransactionId::generate(), 0u8, Origin::Adopted);
        handle.lock().open.extend([1, 2]);

        let info = handle
            .info(CoordinatorId::generate(), &SavepointPrefix::default())
            .unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["origin"], "adopted");
        assert_eq!(json["depth"], 2);
        assert_eq!(json["savepoints"], serde_json::json!(["SP1", "SP2"]));
    }
}
