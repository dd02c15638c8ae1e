//! Call-chain context carrying active transactions.
//!
//! A [`TxContext`] is an immutable association list from coordinator to
//! transaction handle. Binding or clearing a transaction produces a new
//! context and leaves the old one untouched; clones share handles by
//! reference, so nested scopes and sibling threads all observe the same
//! handle state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::transaction::handle::TxHandle;

/// Identity of a coordinator; keys its binding inside a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoordinatorId(Ulid);

impl CoordinatorId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for CoordinatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// Identity of one real transaction, for logs and trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Ulid);

impl TransactionId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

struct Binding<T> {
    owner: CoordinatorId,
    handle: Arc<TxHandle<T>>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            handle: Arc::clone(&self.handle),
        }
    }
}

/// Transaction context threaded through a call chain.
///
/// `T` is the driver's transaction type. An empty context means "no active
/// transaction here". Each coordinator only sees its own binding, so several
/// coordinators over the same driver type can share one context.
pub struct TxContext<T> {
    bindings: Arc<[Binding<T>]>,
}

impl<T> TxContext<T> {
    /// An empty context.
    pub fn new() -> Self {
        Self {
            bindings: Arc::from(Vec::new()),
        }
    }

    /// True if no coordinator has bound anything here.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Coordinators with a binding in this context.
    pub fn owners(&self) -> impl Iterator<Item = CoordinatorId> + '_ {
        self.bindings.iter().map(|b| b.owner)
    }

    pub(crate) fn handle(&self, owner: CoordinatorId) -> Option<&Arc<TxHandle<T>>> {
        self.bindings
            .iter()
            .find(|b| b.owner == owner)
            .map(|b| &b.handle)
    }

    /// New context with `handle` bound for `owner`, replacing any previous
    /// binding of that owner.
    pub(crate) fn bind(&self, owner: CoordinatorId, handle: Arc<TxHandle<T>>) -> Self {
        let mut bindings: Vec<_> = self
            .bindings
            .iter()
            .filter(|b| b.owner != owner)
            .cloned()
            .collect();
        bindings.push(Binding { owner, handle });
        Self {
            bindings: bindings.into(),
        }
    }

    /// New context without a binding for `owner`.
    pub(crate) fn unbind(&self, owner: CoordinatorId) -> Self {
        let bindings: Vec<_> = self
            .bindings
            .iter()
            .filter(|b| b.owner != owner)
            .cloned()
            .collect();
        Self {
            bindings: bindings.into(),
        }
    }
}

impl<T> Clone for TxContext<T> {
    fn clone(&self) -> Self {
        Self {
            bindings: Arc::clone(&self.bindings),
        }
    }
}

impl<T> Default for TxContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TxContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.bindings.iter().map(|b| (b.owner, b.handle.id())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::handle::Origin;

    fn handle() -> Arc<TxHandle<()>> {
        Arc::new(TxHandle::new(TransactionId::generate(), (), Origin::Begun))
    }

    #[test]
    fn test_bind_leaves_original_untouched() {
        let owner = CoordinatorId::generate();
        let empty = TxContext::new();

        let bound = empty.bind(owner, handle());

        assert!(empty.is_empty());
        assert!(empty.handle(owner).is_none());
        assert!(bound.handle(owner).is_some());
        assert!(bound.unbind(owner).handle(owner).is_none());
        assert!(bound.handle(owner).is_some());
    }

    #[test]
    fn test_clones_share_handle() {
        let owner = CoordinatorId::generate();
        let ctx = TxContext::new().bind(owner, handle());
        let copy = ctx.clone();

        assert!(Arc::ptr_eq(
            ctx.handle(owner).unwrap(),
            copy.handle(owner).unwrap()
        ));
    }

    #[test]
    fn test_owners_do_not_collide() {
        let a = CoordinatorId::generate();
        let b = CoordinatorId::generate();
        assert_ne!(a, b);

        let ctx = TxContext::new().bind(a, handle()).bind(b, handle());
        assert_eq!(ctx.owners().count(), 2);
        assert!(!Arc::ptr_eq(ctx.handle(a).unwrap(), ctx.handle(b).unwrap()));

        let only_b = ctx.unbind(a);
        assert!(only_b.handle(a).is_none());
        assert!(only_b.handle(b).is_some());
    }

    #[test]
    fn test_rebind_replaces() {
        let owner = CoordinatorId::generate();
        let first = handle();
        let second = handle();

        let ctx = TxContext::new().bind(owner, first).bind(owner, Arc::clone(&second));
        assert_eq!(ctx.owners().count(), 1);
        assert!(Arc::ptr_eq(ctx.handle(owner).unwrap(), &second));
    }
}
