//! Reentrant, thread-scoped transactions.
//!
//! Each thread holds at most one open transaction per store. Nested `run`
//! calls join it; only the outermost scope commits or rolls back. Writes are
//! buffered in a [`Pending`] set and reach the store together at commit.

use crate::error::{Error, Result};
use crate::store::GraphStore;
use oxigraph::model::Quad;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

thread_local! {
    static SCOPES: RefCell<HashMap<Uuid, Scope>> = RefCell::new(HashMap::new());
}

/// Writes buffered by an open transaction.
///
/// Commit applies every removal before any insertion, so removing and then
/// re-inserting an equal quad leaves it stored.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    inserted: Vec<Quad>,
    inserted_set: HashSet<Quad>,
    removed: HashSet<Quad>,
}

impl Pending {
    pub(crate) fn insert(&mut self, quad: Quad) {
        if self.inserted_set.insert(quad.clone()) {
            self.inserted.push(quad);
        }
    }

    pub(crate) fn remove(&mut self, quad: Quad) {
        if self.inserted_set.remove(&quad) {
            self.inserted.retain(|q| q != &quad);
        }
        self.removed.insert(quad);
    }

    pub(crate) fn is_removed(&self, quad: &Quad) -> bool {
        self.removed.contains(quad)
    }

    pub(crate) fn inserted(&self) -> impl Iterator<Item = &Quad> {
        self.inserted.iter()
    }

    pub(crate) fn removed(&self) -> impl Iterator<Item = &Quad> {
        self.removed.iter()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
struct Scope {
    depth: usize,
    rollback_only: bool,
    pending: Pending,
}

/// Runs `f` against the calling thread's pending writes for `store`, or
/// `None` outside a transaction.
pub(crate) fn with_pending<R>(store: Uuid, f: impl FnOnce(Option<&Pending>) -> R) -> R {
    SCOPES.with(|scopes| f(scopes.borrow().get(&store).map(|scope| &scope.pending)))
}

pub(crate) fn with_pending_mut<R>(store: Uuid, f: impl FnOnce(&mut Pending) -> R) -> Result<R> {
    SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        let scope = scopes.get_mut(&store).ok_or(Error::NoActiveTransaction)?;
        Ok(f(&mut scope.pending))
    })
}

fn take_scope(store: Uuid) -> Option<Scope> {
    SCOPES.with(|scopes| scopes.borrow_mut().remove(&store))
}

/// Discards the top-level scope if `work` unwinds.
struct ScopeGuard {
    store: Uuid,
    armed: bool,
}

impl ScopeGuard {
    fn finish(mut self) -> Scope {
        self.armed = false;
        take_scope(self.store).unwrap_or_default()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.armed && take_scope(self.store).is_some() {
            warn!(store = %self.store, "transaction discarded during unwind");
        }
    }
}

pub struct TransactionManager {
    store: Arc<GraphStore>,
}

impl TransactionManager {
    pub(crate) fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    /// Whether the calling thread has an open transaction on this store.
    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }

    /// Nesting depth of the calling thread's transaction (0 when none).
    pub fn depth(&self) -> usize {
        let key = self.store.id();
        SCOPES.with(|scopes| scopes.borrow().get(&key).map_or(0, |scope| scope.depth))
    }

    /// Runs `work` inside a transaction.
    ///
    /// Joins the calling thread's open transaction if there is one; otherwise
    /// opens a new one that commits when `work` returns `Ok` and is discarded
    /// when it returns `Err`. Errors from `work` are returned unchanged. A
    /// failure in a nested scope dooms the whole transaction: if an outer
    /// scope swallows it, the commit turns into [`Error::RollbackOnly`].
    pub fn run<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<Error>,
    {
        let key = self.store.id();
        let joined = SCOPES.with(|scopes| match scopes.borrow_mut().get_mut(&key) {
            Some(scope) => {
                scope.depth += 1;
                true
            }
            None => false,
        });

        if joined {
            let result = work();
            SCOPES.with(|scopes| {
                if let Some(scope) = scopes.borrow_mut().get_mut(&key) {
                    scope.depth -= 1;
                    if result.is_err() {
                        scope.rollback_only = true;
                    }
                }
            });
            return result;
        }

        SCOPES.with(|scopes| {
            scopes.borrow_mut().insert(
                key,
                Scope {
                    depth: 1,
                    ..Scope::default()
                },
            )
        });
        let guard = ScopeGuard {
            store: key,
            armed: true,
        };
        let result = work();
        let scope = guard.finish();

        match result {
            Ok(value) if !scope.rollback_only => {
                self.store.commit(scope.pending)?;
                Ok(value)
            }
            Ok(_) => {
                warn!(store = %key, "rolling back transaction after a nested failure");
                Err(Error::RollbackOnly.into())
            }
            Err(e) => {
                debug!(store = %key, "transaction rolled back");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Element, NodeId};
    use crate::value::Value;

    fn manager() -> (Arc<GraphStore>, TransactionManager) {
        let store = Arc::new(GraphStore::in_memory().unwrap());
        (store.clone(), TransactionManager::new(store))
    }

    fn name(store: &GraphStore, node: NodeId) -> Option<Value> {
        store.property(Element::Node(node), "name").unwrap()
    }

    #[test]
    fn test_nested_scopes_share_one_commit() -> Result<()> {
        let (store, tx) = manager();
        let node = tx.run(|| -> Result<_> {
            assert_eq!(tx.depth(), 1);
            let node = store.create_node()?;
            tx.run(|| -> Result<()> {
                assert_eq!(tx.depth(), 2);
                store.set_property(Element::Node(node), "name", &Value::from("inner"))
            })?;
            // Visible inside the transaction, not yet committed.
            assert_eq!(name(&store, node), Some(Value::from("inner")));
            Ok(node)
        })?;
        assert!(!tx.is_active());
        assert!(store.node_exists(node)?);
        assert_eq!(name(&store, node), Some(Value::from("inner")));
        Ok(())
    }

    #[test]
    fn test_error_is_returned_unchanged_and_discards_writes() -> Result<()> {
        let (store, tx) = manager();
        let node = tx.run(|| store.create_node())?;

        let err = tx
            .run(|| -> Result<(), Error> {
                store.set_property(Element::Node(node), "name", &Value::from("lost"))?;
                Err(Error::IndexNotStarted)
            })
            .unwrap_err();
        assert!(matches!(err, Error::IndexNotStarted));
        assert_eq!(name(&store, node), None);
        Ok(())
    }

    #[test]
    fn test_swallowed_nested_failure_rolls_back_everything() -> Result<()> {
        let (store, tx) = manager();
        let node = tx.run(|| store.create_node())?;

        let result = tx.run(|| -> Result<()> {
            store.set_property(Element::Node(node), "name", &Value::from("outer"))?;
            let inner: Result<()> = tx.run(|| Err(Error::IndexNotStarted));
            assert!(inner.is_err());
            Ok(())
        });
        assert!(matches!(result, Err(Error::RollbackOnly)));
        assert_eq!(name(&store, node), None);
        Ok(())
    }

    #[test]
    fn test_panic_discards_transaction() {
        let (store, tx) = manager();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = tx.run(|| -> Result<()> {
                store.create_node()?;
                panic!("boom");
            });
        }));
        assert!(outcome.is_err());
        assert!(!tx.is_active());
        assert_eq!(store.nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_custom_error_types_pass_through() {
        #[derive(Debug, PartialEq)]
        enum AppError {
            Store,
            Rejected,
        }
        impl From<Error> for AppError {
            fn from(_: Error) -> Self {
                AppError::Store
            }
        }

        let (store, tx) = manager();
        let result: Result<NodeId, AppError> = tx.run(|| {
            store.create_node()?;
            Err(AppError::Rejected)
        });
        assert_eq!(result, Err(AppError::Rejected));
    }
}
