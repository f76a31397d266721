//! Instance lifecycle observers.
//!
//! Observers run synchronously, in registration order, inside the transaction
//! that creates or deletes the instance. An observer error aborts that
//! transaction.

use crate::database::Database;
use crate::error::Result;
use crate::schema::Schema;
use crate::store::NodeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy)]
pub struct InstanceEvent<'a> {
    pub node: NodeId,
    pub schema: &'a Schema,
}

pub trait LifecycleObserver: Send + Sync {
    fn on_created(&self, _db: &Database, _event: InstanceEvent<'_>) -> Result<()> {
        Ok(())
    }

    fn on_deleted(&self, _db: &Database, _event: InstanceEvent<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    list: RwLock<Vec<(ObserverId, Arc<dyn LifecycleObserver>)>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn LifecycleObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Returns whether the observer was registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut list = self.list.write().unwrap_or_else(PoisonError::into_inner);
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.list.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Callbacks run on a snapshot so they may add or remove observers.
    fn snapshot(&self) -> Vec<Arc<dyn LifecycleObserver>> {
        self.list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    pub(crate) fn created(&self, db: &Database, event: InstanceEvent<'_>) -> Result<()> {
        self.snapshot()
            .iter()
            .try_for_each(|observer| observer.on_created(db, event))
    }

    pub(crate) fn deleted(&self, db: &Database, event: InstanceEvent<'_>) -> Result<()> {
        self.snapshot()
            .iter()
            .try_for_each(|observer| observer.on_deleted(db, event))
    }
}
