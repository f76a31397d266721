//! Reference index: one root node linked to every live indexed instance.
//!
//! The root hangs off the store's reference node through an `index_root`
//! edge, so it is found again structurally after a restart. Index edges are
//! typed by the instance's root-type name. There is no secondary structure:
//! queries scan the root's edges.

use crate::database::Database;
use crate::error::{Error, Result};
use crate::events::{InstanceEvent, LifecycleObserver, ObserverId};
use crate::schema::Schema;
use crate::store::{Direction, GraphStore, NodeId, REFERENCE_NODE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Edge type from the reference node to the index root.
pub const INDEX_ROOT_EDGE: &str = "index_root";

#[derive(Debug, Clone, Copy)]
struct Running {
    root: NodeId,
    observer: ObserverId,
}

#[derive(Debug, Default)]
pub struct IndexRegistry {
    state: Mutex<Option<Running>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    /// Instances whose index edge was recreated.
    pub reindexed: usize,
    /// Nodes without a resolvable type tag, or that failed to reindex.
    pub skipped: usize,
    /// Instances of registered types that do not opt into indexing.
    pub unindexed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub root: NodeId,
    /// Index edge count per root-type name.
    pub counts: BTreeMap<String, usize>,
}

enum Sweep {
    Reindexed,
    Unindexed,
    Skipped,
}

struct IndexObserver {
    root: NodeId,
}

impl LifecycleObserver for IndexObserver {
    fn on_created(&self, db: &Database, event: InstanceEvent<'_>) -> Result<()> {
        if event.node == self.root || !event.schema.is_indexed() {
            return Ok(());
        }
        db.store()
            .create_edge(self.root, event.node, event.schema.root_name())?;
        Ok(())
    }

    fn on_deleted(&self, db: &Database, event: InstanceEvent<'_>) -> Result<()> {
        unlink(db.store(), self.root, event.node)
    }
}

fn unlink(store: &GraphStore, root: NodeId, node: NodeId) -> Result<()> {
    for record in store.edges(node, Direction::Incoming, None)? {
        if record.start == root {
            store.delete_edge(record.id)?;
        }
    }
    Ok(())
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locates the root node (creating it on a fresh store) and starts
    /// linking new instances to it.
    ///
    /// The root must be committed before it is remembered, so starting a
    /// stopped index inside an open transaction fails with
    /// [`Error::TransactionActive`].
    pub fn start(&self, db: &Database) -> Result<NodeId> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = *state {
            return Ok(running.root);
        }
        if db.transactions().is_active() {
            return Err(Error::TransactionActive("starting the reference index"));
        }

        let root = db.transaction(|| -> Result<NodeId> {
            let store = db.store();
            let existing = store.edges(REFERENCE_NODE, Direction::Outgoing, Some(INDEX_ROOT_EDGE))?;
            if let Some(edge) = existing.first() {
                return Ok(edge.end);
            }
            let root = store.create_node()?;
            store.create_edge(REFERENCE_NODE, root, INDEX_ROOT_EDGE)?;
            info!(%root, "created reference index root");
            Ok(root)
        })?;

        let observer = db.observers().add(Arc::new(IndexObserver { root }));
        *state = Some(Running { root, observer });
        info!(%root, "reference index started");
        Ok(root)
    }

    pub fn stop(&self, db: &Database) {
        let running = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            db.observers().remove(running.observer);
            info!(root = %running.root, "reference index stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn root(&self) -> Result<NodeId> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|running| running.root)
            .ok_or(Error::IndexNotStarted)
    }

    /// Ids of every instance indexed under `root_name`, ascending.
    pub fn instances(&self, db: &Database, root_name: &str) -> Result<Vec<NodeId>> {
        let root = self.root()?;
        let mut ids: Vec<NodeId> = db
            .store()
            .edges(root, Direction::Outgoing, Some(root_name))?
            .into_iter()
            .map(|record| record.end)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    pub fn summary(&self, db: &Database) -> Result<IndexSummary> {
        let root = self.root()?;
        let mut counts = BTreeMap::new();
        for record in db.store().edges(root, Direction::Outgoing, None)? {
            *counts.entry(record.label).or_insert(0) += 1;
        }
        Ok(IndexSummary { root, counts })
    }

    /// Recreates the index edge of every tagged node.
    ///
    /// Best effort: nodes with a missing or unregistered type tag, and nodes
    /// whose rewrite fails, are logged and counted as skipped. Each node is
    /// rewritten in its own transaction, unless the sweep itself runs inside
    /// one.
    pub fn reindex(&self, db: &Database) -> Result<ReindexReport> {
        let root = self.root()?;
        let mut report = ReindexReport::default();

        for node in db.store().nodes()? {
            if node == REFERENCE_NODE || node == root {
                continue;
            }
            match self.sweep_node(db, root, node) {
                Ok(Sweep::Reindexed) => report.reindexed += 1,
                Ok(Sweep::Unindexed) => report.unindexed += 1,
                Ok(Sweep::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(%node, error = %e, "skipping node that failed to reindex");
                    report.skipped += 1;
                }
            }
        }

        info!(
            reindexed = report.reindexed,
            skipped = report.skipped,
            unindexed = report.unindexed,
            "reindex sweep finished"
        );
        Ok(report)
    }

    fn sweep_node(&self, db: &Database, root: NodeId, node: NodeId) -> Result<Sweep> {
        let store = db.store();
        let schema: Arc<Schema> = match store.type_tag(node)? {
            Some(tag) => match db.types().get(&tag) {
                Some(schema) => schema,
                None => {
                    warn!(%node, type_tag = %tag, "skipping node with unregistered type tag");
                    return Ok(Sweep::Skipped);
                }
            },
            None => {
                warn!(%node, "skipping node without type tag");
                return Ok(Sweep::Skipped);
            }
        };
        if !schema.is_indexed() {
            return Ok(Sweep::Unindexed);
        }

        db.transaction(|| -> Result<()> {
            unlink(store, root, node)?;
            store.create_edge(root, node, schema.root_name())?;
            Ok(())
        })?;
        Ok(Sweep::Reindexed)
    }
}
