//! Relationship slots as lazy, queryable collections.
//!
//! A [`RelationshipProxy`] is a cheap description of a traversal: owner,
//! resolved slot, depth and an optional per-edge filter. Nothing is read
//! until it is iterated, and every iteration starts over from the owner.

use crate::audit::{self, AUDIT_FIELDS};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::schema::{Depth, NodeType, ResolvedSlot, Schema};
use crate::store::{Direction, EdgeId, EdgeRecord, Element, NodeId};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

type EdgeFilter = Arc<dyn Fn(&Edge) -> bool + Send + Sync>;

pub struct RelationshipProxy<T, U> {
    owner: Instance<T>,
    slot: Arc<ResolvedSlot>,
    target: Arc<Schema>,
    depth: Depth,
    filter: Option<EdgeFilter>,
    _target: PhantomData<fn() -> U>,
}

impl<T: NodeType, U: NodeType> RelationshipProxy<T, U> {
    pub(crate) fn new(owner: Instance<T>, slot: ResolvedSlot, target: Arc<Schema>) -> Self {
        Self {
            owner,
            depth: slot.depth,
            slot: Arc::new(slot),
            target,
            filter: None,
            _target: PhantomData,
        }
    }

    pub fn owner(&self) -> &Instance<T> {
        &self.owner
    }

    pub fn slot(&self) -> &ResolvedSlot {
        &self.slot
    }

    /// Overrides the slot's declared depth for this proxy.
    pub fn depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Only follows edges accepted by `predicate`. Evaluated during traversal.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Edge) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn iter(&self) -> Traversal<U> {
        let start = self.owner.id();
        Traversal {
            db: self.owner.database().clone(),
            slot: Arc::clone(&self.slot),
            target: Arc::clone(&self.target),
            depth: self.depth,
            filter: self.filter.clone(),
            frontier: VecDeque::from([(start, 0)]),
            cursor: VecDeque::new(),
            cursor_hops: 0,
            visited: HashSet::from([start]),
            _target: PhantomData,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<Instance<U>>> {
        self.iter().collect()
    }

    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        for instance in self.iter() {
            instance?;
            count += 1;
        }
        Ok(count)
    }

    pub fn first(&self) -> Result<Option<Instance<U>>> {
        self.iter().next().transpose()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.first()?.is_none())
    }

    pub fn contains(&self, other: &Instance<U>) -> Result<bool> {
        for instance in self.iter() {
            if instance?.id() == other.id() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The owner's own edges in this slot, after the filter.
    pub fn edges(&self) -> Result<Vec<Edge>> {
        let db = self.owner.database();
        let records = db
            .store()
            .edges(self.owner.id(), self.slot.direction, Some(&self.slot.edge_type))?;
        Ok(records
            .into_iter()
            .map(|record| Edge::new(db.clone(), record, Arc::clone(&self.slot)))
            .filter(|edge| self.filter.as_ref().map_or(true, |accept| accept(edge)))
            .collect())
    }

    pub fn add(&self, other: &Instance<U>) -> Result<Edge> {
        self.add_with(other, &[])
    }

    /// Links `other` into this slot and sets the given edge properties, in
    /// one transaction. Incoming slots store the edge from `other` to the
    /// owner.
    pub fn add_with(&self, other: &Instance<U>, properties: &[(&str, Value)]) -> Result<Edge> {
        let (start, end) = match self.slot.direction {
            Direction::Outgoing => (self.owner.id(), other.id()),
            Direction::Incoming => (other.id(), self.owner.id()),
        };
        let db = self.owner.database();
        db.transaction(|| -> Result<Edge> {
            self.owner.ensure_exists()?;
            other.ensure_exists()?;
            let id = db.store().create_edge(start, end, &self.slot.edge_type)?;
            let edge = Edge::new(
                db.clone(),
                EdgeRecord {
                    id,
                    start,
                    end,
                    label: self.slot.edge_type.clone(),
                },
                Arc::clone(&self.slot),
            );
            for (key, value) in properties {
                edge.set(key, value.clone())?;
            }
            debug!(edge = %id, edge_type = %self.slot.edge_type, %start, %end, "linked");
            Ok(edge)
        })
    }
}

impl<T, U> Clone for RelationshipProxy<T, U> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            slot: Arc::clone(&self.slot),
            target: Arc::clone(&self.target),
            depth: self.depth,
            filter: self.filter.clone(),
            _target: PhantomData,
        }
    }
}

impl<T, U> fmt::Debug for RelationshipProxy<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipProxy")
            .field("owner", &self.owner)
            .field("slot", &self.slot.name)
            .field("edge_type", &self.slot.edge_type)
            .field("depth", &self.depth)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl<'a, T: NodeType, U: NodeType> IntoIterator for &'a RelationshipProxy<T, U> {
    type Item = Result<Instance<U>>;
    type IntoIter = Traversal<U>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Breadth-first walk over one edge type.
///
/// Nodes are yielded in discovery order, each at most once; the owner is
/// never yielded. Edges are pulled one at a time from the node being
/// expanded, so the filter only sees edges up to the last yielded node. A
/// store error ends the walk after it is returned.
pub struct Traversal<U> {
    db: Database,
    slot: Arc<ResolvedSlot>,
    target: Arc<Schema>,
    depth: Depth,
    filter: Option<EdgeFilter>,
    frontier: VecDeque<(NodeId, u32)>,
    // Unvisited edges of the node being expanded, and the hop count of
    // the nodes they lead to.
    cursor: VecDeque<EdgeRecord>,
    cursor_hops: u32,
    visited: HashSet<NodeId>,
    _target: PhantomData<fn() -> U>,
}

impl<U> Traversal<U> {
    fn accepts(&self, record: &EdgeRecord) -> bool {
        match &self.filter {
            Some(accept) => accept(&Edge::new(
                self.db.clone(),
                record.clone(),
                Arc::clone(&self.slot),
            )),
            None => true,
        }
    }

    /// Next accepted, unvisited node, expanding the frontier as needed.
    fn advance(&mut self) -> Result<Option<NodeId>> {
        let direction = self.slot.direction;
        loop {
            while let Some(record) = self.cursor.pop_front() {
                let next = record.far_end(direction);
                if self.visited.contains(&next) || !self.accepts(&record) {
                    continue;
                }
                self.visited.insert(next);
                self.frontier.push_back((next, self.cursor_hops));
                return Ok(Some(next));
            }
            let Some((node, hops)) = self.frontier.pop_front() else {
                return Ok(None);
            };
            if !self.depth.expands(hops) {
                continue;
            }
            self.cursor = self
                .db
                .store()
                .edges(node, direction, Some(&self.slot.edge_type))?
                .into();
            self.cursor_hops = hops.saturating_add(1);
        }
    }
}

impl<U: NodeType> Iterator for Traversal<U> {
    type Item = Result<Instance<U>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(node)) => Some(self.db.wrap::<U>(node, &self.target)),
            Ok(None) => None,
            Err(e) => {
                self.frontier.clear();
                self.cursor.clear();
                Some(Err(e))
            }
        }
    }
}

/// A stored edge seen through the slot that created it.
#[derive(Clone)]
pub struct Edge {
    db: Database,
    record: EdgeRecord,
    slot: Arc<ResolvedSlot>,
}

impl Edge {
    fn new(db: Database, record: EdgeRecord, slot: Arc<ResolvedSlot>) -> Self {
        Self { db, record, slot }
    }

    pub fn id(&self) -> EdgeId {
        self.record.id
    }

    pub fn edge_type(&self) -> &str {
        &self.record.label
    }

    pub fn start_node(&self) -> NodeId {
        self.record.start
    }

    pub fn end_node(&self) -> NodeId {
        self.record.end
    }

    fn element(&self) -> Element {
        Element::Edge(self.record.id)
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let readable = self.slot.edge_property(key).is_some()
            || (self.slot.audits_edges() && AUDIT_FIELDS.contains(&key));
        if !readable {
            return Err(Error::undeclared(
                &self.slot.edge_type,
                format!("edge property `{}`", key),
            ));
        }
        self.db.store().property(self.element(), key)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let def = self.slot.edge_property(key).ok_or_else(|| {
            Error::undeclared(&self.slot.edge_type, format!("edge property `{}`", key))
        })?;
        def.check(&value)?;
        self.db.transaction(|| {
            self.db.store().edge(self.record.id)?;
            self.slot
                .edge_writer
                .write(self.db.store(), self.element(), key, &value)
        })
    }

    fn require_audit(&self) -> Result<()> {
        if self.slot.audits_edges() {
            Ok(())
        } else {
            Err(Error::undeclared(&self.slot.edge_type, "audit metadata"))
        }
    }

    pub fn created_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.require_audit()?;
        audit::timestamp(self.db.store(), self.element(), audit::CREATED_AT)
    }

    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.require_audit()?;
        audit::timestamp(self.db.store(), self.element(), audit::UPDATED_AT)
    }

    pub fn version(&self) -> Result<i64> {
        self.require_audit()?;
        audit::version(self.db.store(), self.element())
    }

    pub fn delete(self) -> Result<()> {
        let id = self.record.id;
        self.db.transaction(|| {
            self.db.store().edge(id)?;
            self.db.store().delete_edge(id)
        })
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Edge({} {} -[{}]-> {})",
            self.record.id, self.record.start, self.record.label, self.record.end
        )
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for Edge {}
