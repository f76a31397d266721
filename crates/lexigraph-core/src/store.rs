//! Embedded property graph over an oxigraph quad store.
//!
//! Nodes, edges and properties are encoded as quads in the default graph:
//!
//! - a node is `<urn:lexigraph:node:N> rdf:type <urn:lexigraph:Node>`
//! - an edge is its own subject `<urn:lexigraph:edge:N>` carrying `start`,
//!   `end` and `label` quads, so that edges can hold properties too
//! - a property is `<element> <urn:lexigraph:prop:KEY> "literal"`
//!
//! Reads go through the calling thread's pending transaction (if any) so a
//! transaction always sees its own writes. Writes are only accepted inside a
//! transaction and reach the store at commit.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transaction::{self, Pending};
use crate::value::Value;
use oxigraph::model::vocab::rdf;
use oxigraph::model::{
    GraphName, GraphNameRef, Literal, NamedNode, Quad, Subject, SubjectRef, Term,
};
use oxigraph::store::{StorageError, Store};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

const NODE_PREFIX: &str = "urn:lexigraph:node:";
const EDGE_PREFIX: &str = "urn:lexigraph:edge:";
const PROP_PREFIX: &str = "urn:lexigraph:prop:";
const NODE_CLASS: &str = "urn:lexigraph:Node";
const EDGE_CLASS: &str = "urn:lexigraph:Edge";
const EDGE_START: &str = "urn:lexigraph:start";
const EDGE_END: &str = "urn:lexigraph:end";
const EDGE_LABEL: &str = "urn:lexigraph:label";
const TYPE_TAG: &str = "urn:lexigraph:type";

/// The store's top-level entry point. It always exists.
pub const REFERENCE_NODE: NodeId = NodeId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that can carry properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    Node(NodeId),
    Edge(EdgeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Endpoints and type of one stored edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub start: NodeId,
    pub end: NodeId,
    pub label: String,
}

impl EdgeRecord {
    /// The endpoint reached when walking this edge in `direction`.
    pub fn far_end(&self, direction: Direction) -> NodeId {
        match direction {
            Direction::Outgoing => self.end,
            Direction::Incoming => self.start,
        }
    }
}

pub struct GraphStore {
    store: Store,
    id: Uuid,
    next_id: AtomicU64,
    storage_path: Option<PathBuf>,
}

impl GraphStore {
    pub fn open(config: &Config) -> Result<Self> {
        match config.store_dir() {
            Some(path) => {
                let store = Self::open_on_disk(&path)?;
                Self::from_store(store, Some(path))
            }
            None => Self::in_memory(),
        }
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_store(Store::new()?, None)
    }

    #[cfg(feature = "rocksdb")]
    fn open_on_disk(path: &Path) -> Result<Store> {
        std::fs::create_dir_all(path)?;
        Ok(Store::open(path)?)
    }

    #[cfg(not(feature = "rocksdb"))]
    fn open_on_disk(path: &Path) -> Result<Store> {
        Err(Error::PersistenceUnavailable(path.to_path_buf()))
    }

    fn from_store(store: Store, storage_path: Option<PathBuf>) -> Result<Self> {
        let graph = Self {
            store,
            id: Uuid::new_v4(),
            next_id: AtomicU64::new(1),
            storage_path,
        };
        let next_id = graph.highest_id()? + 1;
        graph.next_id.store(next_id, Ordering::SeqCst);

        let reference = class_quad(node_iri(REFERENCE_NODE), NODE_CLASS);
        if !graph.store.contains(&reference)? {
            graph.store.insert(&reference)?;
        }

        info!(store = %graph.id, next_id, path = ?graph.storage_path, "graph store opened");
        Ok(graph)
    }

    /// Identity of this store handle; keys per-thread transaction state.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    fn highest_id(&self) -> Result<u64> {
        let mut highest = 0;
        for class in [NODE_CLASS, EDGE_CLASS] {
            let class = Term::NamedNode(NamedNode::new_unchecked(class));
            for quad in self.store.quads_for_pattern(
                None,
                Some(rdf::TYPE),
                Some(class.as_ref()),
                Some(GraphNameRef::DefaultGraph),
            ) {
                if let Subject::NamedNode(subject) = quad?.subject {
                    let id = parse_id(subject.as_str(), NODE_PREFIX)
                        .or_else(|| parse_id(subject.as_str(), EDGE_PREFIX));
                    highest = highest.max(id.unwrap_or(0));
                }
            }
        }
        Ok(highest)
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Quads matching the pattern, as seen by the calling thread.
    fn matching(
        &self,
        subject: Option<&NamedNode>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
    ) -> Result<Vec<Quad>> {
        transaction::with_pending(self.id, |pending| -> Result<Vec<Quad>> {
            let mut quads = Vec::new();
            for quad in self.store.quads_for_pattern(
                subject.map(|s| SubjectRef::from(s.as_ref())),
                predicate.map(NamedNode::as_ref),
                object.map(Term::as_ref),
                Some(GraphNameRef::DefaultGraph),
            ) {
                let quad = quad?;
                if pending.map_or(true, |p| !p.is_removed(&quad)) {
                    quads.push(quad);
                }
            }
            if let Some(pending) = pending {
                for quad in pending.inserted() {
                    if matches_pattern(quad, subject, predicate, object) && !quads.contains(quad) {
                        quads.push(quad.clone());
                    }
                }
            }
            Ok(quads)
        })
    }

    fn insert(&self, quad: Quad) -> Result<()> {
        transaction::with_pending_mut(self.id, |pending| pending.insert(quad))
    }

    fn remove(&self, quad: Quad) -> Result<()> {
        transaction::with_pending_mut(self.id, |pending| pending.remove(quad))
    }

    fn remove_subject(&self, subject: &NamedNode) -> Result<()> {
        for quad in self.matching(Some(subject), None, None)? {
            self.remove(quad)?;
        }
        Ok(())
    }

    /// Applies a finished transaction's writes atomically.
    pub(crate) fn commit(&self, pending: Pending) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        self.store.transaction(|mut transaction| {
            for quad in pending.removed() {
                transaction.remove(quad)?;
            }
            for quad in pending.inserted() {
                transaction.insert(quad)?;
            }
            Ok::<_, StorageError>(())
        })?;
        debug!(
            store = %self.id,
            inserted = pending.inserted().count(),
            removed = pending.removed().count(),
            "transaction committed"
        );
        Ok(())
    }

    pub fn create_node(&self) -> Result<NodeId> {
        let id = NodeId(self.allocate());
        self.insert(class_quad(node_iri(id), NODE_CLASS))?;
        Ok(id)
    }

    pub fn node_exists(&self, id: NodeId) -> Result<bool> {
        let class = Term::NamedNode(NamedNode::new_unchecked(NODE_CLASS));
        let found = self.matching(Some(&node_iri(id)), Some(&rdf::TYPE.into_owned()), Some(&class))?;
        Ok(!found.is_empty())
    }

    /// All nodes, ordered by id. Includes the reference node.
    pub fn nodes(&self) -> Result<Vec<NodeId>> {
        let class = Term::NamedNode(NamedNode::new_unchecked(NODE_CLASS));
        let mut ids: Vec<NodeId> = self
            .matching(None, Some(&rdf::TYPE.into_owned()), Some(&class))?
            .into_iter()
            .filter_map(|quad| match quad.subject {
                Subject::NamedNode(n) => parse_id(n.as_str(), NODE_PREFIX).map(NodeId),
                _ => None,
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn type_tag(&self, id: NodeId) -> Result<Option<String>> {
        let quads = self.matching(Some(&node_iri(id)), Some(&named(TYPE_TAG)), None)?;
        Ok(quads.into_iter().find_map(|quad| match quad.object {
            Term::Literal(literal) => Some(literal.value().to_string()),
            _ => None,
        }))
    }

    /// Stamps the node's type tag. A tag is never reassigned.
    pub fn set_type_tag(&self, id: NodeId, type_name: &str) -> Result<()> {
        if self.type_tag(id)?.is_some() {
            return Err(Error::TypeTagAlreadySet(id));
        }
        self.insert(Quad::new(
            node_iri(id),
            named(TYPE_TAG),
            Literal::new_simple_literal(type_name),
            GraphName::DefaultGraph,
        ))
    }

    pub fn property(&self, element: Element, key: &str) -> Result<Option<Value>> {
        let quads = self.matching(Some(&element_iri(element)), Some(&prop_iri(key)), None)?;
        match quads.first().map(|quad| &quad.object) {
            Some(Term::Literal(literal)) => Value::from_literal(key, literal).map(Some),
            Some(other) => Err(Error::CorruptValue {
                key: key.to_string(),
                reason: format!("expected a literal, found {}", other),
            }),
            None => Ok(None),
        }
    }

    pub fn set_property(&self, element: Element, key: &str, value: &Value) -> Result<()> {
        let subject = element_iri(element);
        let predicate = prop_iri(key);
        for quad in self.matching(Some(&subject), Some(&predicate), None)? {
            self.remove(quad)?;
        }
        self.insert(Quad::new(
            subject,
            predicate,
            value.to_literal(),
            GraphName::DefaultGraph,
        ))
    }

    /// Returns whether a value was present.
    pub fn remove_property(&self, element: Element, key: &str) -> Result<bool> {
        let quads = self.matching(Some(&element_iri(element)), Some(&prop_iri(key)), None)?;
        let existed = !quads.is_empty();
        for quad in quads {
            self.remove(quad)?;
        }
        Ok(existed)
    }

    pub fn create_edge(&self, start: NodeId, end: NodeId, label: &str) -> Result<EdgeId> {
        let id = EdgeId(self.allocate());
        let edge = edge_iri(id);
        self.insert(class_quad(edge.clone(), EDGE_CLASS))?;
        self.insert(Quad::new(edge.clone(), named(EDGE_START), node_iri(start), GraphName::DefaultGraph))?;
        self.insert(Quad::new(edge.clone(), named(EDGE_END), node_iri(end), GraphName::DefaultGraph))?;
        self.insert(Quad::new(
            edge,
            named(EDGE_LABEL),
            Literal::new_simple_literal(label),
            GraphName::DefaultGraph,
        ))?;
        Ok(id)
    }

    pub fn edge(&self, id: EdgeId) -> Result<EdgeRecord> {
        self.edge_record(&edge_iri(id))?
            .ok_or(Error::EdgeNotFound(id))
    }

    fn edge_record(&self, edge: &NamedNode) -> Result<Option<EdgeRecord>> {
        let Some(id) = parse_id(edge.as_str(), EDGE_PREFIX).map(EdgeId) else {
            return Ok(None);
        };
        let (mut start, mut end, mut label) = (None, None, None);
        for quad in self.matching(Some(edge), None, None)? {
            match (quad.predicate.as_str(), quad.object) {
                (EDGE_START, Term::NamedNode(n)) => start = parse_id(n.as_str(), NODE_PREFIX).map(NodeId),
                (EDGE_END, Term::NamedNode(n)) => end = parse_id(n.as_str(), NODE_PREFIX).map(NodeId),
                (EDGE_LABEL, Term::Literal(l)) => label = Some(l.value().to_string()),
                _ => {}
            }
        }
        Ok(match (start, end, label) {
            (Some(start), Some(end), Some(label)) => Some(EdgeRecord {
                id,
                start,
                end,
                label,
            }),
            _ => None,
        })
    }

    /// Edges attached to `node` in `direction`, optionally of one type,
    /// ordered by edge id.
    pub fn edges(
        &self,
        node: NodeId,
        direction: Direction,
        label: Option<&str>,
    ) -> Result<Vec<EdgeRecord>> {
        let predicate = match direction {
            Direction::Outgoing => named(EDGE_START),
            Direction::Incoming => named(EDGE_END),
        };
        let endpoint = Term::NamedNode(node_iri(node));
        let mut records = Vec::new();
        for quad in self.matching(None, Some(&predicate), Some(&endpoint))? {
            let Subject::NamedNode(edge) = &quad.subject else {
                continue;
            };
            if let Some(record) = self.edge_record(edge)? {
                if label.map_or(true, |l| record.label == l) {
                    records.push(record);
                }
            }
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    pub fn delete_edge(&self, id: EdgeId) -> Result<()> {
        self.remove_subject(&edge_iri(id))
    }

    /// Deletes the node, its properties and every attached edge.
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for record in self.edges(id, direction, None)? {
                self.delete_edge(record.id)?;
            }
        }
        self.remove_subject(&node_iri(id))
    }
}

fn named(iri: &str) -> NamedNode {
    NamedNode::new_unchecked(iri)
}

fn node_iri(id: NodeId) -> NamedNode {
    NamedNode::new_unchecked(format!("{}{}", NODE_PREFIX, id.0))
}

fn edge_iri(id: EdgeId) -> NamedNode {
    NamedNode::new_unchecked(format!("{}{}", EDGE_PREFIX, id.0))
}

fn element_iri(element: Element) -> NamedNode {
    match element {
        Element::Node(id) => node_iri(id),
        Element::Edge(id) => edge_iri(id),
    }
}

fn prop_iri(key: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("{}{}", PROP_PREFIX, key))
}

fn class_quad(subject: NamedNode, class: &str) -> Quad {
    Quad::new(subject, rdf::TYPE, named(class), GraphName::DefaultGraph)
}

fn parse_id(iri: &str, prefix: &str) -> Option<u64> {
    iri.strip_prefix(prefix)?.parse().ok()
}

fn matches_pattern(
    quad: &Quad,
    subject: Option<&NamedNode>,
    predicate: Option<&NamedNode>,
    object: Option<&Term>,
) -> bool {
    subject.map_or(true, |s| matches!(&quad.subject, Subject::NamedNode(n) if n == s))
        && predicate.map_or(true, |p| &quad.predicate == p)
        && object.map_or(true, |o| &quad.object == o)
}
