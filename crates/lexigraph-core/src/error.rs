//! Error types for the mapping layer.

use crate::store::{EdgeId, NodeId};
use crate::value::ValueType;
use oxigraph::store::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while a type is being declared.
///
/// These fail eagerly at registration, before any instance of the type exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error("{type_name}: duplicate relationship slot `{slot}`")]
    DuplicateSlot { type_name: String, slot: String },

    #[error("{type_name}: duplicate property `{property}`")]
    DuplicateProperty { type_name: String, property: String },

    #[error("{type_name}: traversal depth {depth} is neither non-negative nor unbounded")]
    InvalidDepth { type_name: String, depth: i64 },

    #[error("{type_name}: `{modifier}` used before any relationship slot was declared")]
    NoSlotDeclared {
        type_name: String,
        modifier: &'static str,
    },

    #[error("{type_name}: `{name}` is not a valid name")]
    InvalidName { type_name: String, name: String },

    #[error("{type_name}: `{name}` is reserved")]
    ReservedName { type_name: String, name: String },

    #[error("{type_name}: `{modifier}` on incoming slot `{slot}` belongs on the outgoing end")]
    InverseSlotModifier {
        type_name: String,
        slot: String,
        modifier: &'static str,
    },

    #[error("{type_name}: incoming slot `{slot}` expects {target}.{via} to be an outgoing slot to {type_name}")]
    UnresolvedInverse {
        type_name: String,
        slot: String,
        target: String,
        via: String,
    },
}

/// Errors returned by the mapping layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("node {id} not found as {type_name}")]
    NodeNotFound { id: NodeId, type_name: String },

    #[error("edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("{type_name} does not declare {capability}")]
    UndeclaredCapability {
        type_name: String,
        capability: String,
    },

    #[error("`{key}` expects a {expected} value, got {actual}")]
    TypeMismatch {
        key: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("stored value for `{key}` is malformed: {reason}")]
    CorruptValue { key: String, reason: String },

    #[error("node {0} already carries a type tag")]
    TypeTagAlreadySet(NodeId),

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("transaction rolled back: a nested scope failed")]
    RollbackOnly,

    #[error("{0} is not allowed inside an open transaction")]
    TransactionActive(&'static str),

    #[error("reference index is not started")]
    IndexNotStarted,

    #[error("on-disk storage at {0} requires the `rocksdb` feature")]
    PersistenceUnavailable(PathBuf),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub fn undeclared(type_name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::UndeclaredCapability {
            type_name: type_name.into(),
            capability: capability.into(),
        }
    }

    /// True for the NotFound conditions (missing node or edge, or a node whose
    /// type tag does not match the requested type).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NodeNotFound { .. } | Self::EdgeNotFound(_))
    }
}

/// Result type for mapping-layer operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
