//! Declarative object mapping over an embedded property graph.
//!
//! Domain types implement [`NodeType`] to declare properties, relationship
//! slots, indexing and audit metadata. A [`Database`] turns those
//! declarations into typed [`Instance`] handles over nodes stored in an
//! oxigraph quad store, with per-thread transactions and a reference index of
//! all instances per type.

mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod index;
pub mod instance;
pub mod registry;
pub mod relationship;
pub mod schema;
mod store;
pub mod transaction;
pub mod value;

pub use audit::{AUDIT_FIELDS, CREATED_AT, UPDATED_AT, VERSION};
pub use config::Config;
pub use database::Database;
pub use error::{DeclarationError, Error, Result};
pub use events::{InstanceEvent, LifecycleObserver, ObserverId};
pub use index::{IndexSummary, ReindexReport};
pub use instance::Instance;
pub use relationship::{Edge, RelationshipProxy, Traversal};
pub use schema::{Depth, NodeType, SchemaBuilder};
pub use store::{Direction, EdgeId, NodeId, REFERENCE_NODE};
pub use value::{Value, ValueType};
