//! Typed handles on stored nodes.

use crate::audit::{self, AUDIT_FIELDS};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::relationship::RelationshipProxy;
use crate::schema::{NodeType, Schema};
use crate::store::{Element, NodeId};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// One node viewed as a `T`.
///
/// Identity, equality, hashing and ordering all follow the node id. The
/// handle holds no property data; every read goes to the store.
pub struct Instance<T> {
    id: NodeId,
    db: Database,
    schema: Arc<Schema>,
    _type: PhantomData<fn() -> T>,
}

impl<T: NodeType> Instance<T> {
    pub(crate) fn new(db: Database, id: NodeId, schema: Arc<Schema>) -> Self {
        Self {
            id,
            db,
            schema,
            _type: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn element(&self) -> Element {
        Element::Node(self.id)
    }

    /// Reads a declared property, or an audit field on audited types.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let readable = self.schema.property(key).is_some()
            || (self.schema.is_audited() && AUDIT_FIELDS.contains(&key));
        if !readable {
            return Err(Error::undeclared(T::NAME, format!("property `{}`", key)));
        }
        self.db.store().property(self.element(), key)
    }

    /// Writes a declared property through the type's writer chain.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let def = self
            .schema
            .property(key)
            .ok_or_else(|| Error::undeclared(T::NAME, format!("property `{}`", key)))?;
        def.check(&value)?;
        self.db.transaction(|| {
            self.ensure_exists()?;
            self.schema
                .writer()
                .write(self.db.store(), self.element(), key, &value)
        })
    }

    /// Clears a declared property. Returns whether a value was present;
    /// on audited types only an actual removal counts as a write.
    pub fn remove(&self, key: &str) -> Result<bool> {
        if self.schema.property(key).is_none() {
            return Err(Error::undeclared(T::NAME, format!("property `{}`", key)));
        }
        self.db.transaction(|| {
            self.ensure_exists()?;
            self.schema
                .writer()
                .clear(self.db.store(), self.element(), key)
        })
    }

    /// Fails with [`Error::NodeNotFound`] once the node has been deleted,
    /// possibly through another handle.
    pub(crate) fn ensure_exists(&self) -> Result<()> {
        if self.db.store().node_exists(self.id)? {
            Ok(())
        } else {
            Err(Error::NodeNotFound {
                id: self.id,
                type_name: T::NAME.to_string(),
            })
        }
    }

    fn require_audit(&self) -> Result<()> {
        if self.schema.is_audited() {
            Ok(())
        } else {
            Err(Error::undeclared(T::NAME, "audit metadata"))
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

    /// The relationship declared as `slot`, whose far end must be a `U`.
    pub fn rel<U: NodeType>(&self, slot: &str) -> Result<RelationshipProxy<T, U>> {
        let resolved = self.schema.resolve_slot(slot, self.db.types())?;
        if resolved.target != U::NAME {
            return Err(Error::undeclared(
                T::NAME,
                format!("relationship slot `{}` to {}", slot, U::NAME),
            ));
        }
        let target = self.db.register::<U>()?;
        Ok(RelationshipProxy::new(self.clone(), resolved, target))
    }

    /// Deletes the node with its index entry and every edge touching it.
    pub fn delete(self) -> Result<()> {
        self.db.transaction(|| {
            self.ensure_exists()?;
            self.db.delete_instance(self.id, &self.schema)
        })
    }

    /// Whether every given property currently holds exactly the given value.
    pub(crate) fn matches(&self, properties: &[(&str, Value)]) -> Result<bool> {
        for (key, expected) in properties {
            if self.get(key)?.as_ref() != Some(expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<T> Clone for Instance<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            db: self.db.clone(),
            schema: Arc::clone(&self.schema),
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.schema.name(), self.id)
    }
}

impl<T> PartialEq for Instance<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Instance<T> {}

impl<T> Hash for Instance<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> PartialOrd for Instance<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Instance<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}
