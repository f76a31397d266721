//! The owning context: store handle, transactions, registered types,
//! lifecycle observers and the reference index.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{InstanceEvent, Observers};
use crate::index::{IndexRegistry, IndexSummary, ReindexReport};
use crate::instance::Instance;
use crate::registry::TypeRegistry;
use crate::schema::{NodeType, Schema};
use crate::store::{GraphStore, NodeId};
use crate::transaction::TransactionManager;
use crate::value::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

struct Inner {
    config: Config,
    store: Arc<GraphStore>,
    tx: TransactionManager,
    types: TypeRegistry,
    observers: Observers,
    index: IndexRegistry,
}

/// Cheap to clone; clones share one store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.inner.store.id())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Database {
    /// Opens the configured store and starts the reference index.
    pub fn open(config: Config) -> Result<Self> {
        let store = Arc::new(GraphStore::open(&config)?);
        let db = Self {
            inner: Arc::new(Inner {
                config,
                tx: TransactionManager::new(Arc::clone(&store)),
                store,
                types: TypeRegistry::new(),
                observers: Observers::new(),
                index: IndexRegistry::new(),
            }),
        };
        db.start()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(Config::in_memory())
    }

    /// Starts the reference index. Idempotent; returns the root node.
    pub fn start(&self) -> Result<NodeId> {
        self.inner.index.start(self)
    }

    /// Detaches the reference index. The root node stays in the store.
    pub fn stop(&self) {
        self.inner.index.stop(self)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn store(&self) -> &GraphStore {
        &self.inner.store
    }

    /// Directory of the on-disk store, `None` when in memory.
    pub fn storage_path(&self) -> Option<&Path> {
        self.inner.store.storage_path()
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.tx
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.inner.types
    }

    pub fn observers(&self) -> &Observers {
        &self.inner.observers
    }

    pub fn index(&self) -> &IndexRegistry {
        &self.inner.index
    }

    /// See [`TransactionManager::run`].
    pub fn transaction<T, E>(&self, work: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<Error>,
    {
        self.inner.tx.run(work)
    }

    pub fn register<T: NodeType>(&self) -> Result<Arc<Schema>> {
        self.inner.types.register::<T>()
    }

    /// Creates an instance of `T` with the given initial properties.
    ///
    /// Node allocation, type tag, properties and the index entry are written
    /// in one transaction.
    pub fn create<T: NodeType>(&self, properties: &[(&str, Value)]) -> Result<Instance<T>> {
        let schema = self.register::<T>()?;
        self.transaction(|| -> Result<Instance<T>> {
            let store = self.store();
            let id = store.create_node()?;
            store.set_type_tag(id, T::NAME)?;
            let instance = Instance::new(self.clone(), id, Arc::clone(&schema));
            for (key, value) in properties {
                instance.set(key, value.clone())?;
            }
            self.inner.observers.created(
                self,
                InstanceEvent {
                    node: id,
                    schema: &schema,
                },
            )?;
            debug!(type_name = T::NAME, node = %id, "created instance");
            Ok(instance)
        })
    }

    /// Loads an existing instance by node id.
    ///
    /// Fails with [`Error::NodeNotFound`] when the node is missing or not
    /// tagged as `T`.
    pub fn load<T: NodeType>(&self, id: NodeId) -> Result<Instance<T>> {
        let schema = self.register::<T>()?;
        if !self.store().node_exists(id)? {
            return Err(Error::NodeNotFound {
                id,
                type_name: T::NAME.to_string(),
            });
        }
        self.wrap(id, &schema)
    }

    /// Wraps a node known to exist, checking its type tag.
    pub(crate) fn wrap<T: NodeType>(&self, id: NodeId, schema: &Arc<Schema>) -> Result<Instance<T>> {
        match self.store().type_tag(id)? {
            Some(tag) if tag == T::NAME => Ok(Instance::new(self.clone(), id, Arc::clone(schema))),
            _ => Err(Error::NodeNotFound {
                id,
                type_name: T::NAME.to_string(),
            }),
        }
    }

    pub(crate) fn delete_instance(&self, id: NodeId, schema: &Schema) -> Result<()> {
        self.transaction(|| -> Result<()> {
            self.inner
                .observers
                .deleted(self, InstanceEvent { node: id, schema })?;
            self.store().delete_node(id)?;
            debug!(type_name = schema.name(), node = %id, "deleted instance");
            Ok(())
        })
    }

    /// Every live instance of an indexed type, ordered by id.
    pub fn all_instances<T: NodeType>(&self) -> Result<Vec<Instance<T>>> {
        let schema = self.register::<T>()?;
        if !schema.is_indexed() {
            return Err(Error::undeclared(T::NAME, "an instance index"));
        }
        let mut instances = Vec::new();
        for id in self.inner.index.instances(self, T::ROOT_NAME)? {
            if T::ROOT_NAME == T::NAME {
                instances.push(Instance::new(self.clone(), id, Arc::clone(&schema)));
            } else if self.store().type_tag(id)?.as_deref() == Some(T::NAME) {
                // Types sharing a root name share index edges.
                instances.push(Instance::new(self.clone(), id, Arc::clone(&schema)));
            }
        }
        Ok(instances)
    }

    pub fn count<T: NodeType>(&self) -> Result<usize> {
        Ok(self.all_instances::<T>()?.len())
    }

    /// Instance with the lowest id. Full scan of the index.
    pub fn first<T: NodeType>(&self) -> Result<Option<Instance<T>>> {
        Ok(self.all_instances::<T>()?.into_iter().min())
    }

    /// Instance with the highest id. Full scan of the index.
    pub fn last<T: NodeType>(&self) -> Result<Option<Instance<T>>> {
        Ok(self.all_instances::<T>()?.into_iter().max())
    }

    /// Returns the instance of `T` with exactly these property values whose
    /// `scope_slot` reaches `scope`, creating and linking one if none exists.
    pub fn find_or_create<T: NodeType, S: NodeType>(
        &self,
        properties: &[(&str, Value)],
        scope_slot: &str,
        scope: &Instance<S>,
    ) -> Result<Instance<T>> {
        self.transaction(|| -> Result<Instance<T>> {
            for candidate in self.all_instances::<T>()? {
                if candidate.matches(properties)? && candidate.rel::<S>(scope_slot)?.contains(scope)? {
                    debug!(type_name = T::NAME, node = %candidate.id(), "found existing instance in scope");
                    return Ok(candidate);
                }
            }
            let instance = self.create::<T>(properties)?;
            instance.rel::<S>(scope_slot)?.add(scope)?;
            Ok(instance)
        })
    }

    pub fn reindex(&self) -> Result<ReindexReport> {
        self.inner.index.reindex(self)
    }

    pub fn index_summary(&self) -> Result<IndexSummary> {
        self.inner.index.summary(self)
    }
}
