//! Registered node types of one database.

use crate::error::Result;
use crate::schema::{NodeType, Schema, SchemaBuilder};
use crate::store::Direction;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: DashMap<&'static str, Arc<Schema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and records `T`'s schema on first use; later calls return the
    /// same schema. Incoming slots are checked against their target types
    /// here, registering those targets as needed.
    pub fn register<T: NodeType>(&self) -> Result<Arc<Schema>> {
        if let Some(schema) = self.types.get(T::NAME) {
            return Ok(Arc::clone(schema.value()));
        }

        let schema = Arc::new(T::declare(SchemaBuilder::for_type::<T>()).build()?);
        self.types.insert(T::NAME, Arc::clone(&schema));

        let inverses = schema
            .slots()
            .iter()
            .filter(|slot| slot.direction() == Direction::Incoming)
            .try_for_each(|slot| schema.resolve_slot(slot.name(), self).map(|_| ()));
        if let Err(e) = inverses {
            self.types.remove(T::NAME);
            return Err(e);
        }

        debug!(type_name = T::NAME, slots = schema.slots().len(), "registered node type");
        Ok(schema)
    }

    /// Looks a type up by the tag stored on its nodes.
    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.types.get(name).map(|schema| Arc::clone(schema.value()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.iter().map(|entry| *entry.key()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeclarationError, Error};
    use crate::value::ValueType;

    struct Word;
    struct Language;
    struct Orphan;

    impl NodeType for Word {
        const NAME: &'static str = "Word";

        fn declare(schema: SchemaBuilder) -> SchemaBuilder {
            schema
                .property("name", ValueType::String)
                .outgoing::<Language>("language")
        }
    }

    impl NodeType for Language {
        const NAME: &'static str = "Language";

        fn declare(schema: SchemaBuilder) -> SchemaBuilder {
            schema.incoming::<Word>("words", "language")
        }
    }

    impl NodeType for Orphan {
        const NAME: &'static str = "Orphan";

        fn declare(schema: SchemaBuilder) -> SchemaBuilder {
            schema.incoming::<Word>("words", "missing")
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = TypeRegistry::new();
        let first = registry.register::<Word>().unwrap();
        let second = registry.register::<Word>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &registry.get("Word").unwrap()));
    }

    #[test]
    fn test_incoming_slot_registers_its_target() {
        let registry = TypeRegistry::new();
        let language = registry.register::<Language>().unwrap();
        assert_eq!(registry.names(), vec!["Language", "Word"]);

        let slot = language.resolve_slot("words", &registry).unwrap();
        assert_eq!(slot.edge_type, "Word#language");
        assert_eq!(slot.direction, Direction::Incoming);
    }

    #[test]
    fn test_unresolvable_inverse_fails_registration() {
        let registry = TypeRegistry::new();
        let err = registry.register::<Orphan>().unwrap_err();
        assert!(matches!(
            err,
            Error::Declaration(DeclarationError::UnresolvedInverse { ref via, .. }) if via == "missing"
        ));
        assert!(registry.get("Orphan").is_none());
    }
}
