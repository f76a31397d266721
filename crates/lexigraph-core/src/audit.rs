//! Property writers and the audit metadata hook.
//!
//! A schema owns one writer chain, assembled when the schema is built. Plain
//! types get [`RawWriter`]; audited types and edges get
//! `AuditWriter<RawWriter>`, which stamps `created_at`/`updated_at` and bumps
//! `version` through the inner writer on every property write.

use crate::error::{Error, Result};
use crate::store::{Element, GraphStore};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::fmt;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const VERSION: &str = "version";

/// Names that only the audit hook may write.
pub const AUDIT_FIELDS: [&str; 3] = [CREATED_AT, UPDATED_AT, VERSION];

/// Writes one property on a node or edge. Callers must be inside a transaction.
pub(crate) trait PropertyWriter: Send + Sync + fmt::Debug {
    fn write(&self, store: &GraphStore, element: Element, key: &str, value: &Value) -> Result<()>;

    /// Removes a property. Returns whether a value was present.
    fn clear(&self, store: &GraphStore, element: Element, key: &str) -> Result<bool>;

    /// Whether this chain maintains audit metadata.
    fn audited(&self) -> bool {
        false
    }
}

/// The primitive setter.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RawWriter;

impl PropertyWriter for RawWriter {
    fn write(&self, store: &GraphStore, element: Element, key: &str, value: &Value) -> Result<()> {
        store.set_property(element, key, value)
    }

    fn clear(&self, store: &GraphStore, element: Element, key: &str) -> Result<bool> {
        store.remove_property(element, key)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AuditWriter<W> {
    inner: W,
}

impl<W: PropertyWriter> AuditWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner }
    }

    fn stamp(&self, store: &GraphStore, element: Element) -> Result<()> {
        let now = Value::DateTime(Utc::now());
        if store.property(element, CREATED_AT)?.is_none() {
            self.inner.write(store, element, CREATED_AT, &now)?;
        }
        self.inner.write(store, element, UPDATED_AT, &now)?;

        let version = version(store, element)?;
        self.inner
            .write(store, element, VERSION, &Value::Integer(version + 1))
    }
}

impl<W: PropertyWriter> PropertyWriter for AuditWriter<W> {
    fn write(&self, store: &GraphStore, element: Element, key: &str, value: &Value) -> Result<()> {
        self.inner.write(store, element, key, value)?;
        self.stamp(store, element)
    }

    fn clear(&self, store: &GraphStore, element: Element, key: &str) -> Result<bool> {
        let removed = self.inner.clear(store, element, key)?;
        if removed {
            self.stamp(store, element)?;
        }
        Ok(removed)
    }

    fn audited(&self) -> bool {
        true
    }
}

/// Reads `created_at` or `updated_at`.
pub(crate) fn timestamp(store: &GraphStore, element: Element, key: &str) -> Result<Option<DateTime<Utc>>> {
    match store.property(element, key)? {
        None => Ok(None),
        Some(Value::DateTime(at)) => Ok(Some(at)),
        Some(other) => Err(Error::CorruptValue {
            key: key.to_string(),
            reason: format!("expected a timestamp, found {}", other.value_type()),
        }),
    }
}

/// Number of writes so far; 0 before the first one.
pub(crate) fn version(store: &GraphStore, element: Element) -> Result<i64> {
    match store.property(element, VERSION)? {
        None => Ok(0),
        Some(Value::Integer(version)) => Ok(version),
        Some(other) => Err(Error::CorruptValue {
            key: VERSION.to_string(),
            reason: format!("expected an integer, found {}", other.value_type()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionManager;
    use std::sync::Arc;

    #[test]
    fn test_audit_writer_stamps_and_counts() -> Result<()> {
        let store = Arc::new(GraphStore::in_memory()?);
        let tx = TransactionManager::new(store.clone());
        let writer = AuditWriter::new(RawWriter);

        let node = tx.run(|| -> Result<_> {
            let node = Element::Node(store.create_node()?);
            writer.write(&store, node, "name", &Value::from("Haus"))?;
            Ok(node)
        })?;
        let created = store.property(node, CREATED_AT)?.and_then(|v| v.as_datetime());
        assert!(created.is_some());
        assert_eq!(store.property(node, VERSION)?, Some(Value::Integer(1)));

        tx.run(|| writer.write(&store, node, "name", &Value::from("Häuser")))?;
        tx.run(|| writer.write(&store, node, "name", &Value::from("Haus")))?;

        assert_eq!(store.property(node, VERSION)?, Some(Value::Integer(3)));
        assert_eq!(store.property(node, CREATED_AT)?.and_then(|v| v.as_datetime()), created);
        let updated = store.property(node, UPDATED_AT)?.and_then(|v| v.as_datetime());
        assert!(updated >= created);
        Ok(())
    }

    #[test]
    fn test_raw_writer_leaves_no_metadata() -> Result<()> {
        let store = Arc::new(GraphStore::in_memory()?);
        let tx = TransactionManager::new(store.clone());
        let node = tx.run(|| -> Result<_> {
            let node = Element::Node(store.create_node()?);
            RawWriter.write(&store, node, "name", &Value::from("Haus"))?;
            Ok(node)
        })?;
        assert_eq!(store.property(node, VERSION)?, None);
        assert!(!RawWriter.audited());
        assert!(AuditWriter::new(RawWriter).audited());
        Ok(())
    }

    #[test]
    fn test_corrupt_version_is_reported_not_reset() -> Result<()> {
        let store = Arc::new(GraphStore::in_memory()?);
        let tx = TransactionManager::new(store.clone());
        let writer = AuditWriter::new(RawWriter);
        let node = tx.run(|| -> Result<_> {
            let node = Element::Node(store.create_node()?);
            RawWriter.write(&store, node, VERSION, &Value::from("seven"))?;
            Ok(node)
        })?;

        let err = tx
            .run(|| writer.write(&store, node, "name", &Value::from("Haus")))
            .unwrap_err();
        assert!(matches!(err, Error::CorruptValue { ref key, .. } if key == VERSION));
        assert_eq!(store.property(node, "name")?, None);
        Ok(())
    }

    #[test]
    fn test_clear_counts_only_when_something_was_removed() -> Result<()> {
        let store = Arc::new(GraphStore::in_memory()?);
        let tx = TransactionManager::new(store.clone());
        let writer = AuditWriter::new(RawWriter);
        let node = tx.run(|| -> Result<_> {
            let node = Element::Node(store.create_node()?);
            writer.write(&store, node, "name", &Value::from("Haus"))?;
            Ok(node)
        })?;

        assert!(tx.run(|| writer.clear(&store, node, "name"))?);
        assert_eq!(version(&store, node)?, 2);
        assert!(!tx.run(|| writer.clear(&store, node, "name"))?);
        assert_eq!(version(&store, node)?, 2);
        assert_eq!(store.property(node, "name")?, None);
        Ok(())
    }
}
