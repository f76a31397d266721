//! Declarative node types.
//!
//! A domain type implements [`NodeType`] and describes itself through a
//! [`SchemaBuilder`]. The builder is consumed once, at registration, into an
//! immutable [`Schema`] shared by everything that touches instances of the
//! type.

use crate::audit::{AuditWriter, PropertyWriter, RawWriter, AUDIT_FIELDS};
use crate::error::{DeclarationError, Error, Result};
use crate::registry::TypeRegistry;
use crate::store::Direction;
use crate::value::{Value, ValueType};
use std::sync::Arc;

/// A domain type mapped onto graph nodes.
///
/// ```ignore
/// struct Word;
///
/// impl NodeType for Word {
///     const NAME: &'static str = "Word";
///
///     fn declare(schema: SchemaBuilder) -> SchemaBuilder {
///         schema
///             .property("name", ValueType::String)
///             .indexed()
///             .audited()
///             .outgoing::<Language>("language")
///     }
/// }
/// ```
pub trait NodeType: 'static {
    /// Type tag stamped on every node of this type.
    const NAME: &'static str;

    /// Edge type linking the index root to instances of this type.
    const ROOT_NAME: &'static str = Self::NAME;

    fn declare(schema: SchemaBuilder) -> SchemaBuilder;
}

/// How far a traversal follows edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// At most this many hops from the owner.
    Limited(u32),
    /// Everything transitively reachable through the edge type.
    Unbounded,
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Limited(1)
    }
}

impl Depth {
    /// Whether a node `hops` edges away may still be expanded further.
    pub fn expands(&self, hops: u32) -> bool {
        match self {
            Depth::Limited(max) => hops < *max,
            Depth::Unbounded => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub value_type: ValueType,
}

impl PropertyDef {
    pub(crate) fn check(&self, value: &Value) -> Result<()> {
        if value.value_type() == self.value_type {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                key: self.name.clone(),
                expected: self.value_type,
                actual: value.value_type(),
            })
        }
    }
}

pub(crate) type SchemaResolver = fn(&TypeRegistry) -> Result<Arc<Schema>>;

#[derive(Debug, Clone)]
enum SlotEnd {
    Outgoing {
        edge_type: String,
        edge_properties: Vec<PropertyDef>,
        edge_writer: Arc<dyn PropertyWriter>,
    },
    Incoming {
        via: String,
    },
}

#[derive(Debug, Clone)]
pub struct SlotDef {
    name: String,
    target: &'static str,
    depth: Depth,
    end: SlotEnd,
    resolve_target: SchemaResolver,
}

impl SlotDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn direction(&self) -> Direction {
        match self.end {
            SlotEnd::Outgoing { .. } => Direction::Outgoing,
            SlotEnd::Incoming { .. } => Direction::Incoming,
        }
    }
}

/// A slot with its edge type settled, ready for traversal.
///
/// Incoming slots borrow edge type, edge properties and edge audit from the
/// outgoing slot they name, so both ends of a relationship agree.
#[derive(Debug, Clone)]
pub struct ResolvedSlot {
    pub owner: &'static str,
    pub name: String,
    pub target: &'static str,
    pub direction: Direction,
    pub depth: Depth,
    pub edge_type: String,
    pub(crate) edge_properties: Vec<PropertyDef>,
    pub(crate) edge_writer: Arc<dyn PropertyWriter>,
}

impl ResolvedSlot {
    pub fn edge_property(&self, name: &str) -> Option<&PropertyDef> {
        self.edge_properties.iter().find(|p| p.name == name)
    }

    pub fn audits_edges(&self) -> bool {
        self.edge_writer.audited()
    }
}

#[derive(Debug)]
pub struct Schema {
    name: &'static str,
    root_name: &'static str,
    properties: Vec<PropertyDef>,
    slots: Vec<SlotDef>,
    indexed: bool,
    writer: Arc<dyn PropertyWriter>,
}

impl Schema {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn root_name(&self) -> &'static str {
        self.root_name
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn slots(&self) -> &[SlotDef] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&SlotDef> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_audited(&self) -> bool {
        self.writer.audited()
    }

    pub(crate) fn writer(&self) -> &dyn PropertyWriter {
        self.writer.as_ref()
    }

    pub(crate) fn resolve_slot(&self, name: &str, registry: &TypeRegistry) -> Result<ResolvedSlot> {
        let slot = self
            .slot(name)
            .ok_or_else(|| Error::undeclared(self.name, format!("relationship slot `{}`", name)))?;

        let (edge_type, edge_properties, edge_writer) = match &slot.end {
            SlotEnd::Outgoing {
                edge_type,
                edge_properties,
                edge_writer,
            } => (edge_type.clone(), edge_properties.clone(), Arc::clone(edge_writer)),
            SlotEnd::Incoming { via } => {
                let target = (slot.resolve_target)(registry)?;
                match target.slot(via).map(|inverse| (inverse, &inverse.end)) {
                    Some((
                        inverse,
                        SlotEnd::Outgoing {
                            edge_type,
                            edge_properties,
                            edge_writer,
                        },
                    )) if inverse.target == self.name => {
                        (edge_type.clone(), edge_properties.clone(), Arc::clone(edge_writer))
                    }
                    _ => {
                        return Err(DeclarationError::UnresolvedInverse {
                            type_name: self.name.to_string(),
                            slot: slot.name.clone(),
                            target: slot.target.to_string(),
                            via: via.clone(),
                        }
                        .into())
                    }
                }
            }
        };

        Ok(ResolvedSlot {
            owner: self.name,
            name: slot.name.clone(),
            target: slot.target,
            direction: slot.direction(),
            depth: slot.depth,
            edge_type,
            edge_properties,
            edge_writer,
        })
    }
}

#[derive(Debug)]
struct SlotDraft {
    name: String,
    target: &'static str,
    direction: Direction,
    depth: Depth,
    edge_type: Option<String>,
    via: Option<String>,
    edge_properties: Vec<PropertyDef>,
    audited_edges: bool,
    resolve_target: SchemaResolver,
}

/// Collects a type's declaration. Errors are recorded as they happen and the
/// first one is reported by [`SchemaBuilder::build`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: &'static str,
    root_name: &'static str,
    properties: Vec<PropertyDef>,
    slots: Vec<SlotDraft>,
    indexed: bool,
    audited: bool,
    errors: Vec<DeclarationError>,
}

impl SchemaBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            root_name: name,
            properties: Vec::new(),
            slots: Vec::new(),
            indexed: false,
            audited: false,
            errors: Vec::new(),
        }
    }

    pub fn for_type<T: NodeType>() -> Self {
        Self {
            root_name: T::ROOT_NAME,
            ..Self::new(T::NAME)
        }
    }

    pub fn property(mut self, name: &str, value_type: ValueType) -> Self {
        if self.check_name(name) {
            if self.properties.iter().any(|p| p.name == name) || self.slots.iter().any(|s| s.name == name) {
                self.errors.push(DeclarationError::DuplicateProperty {
                    type_name: self.name.to_string(),
                    property: name.to_string(),
                });
            } else {
                self.properties.push(PropertyDef {
                    name: name.to_string(),
                    value_type,
                });
            }
        }
        self
    }

    /// Keep every instance reachable from the index root.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Maintain `created_at`, `updated_at` and `version` on instances.
    pub fn audited(mut self) -> Self {
        self.audited = true;
        self
    }

    /// Declares a slot whose edges point from the owner to `U`. The edge type
    /// defaults to `"<Owner>#<slot>"`.
    pub fn outgoing<U: NodeType>(self, name: &str) -> Self {
        let edge_type = format!("{}#{}", self.name, name);
        self.push_slot::<U>(name, Direction::Outgoing, Some(edge_type), None)
    }

    /// Declares the receiving end of `U`'s outgoing slot `via`.
    pub fn incoming<U: NodeType>(self, name: &str, via: &str) -> Self {
        self.push_slot::<U>(name, Direction::Incoming, None, Some(via.to_string()))
    }

    fn push_slot<U: NodeType>(
        mut self,
        name: &str,
        direction: Direction,
        edge_type: Option<String>,
        via: Option<String>,
    ) -> Self {
        if !self.check_name(name) {
            return self;
        }
        if self.slots.iter().any(|s| s.name == name) || self.properties.iter().any(|p| p.name == name) {
            self.errors.push(DeclarationError::DuplicateSlot {
                type_name: self.name.to_string(),
                slot: name.to_string(),
            });
            return self;
        }
        self.slots.push(SlotDraft {
            name: name.to_string(),
            target: U::NAME,
            direction,
            depth: Depth::default(),
            edge_type,
            via,
            edge_properties: Vec::new(),
            audited_edges: false,
            resolve_target: TypeRegistry::register::<U>,
        });
        self
    }

    /// Default traversal depth of the last declared slot. Must be non-negative.
    pub fn depth(mut self, depth: i64) -> Self {
        let type_name = self.name;
        match u32::try_from(depth) {
            Ok(hops) => {
                if let Some(slot) = self.last_slot("depth") {
                    slot.depth = Depth::Limited(hops);
                }
            }
            Err(_) => self.errors.push(DeclarationError::InvalidDepth {
                type_name: type_name.to_string(),
                depth,
            }),
        }
        self
    }

    /// Makes the last declared slot follow its edge type transitively.
    pub fn unbounded(mut self) -> Self {
        if let Some(slot) = self.last_slot("unbounded") {
            slot.depth = Depth::Unbounded;
        }
        self
    }

    /// Overrides the edge type name of the last declared (outgoing) slot.
    pub fn edge_type(mut self, edge_type: &str) -> Self {
        if edge_type.is_empty() {
            self.errors.push(DeclarationError::InvalidName {
                type_name: self.name.to_string(),
                name: edge_type.to_string(),
            });
            return self;
        }
        if let Some(slot) = self.last_outgoing_slot("edge_type") {
            slot.edge_type = Some(edge_type.to_string());
        }
        self
    }

    /// Declares a property carried by edges of the last declared (outgoing) slot.
    pub fn edge_property(mut self, name: &str, value_type: ValueType) -> Self {
        if !self.check_name(name) {
            return self;
        }
        let type_name = self.name;
        let mut duplicate = false;
        if let Some(slot) = self.last_outgoing_slot("edge_property") {
            if slot.edge_properties.iter().any(|p| p.name == name) {
                duplicate = true;
            } else {
                slot.edge_properties.push(PropertyDef {
                    name: name.to_string(),
                    value_type,
                });
            }
        }
        if duplicate {
            self.errors.push(DeclarationError::DuplicateProperty {
                type_name: type_name.to_string(),
                property: name.to_string(),
            });
        }
        self
    }

    /// Maintains audit metadata on edges of the last declared (outgoing) slot.
    pub fn audited_edges(mut self) -> Self {
        if let Some(slot) = self.last_outgoing_slot("audited_edges") {
            slot.audited_edges = true;
        }
        self
    }

    fn check_name(&mut self, name: &str) -> bool {
        let valid = !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            self.errors.push(DeclarationError::InvalidName {
                type_name: self.name.to_string(),
                name: name.to_string(),
            });
            return false;
        }
        if AUDIT_FIELDS.contains(&name) {
            self.errors.push(DeclarationError::ReservedName {
                type_name: self.name.to_string(),
                name: name.to_string(),
            });
            return false;
        }
        true
    }

    fn last_slot(&mut self, modifier: &'static str) -> Option<&mut SlotDraft> {
        if self.slots.is_empty() {
            self.errors.push(DeclarationError::NoSlotDeclared {
                type_name: self.name.to_string(),
                modifier,
            });
        }
        self.slots.last_mut()
    }

    fn last_outgoing_slot(&mut self, modifier: &'static str) -> Option<&mut SlotDraft> {
        let type_name = self.name;
        let error = match self.slots.last() {
            None => Some(DeclarationError::NoSlotDeclared {
                type_name: type_name.to_string(),
                modifier,
            }),
            Some(slot) if slot.direction == Direction::Incoming => {
                Some(DeclarationError::InverseSlotModifier {
                    type_name: type_name.to_string(),
                    slot: slot.name.clone(),
                    modifier,
                })
            }
            Some(_) => None,
        };
        match error {
            Some(error) => {
                self.errors.push(error);
                None
            }
            None => self.slots.last_mut(),
        }
    }

    pub fn build(self) -> Result<Schema, DeclarationError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let slots = self
            .slots
            .into_iter()
            .map(|draft| {
                let end = match draft.direction {
                    Direction::Outgoing => SlotEnd::Outgoing {
                        edge_type: draft.edge_type.unwrap_or_default(),
                        edge_properties: draft.edge_properties,
                        edge_writer: writer_chain(draft.audited_edges),
                    },
                    Direction::Incoming => SlotEnd::Incoming {
                        via: draft.via.unwrap_or_default(),
                    },
                };
                SlotDef {
                    name: draft.name,
                    target: draft.target,
                    depth: draft.depth,
                    end,
                    resolve_target: draft.resolve_target,
                }
            })
            .collect();

        Ok(Schema {
            name: self.name,
            root_name: self.root_name,
            properties: self.properties,
            slots,
            indexed: self.indexed,
            writer: writer_chain(self.audited),
        })
    }
}

fn writer_chain(audited: bool) -> Arc<dyn PropertyWriter> {
    if audited {
        Arc::new(AuditWriter::new(RawWriter))
    } else {
        Arc::new(RawWriter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Language;

    impl NodeType for Language {
        const NAME: &'static str = "Language";

        fn declare(schema: SchemaBuilder) -> SchemaBuilder {
            schema.property("code", ValueType::String)
        }
    }

    #[test]
    fn test_outgoing_slot_defaults() {
        let schema = SchemaBuilder::new("Word")
            .property("name", ValueType::String)
            .outgoing::<Language>("language")
            .build()
            .unwrap();

        let slot = schema.slot("language").unwrap();
        assert_eq!(slot.direction(), Direction::Outgoing);
        assert_eq!(slot.depth(), Depth::Limited(1));
        assert_eq!(slot.target(), "Language");
        assert!(!schema.is_indexed());
        assert!(!schema.is_audited());
        assert_eq!(schema.root_name(), "Word");
    }

    #[test]
    fn test_duplicate_slot_is_rejected() {
        let err = SchemaBuilder::new("Word")
            .outgoing::<Language>("language")
            .outgoing::<Language>("language")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::DuplicateSlot {
                type_name: "Word".into(),
                slot: "language".into()
            }
        );
    }

    #[test]
    fn test_negative_depth_is_rejected() {
        let err = SchemaBuilder::new("Concept")
            .outgoing::<Language>("broader")
            .depth(-2)
            .build()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::InvalidDepth { depth: -2, .. }));
    }

    #[test]
    fn test_depth_and_unbounded() {
        let schema = SchemaBuilder::new("Concept")
            .outgoing::<Language>("near")
            .depth(0)
            .outgoing::<Language>("far")
            .unbounded()
            .build()
            .unwrap();
        assert_eq!(schema.slot("near").unwrap().depth(), Depth::Limited(0));
        assert_eq!(schema.slot("far").unwrap().depth(), Depth::Unbounded);
        assert!(!Depth::Limited(0).expands(0));
        assert!(Depth::Limited(2).expands(1));
        assert!(Depth::Unbounded.expands(u32::MAX));
    }

    #[test]
    fn test_modifier_without_slot() {
        let err = SchemaBuilder::new("Word").unbounded().build().unwrap_err();
        assert!(matches!(err, DeclarationError::NoSlotDeclared { modifier: "unbounded", .. }));
    }

    #[test]
    fn test_edge_modifiers_belong_on_outgoing_end() {
        let err = SchemaBuilder::new("Language")
            .incoming::<Language>("dialects", "parent")
            .edge_property("since", ValueType::DateTime)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            DeclarationError::InverseSlotModifier { modifier: "edge_property", .. }
        ));
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let err = SchemaBuilder::new("Word")
            .property("version", ValueType::Integer)
            .build()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::ReservedName { .. }));

        let err = SchemaBuilder::new("Word")
            .property("first name", ValueType::String)
            .build()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::InvalidName { .. }));
    }

    #[test]
    fn test_audited_flags_select_writer_chain() {
        let schema = SchemaBuilder::new("Word")
            .audited()
            .outgoing::<Language>("language")
            .edge_type("IN_LANGUAGE")
            .audited_edges()
            .build()
            .unwrap();
        assert!(schema.is_audited());
        let registry = TypeRegistry::new();
        let slot = schema.resolve_slot("language", &registry).unwrap();
        assert_eq!(slot.edge_type, "IN_LANGUAGE");
        assert!(slot.audits_edges());
    }
}
