//! Resolved structural types.

use std::sync::Arc;

use daybook_foundation::{NavId, PropId, TypeId};

use crate::named::NamedVec;
use crate::property::{AutoGeneratedKeyType, DataProperty, NavigationProperty};

/// Facts that apply only to entity types, not complex types.
#[derive(Clone, Debug)]
pub struct EntityFacts {
    /// How key values for new instances come to exist.
    pub auto_generated_key_type: AutoGeneratedKeyType,
    /// The service resource queried for this type by default.
    pub default_resource_name: Option<Arc<str>>,
    /// The key properties, in declared order.
    pub key_properties: Vec<PropId>,
}

/// Whether a structural type is an entity or a complex value.
#[derive(Clone, Debug)]
pub enum TypeKind {
    /// An identity-bearing entity type.
    Entity(EntityFacts),
    /// A keyless complex type nested inside entities.
    Complex,
}

/// A registered structural type: an entity type or a complex type.
///
/// Subtypes materialize their inherited properties, so a property's index
/// within `data_properties` is stable whether accessed through the base or
/// the subtype.
#[derive(Clone, Debug)]
pub struct StructuralType {
    /// This type's id within its store.
    pub id: TypeId,
    /// Unqualified name.
    pub short_name: Arc<str>,
    /// Namespace, possibly empty.
    pub namespace: Arc<str>,
    /// `namespace.short_name`, or just `short_name` without a namespace.
    pub full_name: Arc<str>,
    /// Declared base type name, kept for forward references.
    pub base_type_name: Option<Arc<str>>,
    /// The resolved base type, once registered.
    pub base: Option<TypeId>,
    /// Abstract types cannot be instantiated, only inherited from.
    pub is_abstract: bool,
    /// Entity facts or complex marker.
    pub kind: TypeKind,
    /// Data properties, inherited ones first.
    pub data_properties: NamedVec<DataProperty>,
    /// Navigation properties, inherited ones first.
    pub navigation_properties: NamedVec<NavigationProperty>,
    /// Raw type-level validator configurations.
    pub validators: Vec<serde_json::Value>,
    /// How many leading properties were inherited from the base.
    pub inherited_data_count: usize,
    /// How many leading navigations were inherited from the base.
    pub inherited_nav_count: usize,
}

impl StructuralType {
    /// Returns true for entity types.
    #[must_use]
    pub fn is_entity_type(&self) -> bool {
        matches!(self.kind, TypeKind::Entity(_))
    }

    /// Returns true for complex types.
    #[must_use]
    pub fn is_complex_type(&self) -> bool {
        matches!(self.kind, TypeKind::Complex)
    }

    /// Entity facts, or `None` for complex types.
    #[must_use]
    pub fn entity_facts(&self) -> Option<&EntityFacts> {
        match &self.kind {
            TypeKind::Entity(facts) => Some(facts),
            TypeKind::Complex => None,
        }
    }

    /// Key properties in declared order; empty for complex types.
    #[must_use]
    pub fn key_properties(&self) -> &[PropId] {
        self.entity_facts()
            .map_or(&[], |facts| facts.key_properties.as_slice())
    }

    /// Looks up a data property by name.
    #[must_use]
    pub fn data_prop(&self, name: &str) -> Option<(PropId, &DataProperty)> {
        self.data_properties
            .index_of(name)
            .and_then(|i| self.data_properties.get_at(i).map(|p| (prop_id(i), p)))
    }

    /// Looks up a navigation property by name.
    #[must_use]
    pub fn nav_prop(&self, name: &str) -> Option<(NavId, &NavigationProperty)> {
        self.navigation_properties
            .index_of(name)
            .and_then(|i| self.navigation_properties.get_at(i).map(|n| (nav_id(i), n)))
    }

    /// The data property with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not issued for this type.
    #[must_use]
    pub fn data(&self, id: PropId) -> &DataProperty {
        self.data_properties
            .get_at(id.index())
            .unwrap_or_else(|| panic!("no data property {id:?} on {}", self.full_name))
    }

    /// The navigation property with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not issued for this type.
    #[must_use]
    pub fn nav(&self, id: NavId) -> &NavigationProperty {
        self.navigation_properties
            .get_at(id.index())
            .unwrap_or_else(|| panic!("no navigation property {id:?} on {}", self.full_name))
    }

    /// Iterates data property ids in declaration order.
    pub fn data_ids(&self) -> impl Iterator<Item = PropId> + use<> {
        (0..self.data_properties.len()).map(prop_id)
    }

    /// Iterates navigation property ids in declaration order.
    pub fn nav_ids(&self) -> impl Iterator<Item = NavId> + use<> {
        (0..self.navigation_properties.len()).map(nav_id)
    }

    /// Returns true once every forward reference this type makes has been
    /// resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        let base_ok = self.base_type_name.is_none() || self.base.is_some();
        let data_ok = self
            .data_properties
            .iter()
            .all(|p| !p.is_complex() || p.complex_type().is_some());
        let navs_ok = self
            .navigation_properties
            .iter()
            .all(NavigationProperty::is_resolved);
        base_ok && data_ok && navs_ok
    }
}

pub(crate) fn prop_id(index: usize) -> PropId {
    PropId::new(u32::try_from(index).unwrap_or(u32::MAX))
}

pub(crate) fn nav_id(index: usize) -> NavId {
    NavId::new(u32::try_from(index).unwrap_or(u32::MAX))
}

pub(crate) fn full_name_of(namespace: &str, short_name: &str) -> String {
    if namespace.is_empty() {
        short_name.to_string()
    } else {
        format!("{namespace}.{short_name}")
    }
}
