//! Metadata registration and forward-reference resolution.

use std::collections::HashMap;
use std::sync::Arc;

use daybook_foundation::{Error, ErrorKind, NavId, PropId, Result, TypeId};

use crate::json::{DataPropertyDef, MetadataDocument, NavigationPropertyDef, TypeDef};
use crate::named::NamedVec;
use crate::naming::NamingConvention;
use crate::property::{
    AutoGeneratedKeyType, DataProperty, DataPropertyKind, NavigationProperty,
};
use crate::structural::{EntityFacts, StructuralType, TypeKind, full_name_of, nav_id, prop_id};

#[derive(Clone, Debug)]
enum ShortEntry {
    Unique(TypeId),
    Ambiguous,
}

/// The registry of structural types.
///
/// Types register in any order. A reference to a type that has not arrived
/// yet (a navigation target, a complex property type, or a base type) parks
/// the referencing side until the awaited type registers, at which point
/// both sides resolve. [`StructuralType::is_resolved`] reports whether a
/// type still waits on anything.
#[derive(Clone, Debug, Default)]
pub struct MetadataStore {
    types: Vec<StructuralType>,
    by_full_name: HashMap<Arc<str>, TypeId>,
    by_short_name: HashMap<Arc<str>, ShortEntry>,
    resources: HashMap<Arc<str>, Arc<str>>,
    naming: NamingConvention,
    pending_navs: HashMap<String, Vec<(TypeId, NavId)>>,
    pending_complex: HashMap<String, Vec<(TypeId, PropId)>>,
    pending_subtypes: HashMap<String, Vec<TypeDef>>,
}

impl MetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered (realized) types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The naming convention payloads from this store's service use.
    #[must_use]
    pub fn naming_convention(&self) -> NamingConvention {
        self.naming
    }

    /// Overrides the naming convention.
    pub fn set_naming_convention(&mut self, naming: NamingConvention) {
        self.naming = naming;
    }

    /// Looks up a type by full name, falling back to an unambiguous short
    /// name.
    #[must_use]
    pub fn get_type(&self, name: &str) -> Option<&StructuralType> {
        self.type_id(name).map(|id| &self.types[id.index()])
    }

    /// Looks up a type id by full name, falling back to an unambiguous
    /// short name.
    #[must_use]
    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        if let Some(&id) = self.by_full_name.get(name) {
            return Some(id);
        }
        match self.by_short_name.get(name) {
            Some(ShortEntry::Unique(id)) => Some(*id),
            _ => None,
        }
    }

    /// The type with the given id, if it came from this store.
    #[must_use]
    pub fn get(&self, id: TypeId) -> Option<&StructuralType> {
        self.types.get(id.index())
    }

    /// Iterates all registered types.
    pub fn types(&self) -> std::slice::Iter<'_, StructuralType> {
        self.types.iter()
    }

    /// Iterates registered entity types.
    pub fn entity_types(&self) -> impl Iterator<Item = &StructuralType> {
        self.types.iter().filter(|t| t.is_entity_type())
    }

    /// Returns true if `candidate` is `expected` or derives from it.
    #[must_use]
    pub fn is_assignable(&self, expected: TypeId, candidate: TypeId) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == expected {
                return true;
            }
            current = self.types.get(id.index()).and_then(|t| t.base);
        }
        false
    }

    /// The entity type a service resource maps to.
    #[must_use]
    pub fn type_for_resource(&self, resource: &str) -> Option<&StructuralType> {
        let name = self.resources.get(resource)?;
        self.get_type(name)
    }

    /// Maps a service resource to an entity type name.
    pub fn set_resource(&mut self, resource: impl Into<String>, type_name: impl Into<String>) {
        self.resources
            .insert(resource.into().into(), type_name.into().into());
    }

    /// Returns true if any registration is still waiting on a type that
    /// has not arrived.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_navs.is_empty()
            || !self.pending_complex.is_empty()
            || !self.pending_subtypes.is_empty()
    }

    /// Names of types other registrations are waiting for, sorted.
    #[must_use]
    pub fn pending_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pending_navs
            .keys()
            .chain(self.pending_complex.keys())
            .chain(self.pending_subtypes.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Registers every type in a document, in document order.
    ///
    /// Types already registered under the same full name are skipped, so
    /// applying the same document twice is harmless. Resource mappings and
    /// the naming convention are merged in.
    ///
    /// # Errors
    ///
    /// Returns the first registration error. Types registered before the
    /// failing one remain registered.
    pub fn add_document(&mut self, doc: &MetadataDocument) -> Result<Vec<TypeId>> {
        if let Some(naming) = doc.naming_convention {
            self.naming = naming;
        }
        let mut realized = Vec::new();
        for def in &doc.structural_types {
            let full = full_name_of(&def.namespace, &def.short_name);
            if self.is_known(&full) {
                continue;
            }
            realized.extend(self.add_type(def.clone())?);
        }
        for (resource, type_name) in &doc.resource_entity_type_map {
            self.set_resource(resource.clone(), type_name.clone());
        }
        Ok(realized)
    }

    /// Registers a single type definition.
    ///
    /// If the definition names a base type that has not registered yet, it
    /// is parked and realized when the base arrives; the returned list is
    /// empty in that case. Otherwise the list holds the new type's id plus
    /// the ids of any parked subtypes this registration unblocked.
    ///
    /// # Errors
    ///
    /// Returns a metadata error for an empty name, a duplicate type, a
    /// malformed property set, or a reference that resolves to a type of
    /// the wrong kind.
    pub fn add_type(&mut self, def: TypeDef) -> Result<Vec<TypeId>> {
        if def.short_name.is_empty() {
            return Err(Error::metadata("type definition has no shortName"));
        }
        let full = full_name_of(&def.namespace, &def.short_name);
        if self.by_full_name.contains_key(full.as_str()) {
            return Err(Error::metadata(format!("type '{full}' already registered")));
        }
        if let Some(base_name) = &def.base_type_name {
            if !self.by_full_name.contains_key(base_name.as_str()) {
                self.pending_subtypes
                    .entry(base_name.clone())
                    .or_default()
                    .push(def);
                return Ok(Vec::new());
            }
        }

        let id = self.realize(&def, &full)?;
        let mut realized = vec![id];
        if let Some(waiting) = self.pending_subtypes.remove(&full) {
            for sub in waiting {
                realized.extend(self.add_type(sub)?);
            }
        }
        Ok(realized)
    }

    /// Rebuilds a document describing everything this store knows,
    /// including definitions still parked on a missing base type.
    #[must_use]
    pub fn to_document(&self) -> MetadataDocument {
        let mut doc = MetadataDocument {
            naming_convention: Some(self.naming),
            ..MetadataDocument::default()
        };
        for ty in &self.types {
            doc.structural_types.push(self.export_def(ty));
        }
        for parked in self.pending_subtypes.values() {
            doc.structural_types.extend(parked.iter().cloned());
        }
        for (resource, type_name) in &self.resources {
            doc.resource_entity_type_map
                .insert(resource.to_string(), type_name.to_string());
        }
        doc
    }

    fn is_known(&self, full: &str) -> bool {
        self.by_full_name.contains_key(full)
            || self
                .pending_subtypes
                .values()
                .flatten()
                .any(|d| full_name_of(&d.namespace, &d.short_name) == full)
    }

    fn realize(&mut self, def: &TypeDef, full: &str) -> Result<TypeId> {
        let id = TypeId::new(u32::try_from(self.types.len()).map_err(|_| {
            Error::metadata("type table overflow")
        })?);

        let base = match &def.base_type_name {
            Some(base_name) => {
                let base_id = self.by_full_name[base_name.as_str()];
                let base_ty = &self.types[base_id.index()];
                if base_ty.is_complex_type() != def.is_complex_type {
                    return Err(Error::metadata(format!(
                        "'{full}' and its base '{base_name}' disagree on complexness"
                    )));
                }
                Some(base_id)
            }
            None => None,
        };

        let (mut data_properties, mut navigation_properties, inherited_data, inherited_nav) =
            match base {
                Some(base_id) => {
                    let base_ty = &self.types[base_id.index()];
                    (
                        base_ty.data_properties.clone(),
                        base_ty.navigation_properties.clone(),
                        base_ty.data_properties.len(),
                        base_ty.navigation_properties.len(),
                    )
                }
                None => (NamedVec::new(), NamedVec::new(), 0, 0),
            };

        // Inherited properties may themselves still be waiting on a type,
        // so the subtype's copies have to wait alongside the base's.
        let mut park_complex: Vec<(String, PropId)> = Vec::new();
        let mut park_navs: Vec<(String, NavId)> = Vec::new();
        for (at, prop) in data_properties.iter().enumerate().take(inherited_data) {
            if let DataPropertyKind::Complex { type_name, target: None } = &prop.kind {
                park_complex.push((type_name.to_string(), prop_id(at)));
            }
        }
        for (at, nav) in navigation_properties.iter().enumerate().take(inherited_nav) {
            if nav.target.is_none() {
                park_navs.push((nav.entity_type_name.to_string(), nav_id(at)));
            }
        }

        for prop_def in &def.data_properties {
            let at = data_properties.len();
            let prop = self.build_data_prop(full, prop_def)?;
            if let DataPropertyKind::Complex { type_name, target: None } = &prop.kind {
                park_complex.push((type_name.to_string(), prop_id(at)));
            }
            if data_properties.push(prop).is_none() {
                return Err(Error::new(ErrorKind::DuplicateProperty {
                    type_name: full.to_string(),
                    property: prop_def.name.clone(),
                }));
            }
        }

        if def.is_complex_type && !def.navigation_properties.is_empty() {
            return Err(Error::metadata(format!(
                "complex type '{full}' declares navigation properties"
            )));
        }
        let mut ready_navs: Vec<NavId> = Vec::new();
        for nav_def in &def.navigation_properties {
            let at = navigation_properties.len();
            let nav = self.build_nav_prop(full, nav_def)?;
            match nav.target {
                Some(_) => ready_navs.push(nav_id(at)),
                None => park_navs.push((nav_def.entity_type_name.clone(), nav_id(at))),
            }
            if navigation_properties.push(nav).is_none() {
                return Err(Error::new(ErrorKind::DuplicateProperty {
                    type_name: full.to_string(),
                    property: nav_def.name.clone(),
                }));
            }
        }

        let key_properties: Vec<PropId> = data_properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.part_of_key)
            .map(|(i, _)| prop_id(i))
            .collect();

        let kind = if def.is_complex_type {
            if !key_properties.is_empty() {
                return Err(Error::metadata(format!(
                    "complex type '{full}' declares key properties"
                )));
            }
            TypeKind::Complex
        } else {
            if key_properties.is_empty() && !def.is_abstract {
                return Err(Error::metadata(format!(
                    "entity type '{full}' has no key properties"
                )));
            }
            let inherited_facts = base.and_then(|b| self.types[b.index()].entity_facts().cloned());
            let auto_generated_key_type = match def.auto_generated_key_type {
                AutoGeneratedKeyType::None => inherited_facts
                    .as_ref()
                    .map_or(AutoGeneratedKeyType::None, |f| f.auto_generated_key_type),
                declared => declared,
            };
            let default_resource_name = def
                .default_resource_name
                .as_deref()
                .map(Arc::from)
                .or_else(|| inherited_facts.and_then(|f| f.default_resource_name));
            TypeKind::Entity(EntityFacts {
                auto_generated_key_type,
                default_resource_name,
                key_properties,
            })
        };

        let full_name: Arc<str> = full.into();
        let ty = StructuralType {
            id,
            short_name: def.short_name.as_str().into(),
            namespace: def.namespace.as_str().into(),
            full_name: full_name.clone(),
            base_type_name: def.base_type_name.as_deref().map(Arc::from),
            base,
            is_abstract: def.is_abstract,
            kind,
            data_properties,
            navigation_properties,
            validators: def.validators.clone(),
            inherited_data_count: inherited_data,
            inherited_nav_count: inherited_nav,
        };

        if let TypeKind::Entity(facts) = &ty.kind {
            if let Some(resource) = &facts.default_resource_name {
                self.resources.insert(resource.clone(), full_name.clone());
            }
        }
        self.by_full_name.insert(full_name.clone(), id);
        self.by_short_name
            .entry(ty.short_name.clone())
            .and_modify(|e| *e = ShortEntry::Ambiguous)
            .or_insert(ShortEntry::Unique(id));
        self.types.push(ty);

        for (type_name, pid) in park_complex {
            self.pending_complex.entry(type_name).or_default().push((id, pid));
        }
        for (type_name, nid) in park_navs {
            self.pending_navs.entry(type_name).or_default().push((id, nid));
        }
        for nid in ready_navs {
            self.resolve_nav(id, nid)?;
        }

        self.absorb_pending(id, full)?;
        Ok(id)
    }

    fn build_data_prop(&self, type_name: &str, def: &DataPropertyDef) -> Result<DataProperty> {
        if def.name.is_empty() {
            return Err(Error::metadata(format!(
                "data property on '{type_name}' has no name"
            )));
        }
        let kind = match (&def.data_type, &def.complex_type_name) {
            (Some(_), Some(_)) => {
                return Err(Error::metadata(format!(
                    "property '{}' on '{type_name}' declares both dataType and complexTypeName",
                    def.name
                )));
            }
            (None, None) => {
                return Err(Error::metadata(format!(
                    "property '{}' on '{type_name}' declares neither dataType nor complexTypeName",
                    def.name
                )));
            }
            (Some(dt), None) => DataPropertyKind::Scalar(*dt),
            (None, Some(complex)) => {
                if def.is_part_of_key {
                    return Err(Error::metadata(format!(
                        "complex property '{}' on '{type_name}' cannot be part of the key",
                        def.name
                    )));
                }
                DataPropertyKind::Complex {
                    type_name: complex.as_str().into(),
                    target: self.type_id_for_complex(complex),
                }
            }
        };
        let default_value = match (&def.default_value, &kind) {
            (None, _) => None,
            (Some(_), DataPropertyKind::Complex { .. }) => {
                return Err(Error::metadata(format!(
                    "complex property '{}' on '{type_name}' cannot declare a default",
                    def.name
                )));
            }
            (Some(json), DataPropertyKind::Scalar(dt)) => Some(dt.coerce_json(json)?),
        };
        Ok(DataProperty {
            name: def.name.as_str().into(),
            kind,
            nullable: def.is_nullable && !def.is_part_of_key,
            part_of_key: def.is_part_of_key,
            concurrency_mode: def.concurrency_mode,
            max_length: def.max_length,
            default_value,
            related_nav: None,
            inverse_nav: None,
            validators: def.validators.clone(),
        })
    }

    fn build_nav_prop(&self, type_name: &str, def: &NavigationPropertyDef) -> Result<NavigationProperty> {
        if def.name.is_empty() {
            return Err(Error::metadata(format!(
                "navigation property on '{type_name}' has no name"
            )));
        }
        if def.entity_type_name.is_empty() {
            return Err(Error::metadata(format!(
                "navigation property '{}' on '{type_name}' has no entityTypeName",
                def.name
            )));
        }
        Ok(NavigationProperty {
            name: def.name.as_str().into(),
            entity_type_name: def.entity_type_name.as_str().into(),
            target: self.by_full_name.get(def.entity_type_name.as_str()).copied(),
            is_scalar: def.is_scalar,
            association_name: def.association_name.as_str().into(),
            foreign_key_names: def.foreign_key_names.iter().map(|s| s.as_str().into()).collect(),
            foreign_keys: Vec::new(),
            inv_foreign_key_names: def
                .inv_foreign_key_names
                .iter()
                .map(|s| s.as_str().into())
                .collect(),
            inv_foreign_keys: Vec::new(),
            inverse: None,
        })
    }

    fn type_id_for_complex(&self, name: &str) -> Option<TypeId> {
        self.by_full_name.get(name).copied()
    }

    /// Completes registrations that were waiting for the type that just
    /// realized.
    fn absorb_pending(&mut self, id: TypeId, full: &str) -> Result<()> {
        if let Some(waiting) = self.pending_complex.remove(full) {
            if !self.types[id.index()].is_complex_type() {
                return Err(Error::metadata(format!(
                    "'{full}' is referenced as a complex type but is an entity type"
                )));
            }
            for (tid, pid) in waiting {
                let prop = &mut self.types[tid.index()].data_properties[pid.index()];
                if let DataPropertyKind::Complex { target, .. } = &mut prop.kind {
                    *target = Some(id);
                }
            }
        }
        if let Some(waiting) = self.pending_navs.remove(full) {
            if !self.types[id.index()].is_entity_type() {
                return Err(Error::metadata(format!(
                    "'{full}' is referenced as a navigation target but is a complex type"
                )));
            }
            for (tid, nid) in waiting {
                self.types[tid.index()].navigation_properties[nid.index()].target = Some(id);
                self.resolve_nav(tid, nid)?;
            }
        }
        Ok(())
    }

    /// Wires up a navigation whose target type is known: maps foreign key
    /// columns on both sides and pairs inverse navigations by association
    /// name.
    fn resolve_nav(&mut self, owner: TypeId, nav: NavId) -> Result<()> {
        let (target, association_name, fk_names, inv_fk_names) = {
            let n = &self.types[owner.index()].navigation_properties[nav.index()];
            (
                n.target,
                n.association_name.clone(),
                n.foreign_key_names.clone(),
                n.inv_foreign_key_names.clone(),
            )
        };
        let Some(target) = target else {
            return Ok(());
        };

        let foreign_keys = self.resolve_columns(owner, &fk_names, nav, "foreignKeyNames")?;
        {
            let owner_ty = &mut self.types[owner.index()];
            for &pid in &foreign_keys {
                owner_ty.data_properties[pid.index()].related_nav = Some(nav);
            }
            owner_ty.navigation_properties[nav.index()].foreign_keys = foreign_keys;
        }

        let inv_foreign_keys = self.resolve_columns(target, &inv_fk_names, nav, "invForeignKeyNames")?;
        {
            let target_ty = &mut self.types[target.index()];
            for &pid in &inv_foreign_keys {
                target_ty.data_properties[pid.index()].inverse_nav = Some((owner, nav));
            }
        }
        self.types[owner.index()].navigation_properties[nav.index()].inv_foreign_keys =
            inv_foreign_keys;

        if !association_name.is_empty() {
            let inverse_at = self.types[target.index()]
                .navigation_properties
                .iter()
                .enumerate()
                .find(|(at, candidate)| {
                    candidate.association_name == association_name
                        && !(target == owner && *at == nav.index())
                })
                .map(|(at, _)| at);
            if let Some(at) = inverse_at {
                self.types[owner.index()].navigation_properties[nav.index()].inverse =
                    Some(nav_id(at));
                self.types[target.index()].navigation_properties[at].inverse = Some(nav);
            }
        }
        Ok(())
    }

    fn resolve_columns(
        &self,
        on: TypeId,
        names: &[Arc<str>],
        nav: NavId,
        role: &str,
    ) -> Result<Vec<PropId>> {
        let ty = &self.types[on.index()];
        names
            .iter()
            .map(|name| {
                ty.data_properties
                    .index_of(name)
                    .map(prop_id)
                    .ok_or_else(|| {
                        Error::metadata(format!(
                            "{role} of navigation {nav:?} names unknown column '{name}' on '{}'",
                            ty.full_name
                        ))
                    })
            })
            .collect()
    }

    fn export_def(&self, ty: &StructuralType) -> TypeDef {
        let mut def = TypeDef {
            short_name: ty.short_name.to_string(),
            namespace: ty.namespace.to_string(),
            is_complex_type: ty.is_complex_type(),
            base_type_name: ty.base_type_name.as_ref().map(ToString::to_string),
            is_abstract: ty.is_abstract,
            validators: ty.validators.clone(),
            ..TypeDef::default()
        };
        if let Some(facts) = ty.entity_facts() {
            def.auto_generated_key_type = facts.auto_generated_key_type;
            def.default_resource_name =
                facts.default_resource_name.as_ref().map(ToString::to_string);
        }
        for prop in ty.data_properties.iter().skip(ty.inherited_data_count) {
            def.data_properties.push(DataPropertyDef {
                name: prop.name.to_string(),
                data_type: prop.scalar_type(),
                complex_type_name: match &prop.kind {
                    DataPropertyKind::Complex { type_name, .. } => Some(type_name.to_string()),
                    DataPropertyKind::Scalar(_) => None,
                },
                is_nullable: prop.nullable,
                is_part_of_key: prop.part_of_key,
                concurrency_mode: prop.concurrency_mode,
                max_length: prop.max_length,
                default_value: prop.default_value.as_ref().map(daybook_foundation::Value::to_json),
                validators: prop.validators.clone(),
            });
        }
        for nav in ty.navigation_properties.iter().skip(ty.inherited_nav_count) {
            def.navigation_properties.push(NavigationPropertyDef {
                name: nav.name.to_string(),
                entity_type_name: nav.entity_type_name.to_string(),
                is_scalar: nav.is_scalar,
                association_name: nav.association_name.to_string(),
                foreign_key_names: nav.foreign_key_names.iter().map(ToString::to_string).collect(),
                inv_foreign_key_names: nav
                    .inv_foreign_key_names
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            });
        }
        def
    }
}

impl std::ops::Index<TypeId> for MetadataStore {
    type Output = StructuralType;

    fn index(&self, id: TypeId) -> &StructuralType {
        &self.types[id.index()]
    }
}
