//! Metadata document forms.
//!
//! These are the shapes metadata travels in: fetched from a service,
//! exported for offline use, or built inline by application code. A
//! [`crate::MetadataStore`] turns them into resolved structural types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use daybook_foundation::{DataType, Error, Result};

use crate::naming::NamingConvention;
use crate::property::{AutoGeneratedKeyType, ConcurrencyMode};

/// A whole metadata document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataDocument {
    /// Free-form version marker, carried through round trips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_version: Option<String>,
    /// Naming convention for payloads from the same service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub naming_convention: Option<NamingConvention>,
    /// Entity and complex type definitions, in any order.
    pub structural_types: Vec<TypeDef>,
    /// Maps service resource names to entity type names.
    pub resource_entity_type_map: BTreeMap<String, String>,
}

impl MetadataDocument {
    /// Parses a document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a metadata error if the text is not a valid document.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::metadata(e.to_string()))
    }

    /// Renders this document as JSON text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if rendering fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::metadata(e.to_string()))
    }

    /// Adds a type definition.
    #[must_use]
    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.structural_types.push(def);
        self
    }

    /// Maps a resource name to an entity type name.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.resource_entity_type_map
            .insert(resource.into(), type_name.into());
        self
    }
}

/// Definition of one structural type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeDef {
    /// Unqualified type name.
    pub short_name: String,
    /// Namespace, possibly empty.
    pub namespace: String,
    /// True for complex types, false for entity types.
    pub is_complex_type: bool,
    /// Name of the base type, if this type inherits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type_name: Option<String>,
    /// Abstract types cannot be instantiated.
    pub is_abstract: bool,
    /// How key values for new instances come to exist.
    pub auto_generated_key_type: AutoGeneratedKeyType,
    /// The service resource queried for this type by default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_resource_name: Option<String>,
    /// Data property definitions.
    pub data_properties: Vec<DataPropertyDef>,
    /// Navigation property definitions.
    pub navigation_properties: Vec<NavigationPropertyDef>,
    /// Type-level validator configurations.
    pub validators: Vec<serde_json::Value>,
}

impl Default for TypeDef {
    fn default() -> Self {
        Self {
            short_name: String::new(),
            namespace: String::new(),
            is_complex_type: false,
            base_type_name: None,
            is_abstract: false,
            auto_generated_key_type: AutoGeneratedKeyType::None,
            default_resource_name: None,
            data_properties: Vec::new(),
            navigation_properties: Vec::new(),
            validators: Vec::new(),
        }
    }
}

impl TypeDef {
    /// Starts an entity type definition.
    #[must_use]
    pub fn entity(short_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Starts a complex type definition.
    #[must_use]
    pub fn complex(short_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            namespace: namespace.into(),
            is_complex_type: true,
            ..Self::default()
        }
    }

    /// Declares a base type.
    #[must_use]
    pub fn with_base(mut self, base_type_name: impl Into<String>) -> Self {
        self.base_type_name = Some(base_type_name.into());
        self
    }

    /// Marks the type abstract.
    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Sets the auto-generated key mode.
    #[must_use]
    pub fn with_auto_key(mut self, auto: AutoGeneratedKeyType) -> Self {
        self.auto_generated_key_type = auto;
        self
    }

    /// Sets the default resource name.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.default_resource_name = Some(resource.into());
        self
    }

    /// Adds a data property.
    #[must_use]
    pub fn with_data(mut self, prop: DataPropertyDef) -> Self {
        self.data_properties.push(prop);
        self
    }

    /// Adds a navigation property.
    #[must_use]
    pub fn with_nav(mut self, nav: NavigationPropertyDef) -> Self {
        self.navigation_properties.push(nav);
        self
    }

    /// Adds a type-level validator configuration.
    #[must_use]
    pub fn with_validator(mut self, config: serde_json::Value) -> Self {
        self.validators.push(config);
        self
    }
}

/// Definition of one data property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataPropertyDef {
    /// Property name.
    pub name: String,
    /// Scalar data type; absent for complex properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    /// Complex type name; absent for scalar properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complex_type_name: Option<String>,
    /// Whether nil is an acceptable stored value.
    pub is_nullable: bool,
    /// Whether this property is part of the key.
    pub is_part_of_key: bool,
    /// Concurrency participation.
    pub concurrency_mode: ConcurrencyMode,
    /// Maximum string length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Default value for fresh instances, as a JSON scalar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    /// Property-level validator configurations.
    pub validators: Vec<serde_json::Value>,
}

impl Default for DataPropertyDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            data_type: None,
            complex_type_name: None,
            is_nullable: true,
            is_part_of_key: false,
            concurrency_mode: ConcurrencyMode::None,
            max_length: None,
            default_value: None,
            validators: Vec::new(),
        }
    }
}

impl DataPropertyDef {
    /// Starts a nullable scalar property.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type),
            ..Self::default()
        }
    }

    /// Starts a key property. Key properties are never nullable.
    #[must_use]
    pub fn key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type),
            is_nullable: false,
            is_part_of_key: true,
            ..Self::default()
        }
    }

    /// Starts a complex property.
    #[must_use]
    pub fn complex(name: impl Into<String>, complex_type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            complex_type_name: Some(complex_type_name.into()),
            is_nullable: false,
            ..Self::default()
        }
    }

    /// Makes the property required (non-nullable).
    #[must_use]
    pub fn required(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Sets the maximum string length.
    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Opts the property into optimistic concurrency checks.
    #[must_use]
    pub fn with_concurrency(mut self) -> Self {
        self.concurrency_mode = ConcurrencyMode::Fixed;
        self
    }

    /// Sets the default value for fresh instances.
    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Adds a property-level validator configuration.
    #[must_use]
    pub fn with_validator(mut self, config: serde_json::Value) -> Self {
        self.validators.push(config);
        self
    }
}

/// Definition of one navigation property.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationPropertyDef {
    /// Property name.
    pub name: String,
    /// Target entity type name.
    pub entity_type_name: String,
    /// True for a to-one reference, false for a to-many collection.
    pub is_scalar: bool,
    /// Groups this navigation with its inverse on the target type.
    pub association_name: String,
    /// Foreign key column names on the declaring type.
    pub foreign_key_names: Vec<String>,
    /// Foreign key column names on the target type, for relationships
    /// navigable only from this side.
    pub inv_foreign_key_names: Vec<String>,
}

impl NavigationPropertyDef {
    /// Starts a to-one navigation.
    #[must_use]
    pub fn to_one(
        name: impl Into<String>,
        entity_type_name: impl Into<String>,
        association_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type_name: entity_type_name.into(),
            is_scalar: true,
            association_name: association_name.into(),
            ..Self::default()
        }
    }

    /// Starts a to-many navigation.
    #[must_use]
    pub fn to_many(
        name: impl Into<String>,
        entity_type_name: impl Into<String>,
        association_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type_name: entity_type_name.into(),
            is_scalar: false,
            association_name: association_name.into(),
            ..Self::default()
        }
    }

    /// Adds a foreign key column on the declaring type.
    #[must_use]
    pub fn with_foreign_key(mut self, name: impl Into<String>) -> Self {
        self.foreign_key_names.push(name.into());
        self
    }

    /// Adds a foreign key column on the target type.
    #[must_use]
    pub fn with_inv_foreign_key(mut self, name: impl Into<String>) -> Self {
        self.inv_foreign_key_names.push(name.into());
        self
    }
}
