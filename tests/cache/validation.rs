//! Integration tests for metadata-driven validation
//!
//! Implicit rules come from property facts, configured rules from the
//! metadata document through the rule registry. Failures are stored on
//! the entity, never thrown.

use daybook_cache::{
    DetachedEntity, EntityCache, ValidationContext, ValidationError, ValidationRule,
};
use daybook_foundation::{DataType, EntityRef, ErrorKind, Value};
use daybook_metadata::{
    AutoGeneratedKeyType, DataPropertyDef, MetadataDocument, MetadataStore, TypeDef,
};
use serde_json::json;

/// A product catalog exercising every rule source: a required property
/// with a declared maximum, a configured validator, and an open lane for
/// custom rules.
fn catalog() -> EntityCache {
    let doc = MetadataDocument::default().with_type(
        TypeDef::entity("Product", "Shop")
            .with_auto_key(AutoGeneratedKeyType::Identity)
            .with_resource("Products")
            .with_data(DataPropertyDef::key("Id", DataType::Int))
            .with_data(
                DataPropertyDef::new("Sku", DataType::String)
                    .required()
                    .with_max_length(8),
            )
            .with_data(
                DataPropertyDef::new("Name", DataType::String)
                    .with_validator(json!({"name": "maxLength", "maxLength": 4})),
            )
            .with_data(DataPropertyDef::new("Price", DataType::Float)),
    );
    let mut store = MetadataStore::new();
    store.add_document(&doc).unwrap();
    EntityCache::new(store)
}

fn product(cache: &mut EntityCache, id: i64, sku: &str) -> EntityRef {
    let store = cache.metadata();
    let mut p = DetachedEntity::new(store, "Shop.Product").unwrap();
    p.set(store, "Id", id).unwrap();
    p.set(store, "Sku", sku).unwrap();
    cache.attach_queried(p).unwrap()
}

// =============================================================================
// Implicit rules from property facts
// =============================================================================

#[test]
fn missing_required_values_are_reported() {
    let mut cache = catalog();
    let p = cache.new_entity("Shop.Product").unwrap();

    let failures = cache.validate_entity(p).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(&*failures[0].rule_name, "required");
    assert_eq!(failures[0].property.as_deref(), Some("Sku"));

    // Failures stay queryable on the entity until the next run.
    assert!(cache.has_errors(p).unwrap());
    assert_eq!(cache.errors(p).unwrap(), failures.as_slice());

    cache.set_value_by_name(p, "Sku", "AB-1").unwrap();
    assert!(cache.validate_entity(p).unwrap().is_empty());
    assert!(!cache.has_errors(p).unwrap());
}

#[test]
fn long_strings_fail_their_declared_maximum() {
    let mut cache = catalog();
    let p = product(&mut cache, 1, "AB-123-XYZ");

    let failures = cache.validate_entity(p).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(&*failures[0].rule_name, "maxLength");
    assert_eq!(failures[0].property.as_deref(), Some("Sku"));
}

#[test]
fn length_counts_characters_not_bytes() {
    let mut cache = catalog();
    // Eight characters, sixteen bytes.
    let p = product(&mut cache, 1, "éléphant");
    assert!(cache.validate_entity(p).unwrap().is_empty());
}

// =============================================================================
// Configured rules
// =============================================================================

#[test]
fn document_validators_run_through_the_registry() {
    let mut cache = catalog();
    let p = product(&mut cache, 1, "OK");
    cache.set_value_by_name(p, "Name", "Tooling").unwrap();

    let failures = cache.validate_entity(p).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(&*failures[0].rule_name, "maxLength");
    assert_eq!(failures[0].property.as_deref(), Some("Name"));

    cache.set_value_by_name(p, "Name", "Tool").unwrap();
    assert!(cache.validate_entity(p).unwrap().is_empty());
}

#[derive(Debug)]
struct Positive;

impl ValidationRule for Positive {
    fn name(&self) -> &str {
        "positive"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationError> {
        match ctx.value.as_number() {
            Some(n) if n < 0.0 => vec![ValidationError::on_property(
                self.name(),
                ctx.subject(),
                "must not be negative",
            )],
            _ => Vec::new(),
        }
    }
}

#[test]
fn custom_rules_register_by_name() {
    let doc = MetadataDocument::default().with_type(
        TypeDef::entity("Product", "Shop")
            .with_auto_key(AutoGeneratedKeyType::Identity)
            .with_data(DataPropertyDef::key("Id", DataType::Int))
            .with_data(
                DataPropertyDef::new("Price", DataType::Float)
                    .with_validator(json!({"name": "positive"})),
            ),
    );
    let mut store = MetadataStore::new();
    store.add_document(&doc).unwrap();
    let mut cache = EntityCache::new(store);
    let p = cache.new_entity("Shop.Product").unwrap();
    cache.set_value_by_name(p, "Price", -3.5).unwrap();

    // The configuration names a rule nobody registered yet.
    let err = cache.validate_entity(p).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::MetadataError(_)));

    cache
        .rule_registry_mut()
        .register("positive", |_| Ok(Box::new(Positive)));

    let failures = cache.validate_entity(p).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(&*failures[0].rule_name, "positive");

    cache.set_value_by_name(p, "Price", 3.5).unwrap();
    assert!(cache.validate_entity(p).unwrap().is_empty());
}

// =============================================================================
// Scope
// =============================================================================

#[test]
fn complex_members_validate_under_dotted_names() {
    let doc = MetadataDocument::default()
        .with_type(
            TypeDef::complex("Spec", "Shop")
                .with_data(DataPropertyDef::new("Unit", DataType::String).required()),
        )
        .with_type(
            TypeDef::entity("Product", "Shop")
                .with_auto_key(AutoGeneratedKeyType::Identity)
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::complex("Spec", "Shop.Spec")),
        );
    let mut store = MetadataStore::new();
    store.add_document(&doc).unwrap();
    let mut cache = EntityCache::new(store);
    let p = cache.new_entity("Shop.Product").unwrap();

    let failures = cache.validate_entity(p).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].property.as_deref(), Some("Spec.Unit"));

    let spec = cache.data_prop(p.type_id, "Spec").unwrap();
    let spec_type = cache.metadata().type_id("Shop.Spec").unwrap();
    let unit = cache.data_prop(spec_type, "Unit").unwrap();
    cache.set_value_path(p, &[spec, unit], Value::from("kg")).unwrap();
    assert!(cache.validate_entity(p).unwrap().is_empty());
}

#[test]
fn validate_changes_counts_pending_entities_only() {
    let mut cache = catalog();

    // Unchanged entities never validate, even when invalid.
    product(&mut cache, 1, "TOO-LONG-FOR-8");
    // One required failure.
    cache.new_entity("Shop.Product").unwrap();
    // One max length failure.
    let dirty = product(&mut cache, 2, "OK");
    cache.set_value_by_name(dirty, "Sku", "TOO-LONG-FOR-8").unwrap();
    // Deletions skip validation.
    let doomed = product(&mut cache, 3, "OK");
    cache.delete(doomed).unwrap();

    assert_eq!(cache.validate_changes().unwrap(), 2);
}
