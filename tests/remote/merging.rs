//! Integration tests for payload merging
//!
//! Whole feeds at once: naming translation, subtype discriminators, and
//! per-entity merge dispositions all working over one document.

use daybook_cache::EntityCache;
use daybook_foundation::{
    DataType, EntityKey, EntityState, EntityVersion, MergeStrategy, Value,
};
use daybook_metadata::{DataPropertyDef, MetadataStore, NamingConvention, TypeDef};
use daybook_remote::merge_payload;
use serde_json::json;

use crate::support::{commerce_cache, commerce_doc, tid};

// =============================================================================
// Wire translation
// =============================================================================

#[test]
fn a_camel_case_feed_lands_under_client_names() {
    let mut doc = commerce_doc().with_type(
        TypeDef::entity("PremiumCustomer", "Shop")
            .with_base("Shop.Customer")
            .with_data(DataPropertyDef::new("Tier", DataType::String)),
    );
    doc.naming_convention = Some(NamingConvention::CamelCase);
    let mut store = MetadataStore::new();
    store.add_document(&doc).unwrap();
    let mut cache = EntityCache::new(store);

    let payload = json!({
        "results": [
            {"$type": "Shop.PremiumCustomer, Shop.Client",
             "id": 10, "name": "Acme", "tier": "Gold",
             "shipTo": {"street": "1 Main St"},
             "serverOnly": {"a": 1}},
            {"id": 11, "name": "Bronze"},
        ]
    });
    let customer_t = tid(&cache, "Shop.Customer");
    let result = merge_payload(
        &mut cache,
        &payload,
        customer_t,
        MergeStrategy::PreserveChanges,
    )
    .unwrap();

    let premium = result.refs[0];
    assert_eq!(premium.type_id, tid(&cache, "Shop.PremiumCustomer"));
    assert_eq!(
        cache.value_by_name(premium, "Name").unwrap(),
        Value::from("Acme")
    );
    assert_eq!(
        cache.value_by_name(premium, "Tier").unwrap(),
        Value::from("Gold")
    );

    let ship_to = cache.data_prop(premium.type_id, "ShipTo").unwrap();
    let address_t = tid(&cache, "Shop.Address");
    let street = cache.data_prop(address_t, "Street").unwrap();
    assert_eq!(
        cache
            .value_path(premium, &[ship_to, street], EntityVersion::Current)
            .unwrap(),
        Value::from("1 Main St")
    );

    // Keys with no metadata are kept, filed under their client spelling.
    assert_eq!(
        cache.unmapped(premium).unwrap().get("ServerOnly"),
        Some(&json!({"a": 1}))
    );

    assert_eq!(
        cache.value_by_name(result.refs[1], "Name").unwrap(),
        Value::from("Bronze")
    );
    assert_eq!(cache.state(result.refs[1]).unwrap(), EntityState::Unchanged);
}

// =============================================================================
// Merge dispositions
// =============================================================================

#[test]
fn one_feed_respects_each_entitys_disposition() {
    let mut cache = commerce_cache();
    let customer_t = tid(&cache, "Shop.Customer");
    let seeded = merge_payload(
        &mut cache,
        &json!([
            {"Id": 1, "Name": "One"},
            {"Id": 2, "Name": "Two"},
            {"Id": 3, "Name": "Three"},
        ]),
        customer_t,
        MergeStrategy::PreserveChanges,
    )
    .unwrap();
    let (edited, clean, doomed) = (seeded.refs[0], seeded.refs[1], seeded.refs[2]);
    cache.set_value_by_name(edited, "Name", "One local").unwrap();
    cache.delete(doomed).unwrap();

    merge_payload(
        &mut cache,
        &json!([
            {"Id": 1, "Name": "One v2"},
            {"Id": 2, "Name": "Two v2"},
            {"Id": 3, "Name": "Three v2"},
            {"Id": 4, "Name": "Four"},
        ]),
        customer_t,
        MergeStrategy::PreserveChanges,
    )
    .unwrap();

    // Pending edits survive, the deletion stands, clean rows update.
    assert_eq!(
        cache.value_by_name(edited, "Name").unwrap(),
        Value::from("One local")
    );
    assert_eq!(cache.state(edited).unwrap(), EntityState::Modified);
    assert_eq!(
        cache.value_by_name(clean, "Name").unwrap(),
        Value::from("Two v2")
    );
    assert_eq!(cache.state(clean).unwrap(), EntityState::Unchanged);
    assert_eq!(cache.state(doomed).unwrap(), EntityState::Deleted);
    assert!(cache.find(&EntityKey::single(customer_t, Value::from(3))).is_none());

    let newcomer = cache
        .find(&EntityKey::single(customer_t, Value::from(4)))
        .unwrap();
    assert_eq!(
        cache.value_by_name(newcomer, "Name").unwrap(),
        Value::from("Four")
    );
    assert_eq!(cache.state(newcomer).unwrap(), EntityState::Unchanged);
    assert_eq!(cache.changes().len(), 2);
}

#[test]
fn deleted_rows_return_only_when_overwritten() {
    let mut cache = commerce_cache();
    let customer_t = tid(&cache, "Shop.Customer");
    let seeded = merge_payload(
        &mut cache,
        &json!([{"Id": 1, "Name": "Acme"}]),
        customer_t,
        MergeStrategy::PreserveChanges,
    )
    .unwrap();
    let acme = seeded.refs[0];
    cache.delete(acme).unwrap();
    let key = EntityKey::single(customer_t, Value::from(1));

    merge_payload(
        &mut cache,
        &json!([{"Id": 1, "Name": "Acme v2"}]),
        customer_t,
        MergeStrategy::PreserveChanges,
    )
    .unwrap();
    assert_eq!(cache.state(acme).unwrap(), EntityState::Deleted);
    assert!(cache.find(&key).is_none());

    merge_payload(
        &mut cache,
        &json!([{"Id": 1, "Name": "Acme v2"}]),
        customer_t,
        MergeStrategy::OverwriteChanges,
    )
    .unwrap();
    assert_eq!(cache.state(acme).unwrap(), EntityState::Unchanged);
    assert_eq!(cache.find(&key), Some(acme));
    assert_eq!(
        cache.value_by_name(acme, "Name").unwrap(),
        Value::from("Acme v2")
    );
}
