//! Integration tests for save orchestration
//!
//! Whole waves of changes: bundling with concurrency originals, key
//! reconciliation across a freshly built graph, and the echo merge.

use daybook_foundation::{EntityKey, EntityState, MergeStrategy, Value};
use daybook_remote::{
    InMemorySaveAdapter, KeyMapping, SaveOptions, SaveResult, SavedEntity, merge_entity,
    merge_payload, save_changes,
};
use serde_json::json;

use crate::support::{commerce_cache, tid};

fn mapping(type_name: &str, temp: i64, real: i64) -> KeyMapping {
    KeyMapping {
        type_name: type_name.to_string(),
        temp_value: json!(temp),
        real_value: json!(real),
    }
}

fn echo(type_name: &str, values: serde_json::Value) -> SavedEntity {
    SavedEntity {
        type_name: type_name.to_string(),
        values: values.as_object().cloned().unwrap_or_default(),
    }
}

// =============================================================================
// Key reconciliation
// =============================================================================

#[test_log::test(tokio::test)]
async fn a_new_order_for_a_new_customer_saves_and_rekeys() {
    let mut cache = commerce_cache();
    let customer_t = tid(&cache, "Shop.Customer");
    let order_t = tid(&cache, "Shop.Order");

    let customer = cache.new_entity("Shop.Customer").unwrap();
    cache.set_value_by_name(customer, "Name", "Acme").unwrap();
    let order = cache.new_entity("Shop.Order").unwrap();
    let customer_nav = cache.nav_prop(order_t, "Customer").unwrap();
    cache.set_nav(order, customer_nav, Some(customer)).unwrap();

    let adapter = InMemorySaveAdapter::new();
    adapter.stage(SaveResult {
        saved: vec![
            echo("Shop.Customer", json!({"Id": 17, "Name": "Acme"})),
            echo(
                "Shop.Order",
                json!({"Id": 500, "CustomerId": 17, "Total": 99.5}),
            ),
        ],
        key_mappings: vec![
            mapping("Shop.Customer", -1, 17),
            mapping("Shop.Order", -2, 500),
        ],
    });

    let report = save_changes(&mut cache, &adapter, &SaveOptions::new())
        .await
        .unwrap();

    // The bundle went out under placeholder keys, with nothing to
    // back up for brand-new rows.
    let bundles = adapter.bundles();
    let bundle = &bundles[0];
    assert_eq!(bundle.entities.len(), 2);
    let sent_customer = bundle
        .entities
        .iter()
        .find(|e| e.type_name == "Shop.Customer")
        .unwrap();
    assert!(sent_customer.has_temp_key);
    assert_eq!(sent_customer.values.get("Id"), Some(&json!(-1)));
    assert!(sent_customer.original_values.is_empty());
    let sent_order = bundle
        .entities
        .iter()
        .find(|e| e.type_name == "Shop.Order")
        .unwrap();
    assert_eq!(sent_order.values.get("Id"), Some(&json!(-2)));
    assert_eq!(sent_order.values.get("CustomerId"), Some(&json!(-1)));

    // Real keys landed everywhere the placeholders were, the link
    // survived, and the server-computed total merged in.
    assert_eq!(
        cache.key(customer).unwrap(),
        EntityKey::single(customer_t, Value::from(17))
    );
    assert_eq!(
        cache.key(order).unwrap(),
        EntityKey::single(order_t, Value::from(500))
    );
    assert_eq!(
        cache.value_by_name(order, "CustomerId").unwrap(),
        Value::from(17)
    );
    assert_eq!(cache.nav_target(order, customer_nav).unwrap(), customer);
    assert_eq!(cache.state(customer).unwrap(), EntityState::Unchanged);
    assert_eq!(cache.state(order).unwrap(), EntityState::Unchanged);
    assert_eq!(
        cache.value_by_name(order, "Total").unwrap(),
        Value::from(99.5)
    );

    assert_eq!(report.saved.len(), 2);
    assert!(report.saved.contains(&customer));
    assert!(report.saved.contains(&order));
    assert_eq!(report.key_mappings.len(), 2);
}

// =============================================================================
// Concurrency originals
// =============================================================================

#[test_log::test(tokio::test)]
async fn pre_edit_values_ride_along_for_concurrency_checks() {
    let mut cache = commerce_cache();
    let eref = merge_entity(
        &mut cache,
        &json!({"Id": 1, "Name": "Acme", "ShipTo": {"Street": "1 Main St"}}),
        "Shop.Customer",
        MergeStrategy::PreserveChanges,
    )
    .unwrap();
    cache.set_value_by_name(eref, "Name", "Acme Ltd").unwrap();
    let ship_to = cache.data_prop(eref.type_id, "ShipTo").unwrap();
    let street = cache
        .data_prop(tid(&cache, "Shop.Address"), "Street")
        .unwrap();
    cache
        .set_value_path(eref, &[ship_to, street], Value::from("2 Oak Ave"))
        .unwrap();

    let adapter = InMemorySaveAdapter::new();
    adapter.stage(SaveResult::default());
    let report = save_changes(&mut cache, &adapter, &SaveOptions::new())
        .await
        .unwrap();

    let bundles = adapter.bundles();
    let sent = &bundles[0].entities[0];
    assert_eq!(sent.state, EntityState::Modified);
    assert!(!sent.has_temp_key);
    assert_eq!(sent.values.get("Name"), Some(&json!("Acme Ltd")));
    assert_eq!(
        sent.values.get("ShipTo").and_then(|v| v.get("Street")),
        Some(&json!("2 Oak Ave"))
    );
    assert_eq!(sent.original_values.get("Name"), Some(&json!("Acme")));
    assert_eq!(
        sent.original_values.get("ShipTo.Street"),
        Some(&json!("1 Main St"))
    );

    assert_eq!(report.saved, vec![eref]);
    assert_eq!(cache.state(eref).unwrap(), EntityState::Unchanged);
}

// =============================================================================
// Mixed waves
// =============================================================================

#[test_log::test(tokio::test)]
async fn a_mixed_wave_settles_every_pending_state() {
    let mut cache = commerce_cache();
    let customer_t = tid(&cache, "Shop.Customer");
    let seeded = merge_payload(
        &mut cache,
        &json!([{"Id": 1, "Name": "Keep"}, {"Id": 2, "Name": "Drop"}]),
        customer_t,
        MergeStrategy::PreserveChanges,
    )
    .unwrap();
    let (edited, doomed) = (seeded.refs[0], seeded.refs[1]);
    cache.set_value_by_name(edited, "Name", "Keep v2").unwrap();
    cache.delete(doomed).unwrap();
    let added = cache.new_entity("Shop.Customer").unwrap();
    cache.set_value_by_name(added, "Name", "New").unwrap();

    let adapter = InMemorySaveAdapter::new();
    adapter.stage(SaveResult {
        saved: vec![],
        key_mappings: vec![mapping("Shop.Customer", -1, 30)],
    });
    let report = save_changes(&mut cache, &adapter, &SaveOptions::new())
        .await
        .unwrap();

    let bundles = adapter.bundles();
    let bundle = &bundles[0];
    assert_eq!(bundle.entities.len(), 3);
    let sent = |state: EntityState| bundle.entities.iter().find(|e| e.state == state).unwrap();
    assert!(sent(EntityState::Added).has_temp_key);
    assert_eq!(sent(EntityState::Modified).values.get("Id"), Some(&json!(1)));
    assert_eq!(sent(EntityState::Deleted).values.get("Id"), Some(&json!(2)));

    // Accepted deletions detach and stay out of the report.
    assert_eq!(report.saved.len(), 2);
    assert!(!report.saved.contains(&doomed));
    assert!(cache.state(doomed).is_err());
    assert!(
        cache
            .find_including_deleted(&EntityKey::single(customer_t, Value::from(2)))
            .is_none()
    );

    assert_eq!(cache.state(edited).unwrap(), EntityState::Unchanged);
    assert_eq!(
        cache.key(added).unwrap(),
        EntityKey::single(customer_t, Value::from(30))
    );
    assert_eq!(cache.state(added).unwrap(), EntityState::Unchanged);
    assert!(!cache.has_changes());
}
