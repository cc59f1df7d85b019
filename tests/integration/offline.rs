//! Offline sessions: edits exported in one process, imported and saved
//! in another.

use daybook_cache::EntityCache;
use daybook_foundation::{EntityKey, EntityState, EntityVersion, MergeStrategy, Value};
use daybook_metadata::MetadataStore;
use daybook_remote::{
    CacheExport, InMemorySaveAdapter, KeyMapping, SaveOptions, SaveResult, export_entities,
    import_entities, merge_payload, save_changes,
};
use serde_json::json;

use crate::support::{commerce_cache, tid};

/// Runs a session that queried one customer with one order, renamed the
/// customer, deleted the order, placed a new one, and exported the lot.
fn exported_session() -> String {
    let mut cache = commerce_cache();
    let customer_t = tid(&cache, "Shop.Customer");
    let seeded = merge_payload(
        &mut cache,
        &json!([
            {"Id": 1, "Name": "Acme", "Orders": [
                {"Id": 100, "CustomerId": 1, "Total": 10.0},
            ]},
        ]),
        customer_t,
        MergeStrategy::PreserveChanges,
    )
    .unwrap();
    let customer = seeded.refs[0];
    cache.set_value_by_name(customer, "Name", "Acme Ltd").unwrap();

    let order_t = tid(&cache, "Shop.Order");
    let doomed = cache
        .find(&EntityKey::single(order_t, Value::from(100)))
        .unwrap();
    cache.delete(doomed).unwrap();

    let placed = cache.new_entity("Shop.Order").unwrap();
    cache.set_value_by_name(placed, "Total", 30.0).unwrap();
    let customer_nav = cache.nav_prop(order_t, "Customer").unwrap();
    cache.set_nav(placed, customer_nav, Some(customer)).unwrap();

    export_entities(&cache, None).unwrap().to_json().unwrap()
}

fn import_into_fresh_cache(text: &str) -> EntityCache {
    let export = CacheExport::parse(text).unwrap();
    let mut store = MetadataStore::new();
    store.add_document(&export.metadata).unwrap();
    let mut cache = EntityCache::new(store);
    let imported =
        import_entities(&mut cache, &export, MergeStrategy::PreserveChanges).unwrap();
    assert_eq!(imported.len(), 3);
    cache
}

#[test]
fn pending_changes_survive_the_round_trip() {
    let text = exported_session();
    assert_eq!(CacheExport::parse(&text).unwrap().entity_count(), 3);
    let mut cache = import_into_fresh_cache(&text);
    let customer_t = tid(&cache, "Shop.Customer");
    let order_t = tid(&cache, "Shop.Order");

    // The rename came through, backup and all.
    let customer = cache
        .find(&EntityKey::single(customer_t, Value::from(1)))
        .unwrap();
    assert_eq!(cache.state(customer).unwrap(), EntityState::Modified);
    assert_eq!(
        cache.value_by_name(customer, "Name").unwrap(),
        Value::from("Acme Ltd")
    );
    let name = cache.data_prop(customer_t, "Name").unwrap();
    assert_eq!(
        cache.value_at(customer, name, EntityVersion::Original).unwrap(),
        Value::from("Acme")
    );

    // The deletion still hides from queries and still awaits its save.
    let old_key = EntityKey::single(order_t, Value::from(100));
    assert!(cache.find(&old_key).is_none());
    let doomed = cache.find_including_deleted(&old_key).unwrap();
    assert_eq!(cache.state(doomed).unwrap(), EntityState::Deleted);

    // The new order kept its placeholder key and its link.
    let placed = cache
        .find(&EntityKey::single(order_t, Value::from(-1)))
        .unwrap();
    assert_eq!(cache.state(placed).unwrap(), EntityState::Added);
    let customer_nav = cache.nav_prop(order_t, "Customer").unwrap();
    assert_eq!(cache.nav_target(placed, customer_nav).unwrap(), customer);

    // The importing generator fenced itself off the imported placeholder.
    let another = cache.new_entity("Shop.Order").unwrap();
    assert_eq!(
        cache.key(another).unwrap(),
        EntityKey::single(order_t, Value::from(-2))
    );
}

#[test_log::test(tokio::test)]
async fn an_imported_session_saves_like_the_original() {
    let mut cache = import_into_fresh_cache(&exported_session());
    let order_t = tid(&cache, "Shop.Order");

    let adapter = InMemorySaveAdapter::new();
    adapter.stage(SaveResult {
        saved: vec![],
        key_mappings: vec![KeyMapping {
            type_name: "Shop.Order".to_string(),
            temp_value: json!(-1),
            real_value: json!(900),
        }],
    });
    let report = save_changes(&mut cache, &adapter, &SaveOptions::new())
        .await
        .unwrap();

    // The bundle carries exactly what the first session left pending.
    let bundles = adapter.bundles();
    let entities = &bundles[0].entities;
    assert_eq!(entities.len(), 3);
    let sent = |state: EntityState| entities.iter().find(|e| e.state == state).unwrap();
    assert_eq!(sent(EntityState::Modified).values.get("Name"), Some(&json!("Acme Ltd")));
    assert_eq!(
        sent(EntityState::Modified).original_values.get("Name"),
        Some(&json!("Acme"))
    );
    assert!(sent(EntityState::Added).has_temp_key);
    assert_eq!(
        sent(EntityState::Added).values.get("CustomerId"),
        Some(&json!(1))
    );
    assert_eq!(sent(EntityState::Deleted).values.get("Id"), Some(&json!(100)));

    // Settled, keyed, and empty-handed.
    assert_eq!(report.saved.len(), 2);
    assert!(!cache.has_changes());
    let placed = cache
        .find(&EntityKey::single(order_t, Value::from(900)))
        .unwrap();
    assert_eq!(cache.state(placed).unwrap(), EntityState::Unchanged);
    assert!(
        cache
            .find_including_deleted(&EntityKey::single(order_t, Value::from(100)))
            .is_none()
    );
}
