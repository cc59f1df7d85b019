//! A complete online session, from empty client to settled save.

use daybook_cache::EntityCache;
use daybook_foundation::{EntityKey, EntityState, Value};
use daybook_metadata::MetadataStore;
use daybook_remote::{
    InMemoryDataService, InMemorySaveAdapter, KeyMapping, METADATA_RESOURCE, MetadataFetcher,
    Query, SaveOptions, SaveResult, SavedEntity, execute_query, save_changes,
};
use serde_json::json;

use crate::support::{commerce_doc, tid};

#[test_log::test(tokio::test)]
async fn a_session_boots_queries_edits_and_saves() {
    let service = InMemoryDataService::new("shop");
    service.stage(METADATA_RESOURCE, commerce_doc().to_json().unwrap());
    service.stage(
        "Customers?$expand=Orders",
        json!({
            "results": [
                {"Id": 1, "Name": "Acme", "Orders": [
                    {"Id": 100, "CustomerId": 1, "Total": 10.0},
                    {"Id": 101, "CustomerId": 1, "Total": 20.0},
                ]},
            ],
            "inlineCount": 1
        })
        .to_string(),
    );

    // Boot: the schema comes down before anything else.
    let fetcher = MetadataFetcher::new();
    let mut store = MetadataStore::new();
    fetcher.fetch_into(&mut store, &service).await.unwrap();
    let mut cache = EntityCache::new(store);
    assert_eq!(cache.metadata().len(), 3);

    // Query: one round trip lands the linked graph.
    let result = execute_query(
        &mut cache,
        &service,
        &Query::from("Customers?$expand=Orders"),
    )
    .await
    .unwrap();
    let customer = result.refs[0];
    let order_t = tid(&cache, "Shop.Order");
    let orders_nav = cache.nav_prop(customer.type_id, "Orders").unwrap();
    let customer_nav = cache.nav_prop(order_t, "Customer").unwrap();
    let orders = cache.nav_items(customer, orders_nav).unwrap();
    assert_eq!(orders.len(), 2);
    assert!(!cache.has_changes());

    // Edit: rename the customer, drop one order, write a new one.
    cache.set_value_by_name(customer, "Name", "Acme Ltd").unwrap();
    let doomed = orders[1];
    cache.delete(doomed).unwrap();
    let placed = cache.new_entity("Shop.Order").unwrap();
    cache.set_value_by_name(placed, "Total", 30.0).unwrap();
    cache.set_nav(placed, customer_nav, Some(customer)).unwrap();
    assert_eq!(cache.changes().len(), 3);

    // Save: the server assigns the real order key and echoes back.
    let adapter = InMemorySaveAdapter::new();
    adapter.stage(SaveResult {
        saved: vec![
            SavedEntity {
                type_name: "Shop.Customer".to_string(),
                values: json!({"Id": 1, "Name": "Acme Ltd"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            },
            SavedEntity {
                type_name: "Shop.Order".to_string(),
                values: json!({"Id": 900, "CustomerId": 1, "Total": 30.0})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            },
        ],
        key_mappings: vec![KeyMapping {
            type_name: "Shop.Order".to_string(),
            temp_value: json!(-1),
            real_value: json!(900),
        }],
    });
    let report = save_changes(&mut cache, &adapter, &SaveOptions::new())
        .await
        .unwrap();

    // Settled: real keys, intact links, nothing pending.
    assert_eq!(report.saved.len(), 2);
    assert!(!cache.has_changes());
    assert!(cache.state(doomed).is_err());
    assert_eq!(
        cache.key(placed).unwrap(),
        EntityKey::single(order_t, Value::from(900))
    );
    assert_eq!(cache.state(placed).unwrap(), EntityState::Unchanged);
    let remaining = cache.nav_items(customer, orders_nav).unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&placed));
    assert!(!remaining.contains(&doomed));
    assert_eq!(
        cache.value_by_name(customer, "Name").unwrap(),
        Value::from("Acme Ltd")
    );

    assert_eq!(
        service.calls(),
        vec![
            METADATA_RESOURCE.to_string(),
            "Customers?$expand=Orders".to_string()
        ]
    );
}
