//! Shared fixtures for the cache integration tests.

use daybook_cache::{DetachedEntity, EntityCache};
use daybook_foundation::{DataType, EntityRef, TypeId};
use daybook_metadata::{
    AutoGeneratedKeyType, DataPropertyDef, MetadataDocument, MetadataStore,
    NavigationPropertyDef, TypeDef,
};

/// A customer/order model with a complex address, FK-backed navigation,
/// and identity keys.
pub fn commerce() -> EntityCache {
    let doc = MetadataDocument::default()
        .with_type(
            TypeDef::complex("Address", "Shop")
                .with_data(DataPropertyDef::new("Street", DataType::String))
                .with_data(DataPropertyDef::new("City", DataType::String)),
        )
        .with_type(
            TypeDef::entity("Customer", "Shop")
                .with_auto_key(AutoGeneratedKeyType::Identity)
                .with_resource("Customers")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("Name", DataType::String))
                .with_data(DataPropertyDef::complex("ShipTo", "Shop.Address"))
                .with_nav(NavigationPropertyDef::to_many(
                    "Orders",
                    "Shop.Order",
                    "Customer_Orders",
                )),
        )
        .with_type(
            TypeDef::entity("Order", "Shop")
                .with_auto_key(AutoGeneratedKeyType::Identity)
                .with_resource("Orders")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("CustomerId", DataType::Int))
                .with_data(DataPropertyDef::new("Total", DataType::Float))
                .with_nav(
                    NavigationPropertyDef::to_one("Customer", "Shop.Customer", "Customer_Orders")
                        .with_foreign_key("CustomerId"),
                ),
        );
    let mut store = MetadataStore::new();
    store.add_document(&doc).unwrap();
    EntityCache::new(store)
}

pub fn tid(cache: &EntityCache, name: &str) -> TypeId {
    cache.metadata().type_id(name).unwrap()
}

/// Attaches an Unchanged customer, as a query merge would.
pub fn customer(cache: &mut EntityCache, id: i64, name: &str) -> EntityRef {
    let store = cache.metadata();
    let mut c = DetachedEntity::new(store, "Shop.Customer").unwrap();
    c.set(store, "Id", id).unwrap();
    c.set(store, "Name", name).unwrap();
    cache.attach_queried(c).unwrap()
}

/// Attaches an Unchanged order carrying a customer foreign key.
pub fn order(cache: &mut EntityCache, id: i64, customer_id: i64) -> EntityRef {
    let store = cache.metadata();
    let mut o = DetachedEntity::new(store, "Shop.Order").unwrap();
    o.set(store, "Id", id).unwrap();
    o.set(store, "CustomerId", customer_id).unwrap();
    cache.attach_queried(o).unwrap()
}
