//! Shared fixtures for the remote integration tests.

use daybook_cache::EntityCache;
use daybook_foundation::{DataType, TypeId};
use daybook_metadata::{
    AutoGeneratedKeyType, DataPropertyDef, MetadataDocument, MetadataStore,
    NavigationPropertyDef, TypeDef,
};

/// A customer/order schema with a complex address, FK-backed navigation,
/// identity keys, and resource routes for both entity types.
pub fn commerce_doc() -> MetadataDocument {
    MetadataDocument::default()
        .with_type(
            TypeDef::complex("Address", "Shop")
                .with_data(DataPropertyDef::new("Street", DataType::String))
                .with_data(DataPropertyDef::new("City", DataType::String)),
        )
        .with_type(
            TypeDef::entity("Customer", "Shop")
                .with_auto_key(AutoGeneratedKeyType::Identity)
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
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("CustomerId", DataType::Int))
                .with_data(DataPropertyDef::new("Total", DataType::Float))
                .with_nav(
                    NavigationPropertyDef::to_one("Customer", "Shop.Customer", "Customer_Orders")
                        .with_foreign_key("CustomerId"),
                ),
        )
        .with_resource("Customers", "Shop.Customer")
        .with_resource("Orders", "Shop.Order")
}

pub fn commerce_cache() -> EntityCache {
    let mut store = MetadataStore::new();
    store.add_document(&commerce_doc()).unwrap();
    EntityCache::new(store)
}

pub fn tid(cache: &EntityCache, name: &str) -> TypeId {
    cache.metadata().type_id(name).unwrap()
}
