//! Integration tests for type resolution
//!
//! Types arrive in any order; navigations, complex properties, and base
//! types park until their targets register and then resolve in place.

use daybook_foundation::{DataType, ErrorKind};
use daybook_metadata::{
    DataPropertyDef, MetadataStore, NavigationPropertyDef, TypeDef,
};

fn customer_def() -> TypeDef {
    TypeDef::entity("Customer", "Shop")
        .with_resource("Customers")
        .with_data(DataPropertyDef::key("Id", DataType::Int))
        .with_data(DataPropertyDef::new("Name", DataType::String))
        .with_nav(NavigationPropertyDef::to_many(
            "Orders",
            "Shop.Order",
            "Customer_Orders",
        ))
}

fn order_def() -> TypeDef {
    TypeDef::entity("Order", "Shop")
        .with_data(DataPropertyDef::key("Id", DataType::Int))
        .with_data(DataPropertyDef::new("CustomerId", DataType::Int))
        .with_nav(
            NavigationPropertyDef::to_one("Customer", "Shop.Customer", "Customer_Orders")
                .with_foreign_key("CustomerId"),
        )
}

// =============================================================================
// Forward references
// =============================================================================

#[test]
fn navigations_park_until_the_target_arrives() {
    let mut store = MetadataStore::new();
    store.add_type(order_def()).unwrap();

    let order = store.get_type("Shop.Order").unwrap();
    assert!(!order.is_resolved());
    assert!(store.has_pending());
    assert!(store
        .pending_type_names()
        .contains(&"Shop.Customer".to_string()));

    store.add_type(customer_def()).unwrap();
    assert!(!store.has_pending());
    assert!(store.get_type("Shop.Order").unwrap().is_resolved());
    assert!(store.get_type("Shop.Customer").unwrap().is_resolved());
}

#[test]
fn arrival_order_does_not_change_the_result() {
    let mut forward = MetadataStore::new();
    forward.add_type(order_def()).unwrap();
    forward.add_type(customer_def()).unwrap();

    let mut reverse = MetadataStore::new();
    reverse.add_type(customer_def()).unwrap();
    reverse.add_type(order_def()).unwrap();

    for store in [&forward, &reverse] {
        let order = store.get_type("Shop.Order").unwrap();
        let customer = store.get_type("Shop.Customer").unwrap();

        let (_, to_customer) = order.nav_prop("Customer").unwrap();
        assert_eq!(to_customer.target, Some(customer.id));
        let (cust_id, cust_def) = order.data_prop("CustomerId").unwrap();
        assert_eq!(cust_def.scalar_type(), Some(DataType::Int));
        assert_eq!(to_customer.foreign_keys, vec![cust_id]);

        let (_, to_orders) = customer.nav_prop("Orders").unwrap();
        assert_eq!(to_orders.target, Some(order.id));
    }
}

#[test]
fn inverses_pair_by_association_name() {
    let mut store = MetadataStore::new();
    store.add_type(order_def()).unwrap();
    store.add_type(
        customer_def().with_nav(NavigationPropertyDef::to_many(
            "ArchivedOrders",
            "Shop.Order",
            "Customer_Archived",
        )),
    )
    .unwrap();

    let customer = store.get_type("Shop.Customer").unwrap();
    let order = store.get_type("Shop.Order").unwrap();

    let (orders_id, orders) = customer.nav_prop("Orders").unwrap();
    let (to_customer_id, to_customer) = order.nav_prop("Customer").unwrap();
    assert_eq!(orders.inverse, Some(to_customer_id));
    assert_eq!(to_customer.inverse, Some(orders_id));

    // No counterpart shares the other association name.
    let (_, archived) = customer.nav_prop("ArchivedOrders").unwrap();
    assert_eq!(archived.inverse, None);
}

#[test]
fn self_references_never_pair_a_navigation_with_itself() {
    let mut store = MetadataStore::new();
    store
        .add_type(
            TypeDef::entity("Employee", "Hr")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("ManagerId", DataType::Int))
                .with_nav(
                    NavigationPropertyDef::to_one("Manager", "Hr.Employee", "Employee_Manager")
                        .with_foreign_key("ManagerId"),
                )
                .with_nav(NavigationPropertyDef::to_many(
                    "Reports",
                    "Hr.Employee",
                    "Employee_Manager",
                )),
        )
        .unwrap();

    let employee = store.get_type("Hr.Employee").unwrap();
    let (manager_id, manager) = employee.nav_prop("Manager").unwrap();
    let (reports_id, reports) = employee.nav_prop("Reports").unwrap();

    assert_eq!(manager.inverse, Some(reports_id));
    assert_eq!(reports.inverse, Some(manager_id));
    assert_ne!(manager.inverse, Some(manager_id));
}

#[test]
fn unidirectional_relationships_mark_the_target_columns() {
    let mut store = MetadataStore::new();
    // Only the customer side declares the relationship; the order type has
    // the column but no navigation back.
    store
        .add_type(
            TypeDef::entity("Customer", "Shop")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_nav(
                    NavigationPropertyDef::to_many("Orders", "Shop.Order", "Customer_Orders")
                        .with_inv_foreign_key("CustomerId"),
                ),
        )
        .unwrap();
    store
        .add_type(
            TypeDef::entity("Order", "Shop")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("CustomerId", DataType::Int)),
        )
        .unwrap();

    let customer = store.get_type("Shop.Customer").unwrap();
    let order = store.get_type("Shop.Order").unwrap();
    let (_, orders) = customer.nav_prop("Orders").unwrap();
    let (cust_col, _) = order.data_prop("CustomerId").unwrap();

    assert_eq!(orders.inverse, None);
    assert_eq!(orders.inv_foreign_keys, vec![cust_col]);
}

#[test]
fn complex_properties_resolve_late() {
    let mut store = MetadataStore::new();
    store
        .add_type(
            TypeDef::entity("Customer", "Shop")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::complex("ShipTo", "Shop.Address")),
        )
        .unwrap();
    assert!(!store.get_type("Shop.Customer").unwrap().is_resolved());

    store
        .add_type(
            TypeDef::complex("Address", "Shop")
                .with_data(DataPropertyDef::new("Street", DataType::String)),
        )
        .unwrap();

    let customer = store.get_type("Shop.Customer").unwrap();
    assert!(customer.is_resolved());
    let (_, ship_to) = customer.data_prop("ShipTo").unwrap();
    let address = store.get_type("Shop.Address").unwrap();
    assert_eq!(ship_to.complex_type(), Some(address.id));
}

// =============================================================================
// Inheritance
// =============================================================================

#[test]
fn subtypes_materialize_inherited_properties() {
    let mut store = MetadataStore::new();
    store.add_type(order_def()).unwrap();
    store.add_type(customer_def()).unwrap();
    store
        .add_type(
            TypeDef::entity("PremiumCustomer", "Shop")
                .with_base("Shop.Customer")
                .with_data(DataPropertyDef::new("Tier", DataType::Int)),
        )
        .unwrap();

    let premium = store.get_type("Shop.PremiumCustomer").unwrap();
    let customer = store.get_type("Shop.Customer").unwrap();

    assert_eq!(premium.base, Some(customer.id));
    let (id_prop, id_def) = premium.data_prop("Id").unwrap();
    assert!(id_def.part_of_key);
    assert_eq!(premium.key_properties(), &[id_prop]);
    assert!(premium.data_prop("Tier").is_some());
    assert!(premium.nav_prop("Orders").is_some());

    // Resource name inherits from the base.
    let facts = premium.entity_facts().unwrap();
    assert_eq!(facts.default_resource_name.as_deref(), Some("Customers"));
}

#[test]
fn subtypes_can_arrive_before_their_base() {
    let mut store = MetadataStore::new();
    store
        .add_type(
            TypeDef::entity("PremiumCustomer", "Shop")
                .with_base("Shop.Customer")
                .with_data(DataPropertyDef::new("Tier", DataType::Int)),
        )
        .unwrap();
    assert!(store
        .pending_type_names()
        .contains(&"Shop.Customer".to_string()));

    store.add_type(order_def()).unwrap();
    store.add_type(customer_def()).unwrap();

    let premium = store.get_type("Shop.PremiumCustomer").unwrap();
    assert!(premium.is_resolved());
    assert!(premium.data_prop("Name").is_some());
}

#[test]
fn assignability_walks_base_links() {
    let mut store = MetadataStore::new();
    store.add_type(order_def()).unwrap();
    store.add_type(customer_def()).unwrap();
    store
        .add_type(TypeDef::entity("PremiumCustomer", "Shop").with_base("Shop.Customer"))
        .unwrap();

    let customer = store.type_id("Shop.Customer").unwrap();
    let premium = store.type_id("Shop.PremiumCustomer").unwrap();
    let order = store.type_id("Shop.Order").unwrap();

    assert!(store.is_assignable(customer, premium));
    assert!(store.is_assignable(customer, customer));
    assert!(!store.is_assignable(premium, customer));
    assert!(!store.is_assignable(customer, order));
}

// =============================================================================
// Rejections
// =============================================================================

#[test]
fn duplicate_property_names_are_rejected() {
    let mut store = MetadataStore::new();
    let err = store
        .add_type(
            TypeDef::entity("Widget", "Shop")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("Id", DataType::String)),
        )
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateProperty { .. }));
}

#[test]
fn resource_routing_follows_default_resource_names() {
    let mut store = MetadataStore::new();
    store.add_type(order_def()).unwrap();
    store.add_type(customer_def()).unwrap();

    assert_eq!(
        &*store.type_for_resource("Customers").unwrap().full_name,
        "Shop.Customer"
    );
    assert!(store.type_for_resource("Unknown").is_none());

    store.set_resource("VIPs", "Shop.Customer");
    assert_eq!(
        &*store.type_for_resource("VIPs").unwrap().full_name,
        "Shop.Customer"
    );
}
