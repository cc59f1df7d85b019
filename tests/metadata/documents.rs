//! Integration tests for the persisted metadata format
//!
//! The wire field names are stable; stores round-trip through documents.

use daybook_foundation::{DataType, ErrorKind};
use daybook_metadata::{
    DataPropertyDef, MetadataDocument, MetadataStore, NamingConvention, NavigationPropertyDef,
    TypeDef,
};

#[test]
fn wire_field_names_are_stable() {
    let doc = MetadataDocument::parse(
        r#"{
            "metadataVersion": "1.0",
            "namingConvention": "camelCase",
            "structuralTypes": [
                {
                    "shortName": "Address",
                    "namespace": "Shop",
                    "isComplexType": true,
                    "dataProperties": [
                        {"name": "Street", "dataType": "string", "maxLength": 80}
                    ]
                },
                {
                    "shortName": "Customer",
                    "namespace": "Shop",
                    "isAbstract": false,
                    "autoGeneratedKeyType": "identity",
                    "defaultResourceName": "Customers",
                    "dataProperties": [
                        {"name": "Id", "dataType": "int", "isPartOfKey": true, "isNullable": false},
                        {"name": "Version", "dataType": "int", "concurrencyMode": "fixed"},
                        {"name": "ShipTo", "complexTypeName": "Shop.Address"}
                    ],
                    "navigationProperties": [
                        {
                            "name": "Orders",
                            "entityTypeName": "Shop.Order",
                            "isScalar": false,
                            "associationName": "Customer_Orders",
                            "invForeignKeyNames": ["CustomerId"]
                        }
                    ]
                },
                {
                    "shortName": "PremiumCustomer",
                    "namespace": "Shop",
                    "baseTypeName": "Shop.Customer",
                    "dataProperties": [
                        {"name": "Tier", "dataType": "int"}
                    ]
                }
            ],
            "resourceEntityTypeMap": {"Customers": "Shop.Customer"}
        }"#,
    )
    .unwrap();

    assert_eq!(doc.metadata_version.as_deref(), Some("1.0"));
    assert_eq!(doc.naming_convention, Some(NamingConvention::CamelCase));
    assert_eq!(doc.structural_types.len(), 3);

    let address = &doc.structural_types[0];
    assert!(address.is_complex_type);
    assert_eq!(address.data_properties[0].max_length, Some(80));

    let customer = &doc.structural_types[1];
    assert_eq!(customer.default_resource_name.as_deref(), Some("Customers"));
    assert!(customer.data_properties[0].is_part_of_key);
    assert!(!customer.data_properties[0].is_nullable);
    assert_eq!(
        customer.data_properties[2].complex_type_name.as_deref(),
        Some("Shop.Address")
    );
    let orders = &customer.navigation_properties[0];
    assert_eq!(orders.entity_type_name, "Shop.Order");
    assert!(!orders.is_scalar);
    assert_eq!(orders.inv_foreign_key_names, vec!["CustomerId".to_string()]);

    let premium = &doc.structural_types[2];
    assert_eq!(premium.base_type_name.as_deref(), Some("Shop.Customer"));
}

#[test]
fn documents_rebuild_an_equivalent_store() {
    let doc = MetadataDocument::default()
        .with_type(
            TypeDef::entity("Customer", "Shop")
                .with_resource("Customers")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("Name", DataType::String).with_max_length(40))
                .with_nav(NavigationPropertyDef::to_many(
                    "Orders",
                    "Shop.Order",
                    "Customer_Orders",
                )),
        )
        .with_type(
            TypeDef::entity("Order", "Shop")
                .with_data(DataPropertyDef::key("Id", DataType::Int))
                .with_data(DataPropertyDef::new("CustomerId", DataType::Int))
                .with_nav(
                    NavigationPropertyDef::to_one(
                        "Customer",
                        "Shop.Customer",
                        "Customer_Orders",
                    )
                    .with_foreign_key("CustomerId"),
                ),
        )
        .with_resource("Orders", "Shop.Order");

    let mut store = MetadataStore::new();
    store.add_document(&doc).unwrap();
    assert!(!store.has_pending());

    // Export and rebuild; the copy resolves to the same shape.
    let exported = store.to_document();
    let mut copy = MetadataStore::new();
    copy.add_document(&exported).unwrap();

    assert_eq!(copy.len(), store.len());
    for ty in store.types() {
        let other = copy.get_type(&ty.full_name).unwrap();
        assert_eq!(other.data_properties.len(), ty.data_properties.len());
        assert_eq!(
            other.navigation_properties.len(),
            ty.navigation_properties.len()
        );
        assert!(other.is_resolved());
    }
    assert!(copy.type_for_resource("Orders").is_some());
}

#[test]
fn the_naming_convention_rides_the_document() {
    let mut doc = MetadataDocument::default();
    doc.naming_convention = Some(NamingConvention::CamelCase);

    let mut store = MetadataStore::new();
    store.add_document(&doc).unwrap();
    assert_eq!(store.naming_convention(), NamingConvention::CamelCase);

    // A document without one leaves the store's convention alone.
    store.add_document(&MetadataDocument::default()).unwrap();
    assert_eq!(store.naming_convention(), NamingConvention::CamelCase);
}

#[test]
fn text_round_trip_preserves_the_document() {
    let doc = MetadataDocument::default()
        .with_type(
            TypeDef::complex("Address", "Shop")
                .with_data(DataPropertyDef::new("City", DataType::String)),
        )
        .with_resource("Addresses", "Shop.Address");

    let text = doc.to_json().unwrap();
    assert_eq!(MetadataDocument::parse(&text).unwrap(), doc);
}

#[test]
fn malformed_documents_are_rejected() {
    let err = MetadataDocument::parse("{").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::MetadataError(_)));
    assert!(MetadataDocument::parse(r#"{"structuralTypes": {}}"#).is_err());
}
