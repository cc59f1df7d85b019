//! Integration tests for dynamic values
//!
//! Value variants, strict equality, JSON conversion, and DataType coercion.

use daybook_foundation::{DataType, Value};
use serde_json::json;

// =============================================================================
// Equality
// =============================================================================

#[test]
fn equality_is_strict_per_variant() {
    assert_eq!(Value::Int(1), Value::Int(1));
    assert_ne!(Value::Int(1), Value::Float(1.0));
    assert_ne!(Value::Int(1), Value::from("1"));
    assert_ne!(Value::Bool(false), Value::Nil);
}

#[test]
fn nil_equals_only_nil() {
    assert_eq!(Value::Nil, Value::Nil);
    assert_ne!(Value::Nil, Value::Int(0));
    assert_ne!(Value::Nil, Value::from(""));
}

// =============================================================================
// Accessors
// =============================================================================

#[test]
fn accessors_match_their_variant() {
    assert_eq!(Value::Int(7).as_int(), Some(7));
    assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
    assert_eq!(Value::Bool(true).as_bool(), Some(true));
    assert_eq!(Value::from("hi").as_str(), Some("hi"));

    assert_eq!(Value::from("hi").as_int(), None);
    assert_eq!(Value::Int(7).as_str(), None);
}

#[test]
fn as_number_widens_ints() {
    assert_eq!(Value::Int(3).as_number(), Some(3.0));
    assert_eq!(Value::Float(3.5).as_number(), Some(3.5));
    assert_eq!(Value::from("3").as_number(), None);
}

#[test]
fn value_type_names_the_data_type() {
    assert_eq!(Value::Int(1).value_type(), Some(DataType::Int));
    assert_eq!(Value::from("x").value_type(), Some(DataType::String));
    assert_eq!(Value::Nil.value_type(), None);
}

// =============================================================================
// JSON conversion
// =============================================================================

#[test]
fn scalars_round_trip_through_json() {
    for v in [
        Value::Nil,
        Value::Bool(true),
        Value::Int(-9),
        Value::Float(0.5),
        Value::from("text"),
    ] {
        let back = Value::from_json(&v.to_json()).unwrap();
        assert_eq!(back, v);
    }
}

#[test]
fn composite_json_is_rejected() {
    assert!(Value::from_json(&json!([1, 2])).is_err());
    assert!(Value::from_json(&json!({"a": 1})).is_err());
}

// =============================================================================
// DataType coercion
// =============================================================================

#[test]
fn coercion_widens_only_int_to_float() {
    assert_eq!(
        DataType::Float.coerce(Value::Int(4)).unwrap(),
        Value::Float(4.0)
    );
    assert!(DataType::Int.coerce(Value::Float(4.0)).is_err());
    assert!(DataType::String.coerce(Value::Int(4)).is_err());
}

#[test]
fn nil_conforms_to_every_type() {
    for dt in [DataType::Bool, DataType::Int, DataType::Float, DataType::String] {
        assert_eq!(dt.coerce(Value::Nil).unwrap(), Value::Nil);
        assert!(dt.check(&Value::Nil));
    }
}

#[test]
fn json_coercion_respects_the_declared_type() {
    assert_eq!(
        DataType::Int.coerce_json(&json!(12)).unwrap(),
        Value::Int(12)
    );
    assert_eq!(
        DataType::Float.coerce_json(&json!(12)).unwrap(),
        Value::Float(12.0)
    );
    assert!(DataType::Int.coerce_json(&json!("12")).is_err());
    assert!(DataType::Bool.coerce_json(&json!([true])).is_err());
}

#[test]
fn type_defaults_are_the_zero_values() {
    assert_eq!(DataType::Int.default_value(), Value::Int(0));
    assert_eq!(DataType::Bool.default_value(), Value::Bool(false));
    assert_eq!(DataType::String.default_value(), Value::from(""));
}
