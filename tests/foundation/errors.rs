//! Integration tests for the error type
//!
//! Constructor helpers, kind matching, and context rendering.

use daybook_foundation::{
    DataType, EntityKey, EntityState, Error, ErrorContext, ErrorKind, TypeId, Value,
};

#[test]
fn helpers_build_the_matching_kind() {
    assert!(matches!(
        Error::unknown_type("Shop.Widget").kind,
        ErrorKind::UnknownType(_)
    ));
    assert!(matches!(
        Error::duplicate_key(EntityKey::single(TypeId::new(0), 1i64)).kind,
        ErrorKind::DuplicateKey(_)
    ));
    assert!(matches!(
        Error::validation_failed(3).kind,
        ErrorKind::ValidationFailed { failures: 3 }
    ));
    assert!(matches!(
        Error::unresolved_ref("7").kind,
        ErrorKind::UnresolvedRef(_)
    ));
    assert!(matches!(Error::service("down").kind, ErrorKind::Service(_)));
}

#[test]
fn messages_carry_the_offending_detail() {
    let err = Error::type_mismatch(DataType::Int, "\"abc\"");
    let msg = err.to_string();
    assert!(msg.contains("int"));
    assert!(msg.contains("abc"));

    let err = Error::illegal_transition(EntityState::Detached, EntityState::Modified);
    let msg = err.to_string();
    assert!(msg.contains("Detached"));
    assert!(msg.contains("Modified"));
}

#[test]
fn incomplete_key_errors_print_the_key() {
    let key = EntityKey::new(TypeId::new(2), vec![Value::Int(4), Value::Nil]);
    let err = Error::incomplete_key(key);
    assert!(err.to_string().contains("incomplete key"));
    assert!(err.to_string().contains('4'));
}

#[test]
fn context_attaches_without_changing_the_kind() {
    let err = Error::unknown_property("Shop.Customer", "Bogus")
        .with_context(ErrorContext::new().with_type("Shop.Customer").with_resource("Customers"));

    assert!(matches!(err.kind, ErrorKind::UnknownProperty { .. }));
    let ctx = err.context.expect("context was attached");
    assert_eq!(ctx.entity_type.as_deref(), Some("Shop.Customer"));
    assert_eq!(ctx.resource.as_deref(), Some("Customers"));
}

#[test]
fn context_renders_type_dot_property() {
    let ctx = ErrorContext::new().with_type("Shop.Order").with_property("Freight");
    assert_eq!(ctx.to_string(), "on Shop.Order.Freight");
}

#[test]
fn errors_work_with_question_mark() {
    fn fails() -> daybook_foundation::Result<()> {
        Err(Error::metadata("bad document"))?;
        unreachable!()
    }
    assert!(matches!(fails().unwrap_err().kind, ErrorKind::MetadataError(_)));
}
