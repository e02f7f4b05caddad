use std::collections::HashMap;
use zircon::client::statement::{Batch, QueryValues, Statement};
use zircon::core::errors::ZirconError;
use zircon::core::protocol::response::PreparedMetadata;
use zircon::core::protocol::types::{ColumnSpec, CqlValue, DataType, TableSpec};

fn metadata(names: &[&str]) -> PreparedMetadata {
    PreparedMetadata {
        columns: names
            .iter()
            .map(|name| ColumnSpec {
                table_spec: TableSpec {
                    keyspace: "ks".into(),
                    table: "t".into(),
                },
                name: (*name).to_owned(),
                data_type: DataType::Int,
            })
            .collect(),
        pk_indices: vec![],
    }
}

#[test]
fn test_positional_values_pass_through() {
    let values = QueryValues::Positional(vec![CqlValue::Int(1), CqlValue::Int(2)]);
    let resolved = values.resolve(&metadata(&["a", "b"]), false).unwrap();
    assert_eq!(resolved, vec![CqlValue::Int(1), CqlValue::Int(2)]);
}

#[test]
fn test_named_values_reorder_to_column_order() {
    let mut named = HashMap::new();
    named.insert("b".to_owned(), CqlValue::Int(2));
    named.insert("a".to_owned(), CqlValue::Int(1));
    let values = QueryValues::Named(named);
    let resolved = values.resolve(&metadata(&["a", "b"]), false).unwrap();
    assert_eq!(resolved, vec![CqlValue::Int(1), CqlValue::Int(2)]);
}

#[test]
fn test_named_lookup_is_case_insensitive() {
    let mut named = HashMap::new();
    named.insert("UserId".to_owned(), CqlValue::Int(9));
    let values = QueryValues::Named(named);
    let resolved = values.resolve(&metadata(&["userid"]), false).unwrap();
    assert_eq!(resolved, vec![CqlValue::Int(9)]);
}

#[test]
fn test_missing_named_parameter_is_an_error() {
    let mut named = HashMap::new();
    named.insert("a".to_owned(), CqlValue::Int(1));
    let values = QueryValues::Named(named);
    let result = values.resolve(&metadata(&["a", "b"]), false);
    assert!(matches!(
        result,
        Err(ZirconError::UnknownNamedParameter(name)) if name == "b"
    ));
}

#[test]
fn test_missing_named_parameter_becomes_unset_when_enabled() {
    let mut named = HashMap::new();
    named.insert("a".to_owned(), CqlValue::Int(1));
    let values = QueryValues::Named(named);
    let resolved = values.resolve(&metadata(&["a", "b"]), true).unwrap();
    assert_eq!(resolved, vec![CqlValue::Int(1), CqlValue::Unset]);
}

#[test]
fn test_stray_named_parameter_is_an_error() {
    let mut named = HashMap::new();
    named.insert("a".to_owned(), CqlValue::Int(1));
    named.insert("ghost".to_owned(), CqlValue::Int(2));
    let values = QueryValues::Named(named);
    let result = values.resolve(&metadata(&["a"]), false);
    assert!(matches!(
        result,
        Err(ZirconError::UnknownNamedParameter(name)) if name == "ghost"
    ));
}

#[test]
fn test_statement_builder() {
    let statement = Statement::new("SELECT * FROM t WHERE a = ?")
        .with_values(vec![CqlValue::Int(1)])
        .idempotent();
    assert!(statement.is_idempotent);
    assert!(!statement.values.is_empty());
}

#[test]
fn test_batch_builders() {
    let mut batch = Batch::unlogged();
    batch.add_query("INSERT INTO t (a) VALUES (?)", vec![CqlValue::Int(1)]);
    assert_eq!(batch.len(), 1);
    assert!(!batch.is_empty());

    let empty = Batch::logged();
    assert!(empty.is_empty());
}

#[test]
fn test_empty_value_conversions() {
    let values: QueryValues = Vec::<CqlValue>::new().into();
    assert!(values.is_empty());
    let values: QueryValues = HashMap::<String, CqlValue>::new().into();
    assert!(values.is_empty());
}
