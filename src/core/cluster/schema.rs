// src/core/cluster/schema.rs

//! The uniform schema catalog (keyspaces, tables, views, UDTs, functions,
//! aggregates, indexes) and the parsers that build it from the three
//! generations of server schema tables:
//!
//! * shape v1 (C* 1.2/2.0): `system.schema_*` with JSON-encoded strategy
//!   options and partition/clustering keys reconstructed from the alias
//!   columns and the marshal class strings;
//! * shape v2 (C* 2.1/2.2): `system.schema_columns.type` discriminators;
//! * shape v3 (C* 3.0+): `system_schema.*` with CQL type names and proper
//!   `kind` columns.

use crate::core::cluster::ring::ReplicationStrategy;
use crate::core::errors::ZirconError;
use crate::core::protocol::types::{ColumnSpec, CqlValue, DataType, Row};
use std::collections::HashMap;
use tracing::warn;

/// The server generation a schema row shape belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaShape {
    V1,
    V2,
    V3,
}

impl SchemaShape {
    /// Picks the shape from a `release_version` string such as `"3.11.4"`.
    pub fn from_release_version(release_version: &str) -> Self {
        let major_minor: Vec<u32> = release_version
            .split('.')
            .take(2)
            .filter_map(|part| part.parse().ok())
            .collect();
        match major_minor.as_slice() {
            [major, ..] if *major >= 3 => SchemaShape::V3,
            [2, minor, ..] if *minor >= 1 => SchemaShape::V2,
            _ => SchemaShape::V1,
        }
    }

    /// The keyspace holding the schema tables for this shape.
    pub fn schema_keyspace(&self) -> &'static str {
        match self {
            SchemaShape::V1 | SchemaShape::V2 => "system",
            SchemaShape::V3 => "system_schema",
        }
    }
}

/// A small decoded result set, as the control connection consumes them.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn views(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(|row| RowView {
            columns: &self.columns,
            row,
        })
    }
}

/// Column access by name over one decoded row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [ColumnSpec],
    row: &'a Row,
}

impl<'a> RowView<'a> {
    pub fn value(&self, name: &str) -> Option<&'a CqlValue> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        self.row.get(index)?.as_ref()
    }

    pub fn str(&self, name: &str) -> Option<&'a str> {
        self.value(name)?.as_text()
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.str(name).map(str::to_owned)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.value(name)?.as_boolean()
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        self.value(name)?.as_int()
    }

    pub fn uuid(&self, name: &str) -> Option<uuid::Uuid> {
        self.value(name)?.as_uuid()
    }

    pub fn inet(&self, name: &str) -> Option<std::net::IpAddr> {
        self.value(name)?.as_inet()
    }

    pub fn string_list(&self, name: &str) -> Option<Vec<String>> {
        let items = self.value(name)?.as_set()?;
        Some(
            items
                .iter()
                .filter_map(|v| v.as_text().map(str::to_owned))
                .collect(),
        )
    }

    pub fn string_map(&self, name: &str) -> Option<HashMap<String, String>> {
        match self.value(name)? {
            CqlValue::Map(entries) => Some(
                entries
                    .iter()
                    .filter_map(|(k, v)| Some((k.as_text()?.to_owned(), v.as_text()?.to_owned())))
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// What a column is to its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Regular,
    Static,
    CompactValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
    pub kind: ColumnKind,
    pub position: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexMetadata {
    pub name: String,
    pub kind: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TableMetadata {
    pub keyspace: String,
    pub name: String,
    pub columns: HashMap<String, ColumnMetadata>,
    /// Partition-key column names, in key order.
    pub partition_key: Vec<String>,
    /// Clustering column names, in clustering order.
    pub clustering_key: Vec<String>,
    pub indexes: HashMap<String, IndexMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct ViewMetadata {
    pub keyspace: String,
    pub name: String,
    pub base_table: String,
    pub columns: HashMap<String, ColumnMetadata>,
    pub partition_key: Vec<String>,
    pub clustering_key: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UdtMetadata {
    pub keyspace: String,
    pub name: String,
    pub fields: Vec<(String, DataType)>,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionMetadata {
    pub keyspace: String,
    pub name: String,
    pub argument_types: Vec<String>,
    pub return_type: Option<String>,
    pub language: Option<String>,
    pub body: Option<String>,
    pub called_on_null_input: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateMetadata {
    pub keyspace: String,
    pub name: String,
    pub argument_types: Vec<String>,
    pub state_func: Option<String>,
    pub state_type: Option<String>,
    pub final_func: Option<String>,
    pub return_type: Option<String>,
    pub init_cond: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KeyspaceMetadata {
    pub name: String,
    pub durable_writes: bool,
    pub strategy: ReplicationStrategy,
    pub tables: HashMap<String, TableMetadata>,
    pub views: HashMap<String, ViewMetadata>,
    pub user_types: HashMap<String, UdtMetadata>,
    pub functions: HashMap<String, FunctionMetadata>,
    pub aggregates: HashMap<String, AggregateMetadata>,
}

impl KeyspaceMetadata {
    pub fn new(name: String, durable_writes: bool, strategy: ReplicationStrategy) -> Self {
        Self {
            name,
            durable_writes,
            strategy,
            tables: HashMap::new(),
            views: HashMap::new(),
            user_types: HashMap::new(),
            functions: HashMap::new(),
            aggregates: HashMap::new(),
        }
    }
}

// --- Keyspace rows ---

/// Parses one keyspace row of any shape into (name, durable_writes,
/// strategy). Shapes v1/v2 carry the strategy as a class plus a JSON options
/// string; shape v3 carries a `replication` map with a `class` entry.
pub fn parse_keyspace_row(
    shape: SchemaShape,
    row: &RowView<'_>,
) -> Result<KeyspaceMetadata, ZirconError> {
    let name = row
        .string("keyspace_name")
        .ok_or_else(|| ZirconError::Metadata("Keyspace row without keyspace_name".into()))?;
    let durable_writes = row.bool("durable_writes").unwrap_or(true);

    let strategy = match shape {
        SchemaShape::V1 | SchemaShape::V2 => {
            let class = row.string("strategy_class").unwrap_or_default();
            let options_json = row.str("strategy_options").unwrap_or("{}");
            let options: HashMap<String, String> = serde_json::from_str(options_json)?;
            ReplicationStrategy::from_options(&class, &options)
        }
        SchemaShape::V3 => {
            let mut replication = row.string_map("replication").unwrap_or_default();
            let class = replication.remove("class").unwrap_or_default();
            ReplicationStrategy::from_options(&class, &replication)
        }
    };
    Ok(KeyspaceMetadata::new(name, durable_writes, strategy))
}

// --- Table rows ---

/// Inputs for one keyspace's table reconstruction: the table rows plus the
/// per-table column rows, already filtered to the keyspace.
pub struct TableRows<'a> {
    pub tables: &'a RowSet,
    pub columns: &'a RowSet,
    pub indexes: Option<&'a RowSet>,
}

/// The column naming differs per shape; this hides it.
fn table_name_column(shape: SchemaShape) -> &'static str {
    match shape {
        SchemaShape::V1 | SchemaShape::V2 => "columnfamily_name",
        SchemaShape::V3 => "table_name",
    }
}

pub fn parse_tables(
    shape: SchemaShape,
    keyspace: &str,
    rows: &TableRows<'_>,
) -> Result<HashMap<String, TableMetadata>, ZirconError> {
    let mut tables: HashMap<String, TableMetadata> = HashMap::new();

    for table_row in rows.tables.views() {
        let Some(name) = table_row.string(table_name_column(shape)) else {
            continue;
        };
        let mut table = TableMetadata {
            keyspace: keyspace.to_owned(),
            name: name.clone(),
            ..Default::default()
        };
        if shape == SchemaShape::V1 {
            seed_keys_from_aliases(&table_row, &mut table)?;
        }
        tables.insert(name, table);
    }

    for column_row in rows.columns.views() {
        let Some(table_name) = column_row.string(table_name_column(shape)) else {
            continue;
        };
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        match parse_column_row(shape, &column_row) {
            Ok(Some(column)) => {
                attach_column(table, column);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Skipping malformed column row of {}.{}: {}",
                    keyspace, table_name, e
                );
            }
        }
    }

    for table in tables.values_mut() {
        order_keys(table);
    }

    if let Some(index_rows) = rows.indexes {
        for index_row in index_rows.views() {
            let Some(table_name) = index_row.string("table_name") else {
                continue;
            };
            let Some(table) = tables.get_mut(&table_name) else {
                continue;
            };
            let Some(index_name) = index_row.string("index_name") else {
                continue;
            };
            let target = index_row
                .string_map("options")
                .and_then(|mut options| options.remove("target"));
            table.indexes.insert(
                index_name.clone(),
                IndexMetadata {
                    name: index_name,
                    kind: index_row.string("kind").unwrap_or_default(),
                    target,
                },
            );
        }
    }

    Ok(tables)
}

/// One column row into metadata; `None` when the row describes nothing
/// attachable (e.g. a compact-storage artifact with no name).
fn parse_column_row(
    shape: SchemaShape,
    row: &RowView<'_>,
) -> Result<Option<ColumnMetadata>, ZirconError> {
    let Some(name) = row.string("column_name") else {
        return Ok(None);
    };
    match shape {
        SchemaShape::V3 => {
            let kind = match row.str("kind") {
                Some("partition_key") => ColumnKind::PartitionKey,
                Some("clustering") => ColumnKind::Clustering,
                Some("static") => ColumnKind::Static,
                _ => ColumnKind::Regular,
            };
            let data_type = row
                .str("type")
                .map(DataType::parse_cql_name)
                .unwrap_or(DataType::Blob);
            Ok(Some(ColumnMetadata {
                name,
                data_type,
                kind,
                position: row.int("position").unwrap_or(-1),
            }))
        }
        SchemaShape::V2 => {
            let kind = match row.str("type") {
                Some("partition_key") => ColumnKind::PartitionKey,
                Some("clustering_key") => ColumnKind::Clustering,
                Some("static") => ColumnKind::Static,
                Some("compact_value") => ColumnKind::CompactValue,
                _ => ColumnKind::Regular,
            };
            let data_type = row
                .str("validator")
                .map(|v| parse_marshal_class(v).0)
                .unwrap_or(DataType::Blob);
            Ok(Some(ColumnMetadata {
                name,
                data_type,
                kind,
                position: row.int("component_index").unwrap_or(-1),
            }))
        }
        SchemaShape::V1 => {
            // Shape v1 column rows only ever describe regular columns; keys
            // come from the alias columns of the table row.
            let data_type = row
                .str("validator")
                .map(|v| parse_marshal_class(v).0)
                .unwrap_or(DataType::Blob);
            Ok(Some(ColumnMetadata {
                name,
                data_type,
                kind: ColumnKind::Regular,
                position: row.int("component_index").unwrap_or(-1),
            }))
        }
    }
}

fn attach_column(table: &mut TableMetadata, column: ColumnMetadata) {
    match column.kind {
        ColumnKind::PartitionKey => table.partition_key.push(column.name.clone()),
        ColumnKind::Clustering => table.clustering_key.push(column.name.clone()),
        _ => {}
    }
    table.columns.insert(column.name.clone(), column);
}

/// Partition/clustering lists are filled in row order; sort them by the
/// reported position so multi-component keys come out in key order.
fn order_keys(table: &mut TableMetadata) {
    let position_of = |columns: &HashMap<String, ColumnMetadata>, name: &String| {
        columns.get(name).map(|c| c.position).unwrap_or(-1)
    };
    let columns = table.columns.clone();
    table
        .partition_key
        .sort_by_key(|name| position_of(&columns, name));
    table
        .clustering_key
        .sort_by_key(|name| position_of(&columns, name));
}

/// Shape v1: reconstruct keys from `key_aliases` / `column_aliases` /
/// `key_validator` / `comparator`.
fn seed_keys_from_aliases(
    row: &RowView<'_>,
    table: &mut TableMetadata,
) -> Result<(), ZirconError> {
    let key_aliases: Vec<String> = row
        .str("key_aliases")
        .map(|json| serde_json::from_str(json))
        .transpose()?
        .unwrap_or_default();
    let column_aliases: Vec<String> = row
        .str("column_aliases")
        .map(|json| serde_json::from_str(json))
        .transpose()?
        .unwrap_or_default();

    let key_types = row
        .str("key_validator")
        .map(parse_composite_components)
        .unwrap_or_default();
    let clustering_types = row
        .str("comparator")
        .map(parse_composite_components)
        .unwrap_or_default();

    for (index, key_type) in key_types.iter().enumerate() {
        // C* 1.x defaults the single unnamed partition key to "key".
        let name = key_aliases
            .get(index)
            .cloned()
            .unwrap_or_else(|| if index == 0 { "key".to_owned() } else { format!("key{index}") });
        table.partition_key.push(name.clone());
        table.columns.insert(
            name.clone(),
            ColumnMetadata {
                name,
                data_type: key_type.clone(),
                kind: ColumnKind::PartitionKey,
                position: index as i32,
            },
        );
    }
    for (index, alias) in column_aliases.iter().enumerate() {
        let data_type = clustering_types
            .get(index)
            .cloned()
            .unwrap_or(DataType::Blob);
        table.clustering_key.push(alias.clone());
        table.columns.insert(
            alias.clone(),
            ColumnMetadata {
                name: alias.clone(),
                data_type,
                kind: ColumnKind::Clustering,
                position: index as i32,
            },
        );
    }
    Ok(())
}

// --- Views, UDTs, functions, aggregates (shape v3; earlier servers have no
// such objects or no such tables) ---

pub fn parse_views(
    keyspace: &str,
    rows: &RowSet,
    columns: &RowSet,
) -> HashMap<String, ViewMetadata> {
    let mut views: HashMap<String, ViewMetadata> = HashMap::new();
    for row in rows.views() {
        let Some(name) = row.string("view_name") else {
            continue;
        };
        views.insert(
            name.clone(),
            ViewMetadata {
                keyspace: keyspace.to_owned(),
                name,
                base_table: row.string("base_table_name").unwrap_or_default(),
                ..Default::default()
            },
        );
    }
    for column_row in columns.views() {
        let Some(view_name) = column_row.string("table_name") else {
            continue;
        };
        let Some(view) = views.get_mut(&view_name) else {
            continue;
        };
        if let Ok(Some(column)) = parse_column_row(SchemaShape::V3, &column_row) {
            match column.kind {
                ColumnKind::PartitionKey => view.partition_key.push(column.name.clone()),
                ColumnKind::Clustering => view.clustering_key.push(column.name.clone()),
                _ => {}
            }
            view.columns.insert(column.name.clone(), column);
        }
    }
    views
}

pub fn parse_user_types(keyspace: &str, rows: &RowSet) -> HashMap<String, UdtMetadata> {
    let mut user_types = HashMap::new();
    for row in rows.views() {
        let Some(name) = row.string("type_name") else {
            continue;
        };
        let field_names = row.string_list("field_names").unwrap_or_default();
        let field_types = row.string_list("field_types").unwrap_or_default();
        let fields = field_names
            .into_iter()
            .zip(field_types.iter().map(|t| DataType::parse_cql_name(t)))
            .collect();
        user_types.insert(
            name.clone(),
            UdtMetadata {
                keyspace: keyspace.to_owned(),
                name,
                fields,
            },
        );
    }
    user_types
}

pub fn parse_functions(keyspace: &str, rows: &RowSet) -> HashMap<String, FunctionMetadata> {
    let mut functions = HashMap::new();
    for row in rows.views() {
        let Some(name) = row.string("function_name") else {
            continue;
        };
        let argument_types = row.string_list("argument_types").unwrap_or_default();
        let key = function_key(&name, &argument_types);
        functions.insert(
            key,
            FunctionMetadata {
                keyspace: keyspace.to_owned(),
                name,
                argument_types,
                return_type: row.string("return_type"),
                language: row.string("language"),
                body: row.string("body"),
                called_on_null_input: row.bool("called_on_null_input").unwrap_or(false),
            },
        );
    }
    functions
}

pub fn parse_aggregates(keyspace: &str, rows: &RowSet) -> HashMap<String, AggregateMetadata> {
    let mut aggregates = HashMap::new();
    for row in rows.views() {
        let Some(name) = row.string("aggregate_name") else {
            continue;
        };
        let argument_types = row.string_list("argument_types").unwrap_or_default();
        let key = function_key(&name, &argument_types);
        aggregates.insert(
            key,
            AggregateMetadata {
                keyspace: keyspace.to_owned(),
                name,
                argument_types,
                state_func: row.string("state_func"),
                state_type: row.string("state_type"),
                final_func: row.string("final_func"),
                return_type: row.string("return_type"),
                init_cond: row.string("initcond"),
            },
        );
    }
    aggregates
}

/// Functions and aggregates overload by signature, so the catalog keys on
/// name plus argument types.
pub fn function_key(name: &str, argument_types: &[String]) -> String {
    format!("{name}({})", argument_types.join(","))
}

// --- Marshal class parsing (shapes v1/v2) ---

/// Parses an `org.apache.cassandra.db.marshal.*` validator string into a
/// [`DataType`], unwrapping `ReversedType`. The boolean reports whether the
/// type was reversed (descending clustering order).
pub fn parse_marshal_class(s: &str) -> (DataType, bool) {
    let s = s.trim();
    if let Some(inner) = parenthesized(s, "ReversedType") {
        let (data_type, _) = parse_marshal_class(inner);
        return (data_type, true);
    }
    if let Some(inner) = parenthesized(s, "FrozenType") {
        return parse_marshal_class(inner);
    }
    if let Some(inner) = parenthesized(s, "ListType") {
        return (
            DataType::List(Box::new(parse_marshal_class(inner).0)),
            false,
        );
    }
    if let Some(inner) = parenthesized(s, "SetType") {
        return (DataType::Set(Box::new(parse_marshal_class(inner).0)), false);
    }
    if let Some(inner) = parenthesized(s, "MapType") {
        if let Some((key, value)) = split_marshal_args(inner) {
            return (
                DataType::Map(
                    Box::new(parse_marshal_class(key).0),
                    Box::new(parse_marshal_class(value).0),
                ),
                false,
            );
        }
    }

    let simple = s.rsplit('.').next().unwrap_or(s);
    let data_type = match simple {
        "AsciiType" => DataType::Ascii,
        "LongType" => DataType::Bigint,
        "BytesType" => DataType::Blob,
        "BooleanType" => DataType::Boolean,
        "CounterColumnType" => DataType::Counter,
        "DecimalType" => DataType::Decimal,
        "DoubleType" => DataType::Double,
        "FloatType" => DataType::Float,
        "Int32Type" => DataType::Int,
        "UTF8Type" => DataType::Text,
        "TimestampType" | "DateType" => DataType::Timestamp,
        "UUIDType" => DataType::Uuid,
        "IntegerType" => DataType::Varint,
        "TimeUUIDType" => DataType::Timeuuid,
        "InetAddressType" => DataType::Inet,
        "SimpleDateType" => DataType::Date,
        "TimeType" => DataType::Time,
        "ShortType" => DataType::Smallint,
        "ByteType" => DataType::Tinyint,
        "DurationType" => DataType::Duration,
        other => DataType::Custom(other.to_owned()),
    };
    (data_type, false)
}

/// Splits a `key_validator` / `comparator` into its key components:
/// `CompositeType(a, b, ...)` yields each component, anything else is a
/// single-component key.
pub fn parse_composite_components(s: &str) -> Vec<DataType> {
    let s = s.trim();
    if let Some(inner) = parenthesized(s, "CompositeType") {
        let mut components = Vec::new();
        let mut rest = inner;
        while let Some((head, tail)) = split_marshal_args(rest) {
            components.push(parse_marshal_class(head).0);
            rest = tail;
        }
        let last = parse_marshal_class(rest).0;
        // ColumnToCollectionType trails composite comparators of tables with
        // collections; it is not a clustering component.
        if !matches!(&last, DataType::Custom(name) if name == "ColumnToCollectionType") {
            components.push(last);
        }
        components
    } else {
        vec![parse_marshal_class(s).0]
    }
}

/// `SomeType(args)` → `args`, matched by class-name suffix.
fn parenthesized<'a>(s: &'a str, class: &str) -> Option<&'a str> {
    let open = s.find('(')?;
    let prefix = &s[..open];
    if !prefix.rsplit('.').next()?.eq(class) {
        return None;
    }
    let inner = &s[open + 1..];
    let inner = inner.strip_suffix(')')?;
    Some(inner)
}

/// Splits at the first comma not nested inside parentheses.
fn split_marshal_args(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((s[..i].trim(), s[i + 1..].trim())),
            _ => {}
        }
    }
    None
}
