use zircon::core::cluster::ring::ReplicationStrategy;
use zircon::core::cluster::schema::{
    ColumnKind, RowSet, SchemaShape, TableRows, parse_composite_components, parse_keyspace_row,
    parse_marshal_class, parse_tables, parse_user_types,
};
use zircon::core::protocol::types::{ColumnSpec, CqlValue, DataType, TableSpec};

fn spec(name: &str) -> ColumnSpec {
    ColumnSpec {
        table_spec: TableSpec {
            keyspace: "system".into(),
            table: "test".into(),
        },
        name: name.into(),
        data_type: DataType::Text,
    }
}

fn text(s: &str) -> Option<CqlValue> {
    Some(CqlValue::Text(s.into()))
}

#[test]
fn test_schema_shape_from_release_version() {
    assert_eq!(SchemaShape::from_release_version("1.2.19"), SchemaShape::V1);
    assert_eq!(SchemaShape::from_release_version("2.0.17"), SchemaShape::V1);
    assert_eq!(SchemaShape::from_release_version("2.1.22"), SchemaShape::V2);
    assert_eq!(SchemaShape::from_release_version("2.2.8"), SchemaShape::V2);
    assert_eq!(SchemaShape::from_release_version("3.0.0"), SchemaShape::V3);
    assert_eq!(SchemaShape::from_release_version("3.11.4"), SchemaShape::V3);
    assert_eq!(SchemaShape::from_release_version("4.1.0"), SchemaShape::V3);
}

#[test]
fn test_keyspace_row_v1_json_strategy() {
    let rows = RowSet {
        columns: vec![
            spec("keyspace_name"),
            spec("strategy_class"),
            spec("strategy_options"),
        ],
        rows: vec![vec![
            text("app"),
            text("org.apache.cassandra.locator.SimpleStrategy"),
            text(r#"{"replication_factor":"2"}"#),
        ]],
    };
    let view = rows.views().next().unwrap();
    let ks = parse_keyspace_row(SchemaShape::V1, &view).unwrap();
    assert_eq!(ks.name, "app");
    assert_eq!(
        ks.strategy,
        ReplicationStrategy::Simple {
            replication_factor: 2
        }
    );
}

#[test]
fn test_keyspace_row_v3_replication_map() {
    let rows = RowSet {
        columns: vec![spec("keyspace_name"), spec("replication")],
        rows: vec![vec![
            text("app"),
            Some(CqlValue::Map(vec![
                (
                    CqlValue::Text("class".into()),
                    CqlValue::Text("org.apache.cassandra.locator.NetworkTopologyStrategy".into()),
                ),
                (CqlValue::Text("dc1".into()), CqlValue::Text("3".into())),
            ])),
        ]],
    };
    let view = rows.views().next().unwrap();
    let ks = parse_keyspace_row(SchemaShape::V3, &view).unwrap();
    match ks.strategy {
        ReplicationStrategy::NetworkTopology {
            replication_factor_per_dc,
        } => assert_eq!(replication_factor_per_dc.get("dc1"), Some(&3)),
        other => panic!("unexpected strategy {other:?}"),
    }
}

#[test]
fn test_tables_v3_kind_and_position() {
    let tables = RowSet {
        columns: vec![spec("keyspace_name"), spec("table_name")],
        rows: vec![vec![text("app"), text("users")]],
    };
    let columns = RowSet {
        columns: vec![
            spec("keyspace_name"),
            spec("table_name"),
            spec("column_name"),
            spec("kind"),
            ColumnSpec {
                data_type: DataType::Int,
                ..spec("position")
            },
            spec("type"),
        ],
        rows: vec![
            vec![
                text("app"),
                text("users"),
                text("id"),
                text("partition_key"),
                Some(CqlValue::Int(0)),
                text("uuid"),
            ],
            vec![
                text("app"),
                text("users"),
                text("when"),
                text("clustering"),
                Some(CqlValue::Int(0)),
                text("timestamp"),
            ],
            vec![
                text("app"),
                text("users"),
                text("name"),
                text("regular"),
                Some(CqlValue::Int(-1)),
                text("text"),
            ],
            vec![
                text("app"),
                text("users"),
                text("tags"),
                text("regular"),
                Some(CqlValue::Int(-1)),
                text("set<text>"),
            ],
        ],
    };
    let parsed = parse_tables(
        SchemaShape::V3,
        "app",
        &TableRows {
            tables: &tables,
            columns: &columns,
            indexes: None,
        },
    )
    .unwrap();
    let users = parsed.get("users").unwrap();
    assert_eq!(users.partition_key, vec!["id"]);
    assert_eq!(users.clustering_key, vec!["when"]);
    assert_eq!(users.columns["id"].kind, ColumnKind::PartitionKey);
    assert_eq!(users.columns["id"].data_type, DataType::Uuid);
    assert_eq!(
        users.columns["tags"].data_type,
        DataType::Set(Box::new(DataType::Text))
    );
}

#[test]
fn test_tables_v2_type_discriminators() {
    let tables = RowSet {
        columns: vec![spec("keyspace_name"), spec("columnfamily_name")],
        rows: vec![vec![text("app"), text("events")]],
    };
    let columns = RowSet {
        columns: vec![
            spec("keyspace_name"),
            spec("columnfamily_name"),
            spec("column_name"),
            spec("type"),
            spec("validator"),
            ColumnSpec {
                data_type: DataType::Int,
                ..spec("component_index")
            },
        ],
        rows: vec![
            vec![
                text("app"),
                text("events"),
                text("pk"),
                text("partition_key"),
                text("org.apache.cassandra.db.marshal.UTF8Type"),
                Some(CqlValue::Int(0)),
            ],
            vec![
                text("app"),
                text("events"),
                text("ck"),
                text("clustering_key"),
                text("org.apache.cassandra.db.marshal.LongType"),
                Some(CqlValue::Int(0)),
            ],
            vec![
                text("app"),
                text("events"),
                text("body"),
                text("regular"),
                text("org.apache.cassandra.db.marshal.BytesType"),
                None,
            ],
            vec![
                text("app"),
                text("events"),
                text("flags"),
                text("static"),
                text("org.apache.cassandra.db.marshal.Int32Type"),
                None,
            ],
        ],
    };
    let parsed = parse_tables(
        SchemaShape::V2,
        "app",
        &TableRows {
            tables: &tables,
            columns: &columns,
            indexes: None,
        },
    )
    .unwrap();
    let events = parsed.get("events").unwrap();
    assert_eq!(events.partition_key, vec!["pk"]);
    assert_eq!(events.clustering_key, vec!["ck"]);
    assert_eq!(events.columns["pk"].data_type, DataType::Text);
    assert_eq!(events.columns["ck"].data_type, DataType::Bigint);
    assert_eq!(events.columns["body"].kind, ColumnKind::Regular);
    assert_eq!(events.columns["flags"].kind, ColumnKind::Static);
}

#[test]
fn test_tables_v1_alias_reconstruction() {
    let tables = RowSet {
        columns: vec![
            spec("keyspace_name"),
            spec("columnfamily_name"),
            spec("key_aliases"),
            spec("column_aliases"),
            spec("key_validator"),
            spec("comparator"),
        ],
        rows: vec![vec![
            text("app"),
            text("logs"),
            text(r#"["shard","day"]"#),
            text(r#"["seq"]"#),
            text(
                "org.apache.cassandra.db.marshal.CompositeType(\
                 org.apache.cassandra.db.marshal.UTF8Type,\
                 org.apache.cassandra.db.marshal.Int32Type)",
            ),
            text("org.apache.cassandra.db.marshal.LongType"),
        ]],
    };
    let columns = RowSet {
        columns: vec![
            spec("keyspace_name"),
            spec("columnfamily_name"),
            spec("column_name"),
            spec("validator"),
            ColumnSpec {
                data_type: DataType::Int,
                ..spec("component_index")
            },
        ],
        rows: vec![vec![
            text("app"),
            text("logs"),
            text("message"),
            text("org.apache.cassandra.db.marshal.UTF8Type"),
            None,
        ]],
    };
    let parsed = parse_tables(
        SchemaShape::V1,
        "app",
        &TableRows {
            tables: &tables,
            columns: &columns,
            indexes: None,
        },
    )
    .unwrap();
    let logs = parsed.get("logs").unwrap();
    // Partition and clustering keys come from the aliases, in order.
    assert_eq!(logs.partition_key, vec!["shard", "day"]);
    assert_eq!(logs.clustering_key, vec!["seq"]);
    assert_eq!(logs.columns["shard"].data_type, DataType::Text);
    assert_eq!(logs.columns["day"].data_type, DataType::Int);
    assert_eq!(logs.columns["seq"].data_type, DataType::Bigint);
    assert_eq!(logs.columns["message"].kind, ColumnKind::Regular);
}

#[test]
fn test_marshal_class_parsing() {
    assert_eq!(
        parse_marshal_class("org.apache.cassandra.db.marshal.UTF8Type"),
        (DataType::Text, false)
    );
    assert_eq!(
        parse_marshal_class(
            "org.apache.cassandra.db.marshal.ReversedType(org.apache.cassandra.db.marshal.TimestampType)"
        ),
        (DataType::Timestamp, true)
    );
    assert_eq!(
        parse_marshal_class(
            "org.apache.cassandra.db.marshal.MapType(\
             org.apache.cassandra.db.marshal.UTF8Type,\
             org.apache.cassandra.db.marshal.LongType)"
        ),
        (
            DataType::Map(Box::new(DataType::Text), Box::new(DataType::Bigint)),
            false
        )
    );
}

#[test]
fn test_composite_components() {
    let components = parse_composite_components(
        "org.apache.cassandra.db.marshal.CompositeType(\
         org.apache.cassandra.db.marshal.UTF8Type,\
         org.apache.cassandra.db.marshal.Int32Type,\
         org.apache.cassandra.db.marshal.TimeUUIDType)",
    );
    assert_eq!(
        components,
        vec![DataType::Text, DataType::Int, DataType::Timeuuid]
    );

    // A plain (non-composite) validator is a single component.
    assert_eq!(
        parse_composite_components("org.apache.cassandra.db.marshal.LongType"),
        vec![DataType::Bigint]
    );
}

#[test]
fn test_cql_type_name_parsing() {
    assert_eq!(DataType::parse_cql_name("int"), DataType::Int);
    assert_eq!(
        DataType::parse_cql_name("frozen<list<int>>"),
        DataType::List(Box::new(DataType::Int))
    );
    assert_eq!(
        DataType::parse_cql_name("map<text, frozen<set<uuid>>>"),
        DataType::Map(
            Box::new(DataType::Text),
            Box::new(DataType::Set(Box::new(DataType::Uuid)))
        )
    );
    assert_eq!(
        DataType::parse_cql_name("tuple<int, text, bigint>"),
        DataType::Tuple(vec![DataType::Int, DataType::Text, DataType::Bigint])
    );
}

#[test]
fn test_user_type_rows() {
    let rows = RowSet {
        columns: vec![
            spec("keyspace_name"),
            spec("type_name"),
            ColumnSpec {
                data_type: DataType::List(Box::new(DataType::Text)),
                ..spec("field_names")
            },
            ColumnSpec {
                data_type: DataType::List(Box::new(DataType::Text)),
                ..spec("field_types")
            },
        ],
        rows: vec![vec![
            text("app"),
            text("address"),
            Some(CqlValue::List(vec![
                CqlValue::Text("street".into()),
                CqlValue::Text("zip".into()),
            ])),
            Some(CqlValue::List(vec![
                CqlValue::Text("text".into()),
                CqlValue::Text("int".into()),
            ])),
        ]],
    };
    let types = parse_user_types("app", &rows);
    let address = types.get("address").unwrap();
    assert_eq!(
        address.fields,
        vec![
            ("street".into(), DataType::Text),
            ("zip".into(), DataType::Int)
        ]
    );
}
