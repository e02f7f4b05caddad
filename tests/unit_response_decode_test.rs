use bytes::{BufMut, BytesMut};
use zircon::core::errors::{DbError, WriteType};
use zircon::core::protocol::consistency::Consistency;
use zircon::core::protocol::frame::{Frame, FrameFlags, Opcode, ProtocolVersion};
use zircon::core::protocol::response::{
    CqlResult, Response, SchemaChangeTarget, ServerEvent, decode_row_values,
};
use zircon::core::protocol::types::DataType;

fn response_frame(opcode: Opcode, body: BytesMut) -> Frame {
    Frame {
        version: ProtocolVersion::V4,
        flags: FrameFlags::empty(),
        stream: 1,
        opcode,
        body: body.freeze(),
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

#[test]
fn test_ready_and_authenticate() {
    let (ready, _) = Response::decode(&response_frame(Opcode::Ready, BytesMut::new())).unwrap();
    assert!(matches!(ready, Response::Ready));

    let mut body = BytesMut::new();
    put_string(&mut body, "org.apache.cassandra.auth.PasswordAuthenticator");
    let (auth, _) = Response::decode(&response_frame(Opcode::Authenticate, body)).unwrap();
    match auth {
        Response::Authenticate { authenticator } => {
            assert!(authenticator.ends_with("PasswordAuthenticator"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_error_unavailable_fields() {
    let mut body = BytesMut::new();
    body.put_i32(0x1000);
    put_string(&mut body, "not enough replicas");
    body.put_u16(Consistency::Quorum.code());
    body.put_i32(2); // required
    body.put_i32(1); // alive
    let (response, _) = Response::decode(&response_frame(Opcode::Error, body)).unwrap();
    match response {
        Response::Error { error, message } => {
            assert_eq!(message, "not enough replicas");
            assert_eq!(
                error,
                DbError::Unavailable {
                    consistency: Consistency::Quorum,
                    required: 2,
                    alive: 1
                }
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_error_read_timeout_fields() {
    let mut body = BytesMut::new();
    body.put_i32(0x1200);
    put_string(&mut body, "timed out");
    body.put_u16(Consistency::LocalQuorum.code());
    body.put_i32(1);
    body.put_i32(2);
    body.put_u8(0);
    let (response, _) = Response::decode(&response_frame(Opcode::Error, body)).unwrap();
    match response {
        Response::Error { error, .. } => assert_eq!(
            error,
            DbError::ReadTimeout {
                consistency: Consistency::LocalQuorum,
                received: 1,
                block_for: 2,
                data_present: false
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_error_write_timeout_carries_write_type() {
    let mut body = BytesMut::new();
    body.put_i32(0x1100);
    put_string(&mut body, "timed out");
    body.put_u16(Consistency::One.code());
    body.put_i32(0);
    body.put_i32(1);
    put_string(&mut body, "BATCH_LOG");
    let (response, _) = Response::decode(&response_frame(Opcode::Error, body)).unwrap();
    match response {
        Response::Error { error, .. } => match error {
            DbError::WriteTimeout { write_type, .. } => {
                assert_eq!(write_type, WriteType::BatchLog);
            }
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_error_unprepared_carries_id() {
    let mut body = BytesMut::new();
    body.put_i32(0x2500);
    put_string(&mut body, "unknown prepared id");
    body.put_u16(3);
    body.put_slice(&[0xaa, 0xbb, 0xcc]);
    let (response, _) = Response::decode(&response_frame(Opcode::Error, body)).unwrap();
    match response {
        Response::Error { error, .. } => assert_eq!(
            error,
            DbError::Unprepared {
                prepared_id: vec![0xaa, 0xbb, 0xcc]
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_error_already_exists_and_function_failure() {
    let mut body = BytesMut::new();
    body.put_i32(0x2400);
    put_string(&mut body, "exists");
    put_string(&mut body, "ks");
    put_string(&mut body, "table");
    let (response, _) = Response::decode(&response_frame(Opcode::Error, body)).unwrap();
    match response {
        Response::Error { error, .. } => assert_eq!(
            error,
            DbError::AlreadyExists {
                keyspace: "ks".into(),
                table: "table".into()
            }
        ),
        other => panic!("unexpected {other:?}"),
    }

    let mut body = BytesMut::new();
    body.put_i32(0x1400);
    put_string(&mut body, "boom");
    put_string(&mut body, "ks");
    put_string(&mut body, "fn");
    body.put_u16(1);
    put_string(&mut body, "int");
    let (response, _) = Response::decode(&response_frame(Opcode::Error, body)).unwrap();
    match response {
        Response::Error { error, .. } => assert_eq!(
            error,
            DbError::FunctionFailure {
                keyspace: "ks".into(),
                function: "fn".into(),
                arg_types: vec!["int".into()]
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_result_set_keyspace() {
    let mut body = BytesMut::new();
    body.put_i32(0x0003);
    put_string(&mut body, "app");
    let (response, _) = Response::decode(&response_frame(Opcode::Result, body)).unwrap();
    match response {
        Response::Result(result) => match *result {
            CqlResult::SetKeyspace(ks) => assert_eq!(ks, "app"),
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_result_rows_with_global_table_spec_and_paging_state() {
    let mut body = BytesMut::new();
    body.put_i32(0x0002); // Rows
    body.put_i32(0x0001 | 0x0002); // global spec + more pages
    body.put_i32(2); // columns
    // paging state
    body.put_i32(4);
    body.put_slice(b"curs");
    // global table spec
    put_string(&mut body, "app");
    put_string(&mut body, "users");
    // col 1: name int
    put_string(&mut body, "id");
    body.put_u16(0x0009);
    // col 2: name text
    put_string(&mut body, "name");
    body.put_u16(0x000D);
    // rows
    body.put_i32(2);
    for (id, name) in [(1i32, "alice"), (2, "bob")] {
        body.put_i32(4);
        body.put_i32(id);
        body.put_i32(name.len() as i32);
        body.put_slice(name.as_bytes());
    }

    let (response, _) = Response::decode(&response_frame(Opcode::Result, body)).unwrap();
    let rows = match response {
        Response::Result(result) => match *result {
            CqlResult::Rows(rows) => rows,
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(rows.rows_count, 2);
    assert_eq!(rows.metadata.paging_state.as_deref(), Some(&b"curs"[..]));
    assert_eq!(rows.metadata.columns.len(), 2);
    assert_eq!(rows.metadata.columns[0].name, "id");
    assert_eq!(rows.metadata.columns[0].data_type, DataType::Int);
    assert_eq!(rows.metadata.columns[1].data_type, DataType::Varchar);

    let decoded =
        decode_row_values(&rows, &rows.metadata.columns, ProtocolVersion::V4).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0][0].as_ref().unwrap().as_int(), Some(1));
    assert_eq!(decoded[1][1].as_ref().unwrap().as_text(), Some("bob"));
}

#[test]
fn test_result_rows_null_cells() {
    let mut body = BytesMut::new();
    body.put_i32(0x0002);
    body.put_i32(0x0001);
    body.put_i32(1);
    put_string(&mut body, "app");
    put_string(&mut body, "t");
    put_string(&mut body, "v");
    body.put_u16(0x0009);
    body.put_i32(1); // one row
    body.put_i32(-1); // null cell
    let (response, _) = Response::decode(&response_frame(Opcode::Result, body)).unwrap();
    let rows = match response {
        Response::Result(result) => match *result {
            CqlResult::Rows(rows) => rows,
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    };
    let decoded =
        decode_row_values(&rows, &rows.metadata.columns, ProtocolVersion::V4).unwrap();
    assert_eq!(decoded[0][0], None);
}

#[test]
fn test_result_prepared_with_pk_indices() {
    let mut body = BytesMut::new();
    body.put_i32(0x0004); // Prepared
    body.put_u16(2);
    body.put_slice(&[0xca, 0xfe]); // prepared id
    // bind metadata: global spec, 2 columns, pk index [0]
    body.put_i32(0x0001);
    body.put_i32(2);
    body.put_i32(1); // pk count (v4)
    body.put_u16(0);
    put_string(&mut body, "app");
    put_string(&mut body, "users");
    put_string(&mut body, "id");
    body.put_u16(0x0009);
    put_string(&mut body, "name");
    body.put_u16(0x000D);
    // result metadata: no metadata flag, zero columns
    body.put_i32(0x0004);
    body.put_i32(0);

    let (response, _) = Response::decode(&response_frame(Opcode::Result, body)).unwrap();
    match response {
        Response::Result(result) => match *result {
            CqlResult::Prepared(prepared) => {
                assert_eq!(prepared.id.as_ref(), &[0xca, 0xfe]);
                assert_eq!(prepared.metadata.pk_indices, vec![0]);
                assert_eq!(prepared.metadata.columns.len(), 2);
                assert!(prepared.result_metadata.no_metadata);
            }
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_event_status_change() {
    let mut body = BytesMut::new();
    put_string(&mut body, "STATUS_CHANGE");
    put_string(&mut body, "DOWN");
    body.put_u8(4);
    body.put_slice(&[127, 0, 0, 1]);
    body.put_i32(9042);
    let (response, _) = Response::decode(&response_frame(Opcode::Event, body)).unwrap();
    match response {
        Response::Event(ServerEvent::StatusChange { change, address }) => {
            assert_eq!(change, "DOWN");
            assert_eq!(address, "127.0.0.1:9042".parse().unwrap());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_event_schema_change_v3_shape() {
    let mut body = BytesMut::new();
    put_string(&mut body, "SCHEMA_CHANGE");
    put_string(&mut body, "UPDATED");
    put_string(&mut body, "TABLE");
    put_string(&mut body, "app");
    put_string(&mut body, "users");
    let (response, _) = Response::decode(&response_frame(Opcode::Event, body)).unwrap();
    match response {
        Response::Event(ServerEvent::SchemaChange(change)) => {
            assert_eq!(change.change_type, "UPDATED");
            assert_eq!(
                change.target,
                SchemaChangeTarget::Table {
                    keyspace: "app".into(),
                    table: "users".into()
                }
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_warning_flag_extracts_warnings_before_body() {
    let mut body = BytesMut::new();
    // warnings: one string
    body.put_u16(1);
    put_string(&mut body, "Aggregation query used without partition key");
    // then a VOID result
    body.put_i32(0x0001);
    let frame = Frame {
        version: ProtocolVersion::V4,
        flags: FrameFlags::WARNING,
        stream: 1,
        opcode: Opcode::Result,
        body: body.freeze(),
    };
    let (response, extras) = Response::decode(&frame).unwrap();
    assert!(matches!(response, Response::Result(r) if matches!(*r, CqlResult::Void)));
    assert_eq!(extras.warnings.len(), 1);
}

#[test]
fn test_tracing_flag_extracts_tracing_id() {
    let mut body = BytesMut::new();
    body.put_slice(&[0x11; 16]); // tracing uuid
    body.put_i32(0x0001); // VOID
    let frame = Frame {
        version: ProtocolVersion::V4,
        flags: FrameFlags::TRACING,
        stream: 1,
        opcode: Opcode::Result,
        body: body.freeze(),
    };
    let (_, extras) = Response::decode(&frame).unwrap();
    assert_eq!(
        extras.tracing_id.unwrap(),
        uuid::Uuid::from_bytes([0x11; 16])
    );
}

#[test]
fn test_schema_change_v2_shape_empty_table_means_keyspace() {
    let mut body = BytesMut::new();
    body.put_i32(0x0005);
    put_string(&mut body, "CREATED");
    put_string(&mut body, "app");
    put_string(&mut body, "");
    let frame = Frame {
        version: ProtocolVersion::V2,
        flags: FrameFlags::empty(),
        stream: 1,
        opcode: Opcode::Result,
        body: body.freeze(),
    };
    let (response, _) = Response::decode(&frame).unwrap();
    match response {
        Response::Result(result) => match *result {
            CqlResult::SchemaChange(change) => {
                assert_eq!(
                    change.target,
                    SchemaChangeTarget::Keyspace {
                        keyspace: "app".into()
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_unknown_error_code_is_preserved() {
    let mut body = BytesMut::new();
    body.put_i32(0x7777);
    put_string(&mut body, "mystery");
    let (response, _) = Response::decode(&response_frame(Opcode::Error, body)).unwrap();
    match response {
        Response::Error { error, .. } => {
            assert_eq!(error, DbError::Other(0x7777));
            assert_eq!(error.code(), 0x7777);
        }
        other => panic!("unexpected {other:?}"),
    }
}
