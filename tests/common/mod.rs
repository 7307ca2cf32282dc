//! In-process Firebird server for integration tests
//!
//! Speaks enough of the remote protocol over `tokio::io::duplex` to run
//! attach, transactions, statements, cursors and blobs against scripted SQL.
//! Every request is logged so tests can check what reached the wire and in
//! which order.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use firebird_rs::buffer::{ReadBuffer, WriteBuffer};
use firebird_rs::constants::{
    blr, charset, dsql, gds, info, isc_arg, protocol, segment, sql_type, stmt_type, Operation,
    FETCH_NO_MORE_ROWS,
};
use firebird_rs::transport::{receive, StreamTransport, Transport};
use firebird_rs::types::{
    decode_date, decode_time, decode_timestamp, encode_date, encode_time, encode_timestamp,
};
use firebird_rs::{
    BlobId, ColumnInfo, Config, Connector, Database, Error, Events, Numeric, Result, Value,
};
use tokio::io::DuplexStream;

/// Database path the server refuses to open
pub const MISSING_DATABASE: &str = "/db/missing.fdb";

/// What the server does with a prepared SQL text
#[derive(Debug, Clone)]
pub enum Script {
    /// Cursor over fixed rows
    Select {
        columns: Vec<ColumnInfo>,
        inputs: Vec<ColumnInfo>,
        rows: Vec<Vec<Value>>,
    },
    /// INSERT / UPDATE / DELETE reporting `affected` rows
    Dml {
        kind: u32,
        inputs: Vec<ColumnInfo>,
        affected: u64,
    },
    /// EXECUTE PROCEDURE returning one output row
    Procedure {
        inputs: Vec<ColumnInfo>,
        outputs: Vec<ColumnInfo>,
        row: Vec<Value>,
    },
    /// DDL, answered with success
    Ddl,
    /// Prepares fine, fails on execute with the given gds code
    FailOnExecute(u32),
}

/// Column descriptor shorthand
pub fn column(alias: &str, ty: u16) -> ColumnInfo {
    let mut column = ColumnInfo::new(alias, ty);
    column.field = alias.to_string();
    column.relation = "T".to_string();
    column.nullable = true;
    column.length = match ty {
        sql_type::SHORT => 2,
        sql_type::LONG | sql_type::TYPE_DATE | sql_type::TYPE_TIME | sql_type::FLOAT => 4,
        sql_type::BOOLEAN => 1,
        sql_type::VARYING | sql_type::TEXT => 80,
        _ => 8,
    };
    if ty == sql_type::VARYING || ty == sql_type::TEXT {
        column.subtype = charset::UTF8 as i16;
    }
    column
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<HashMap<String, Script>>,
    ops: Mutex<Vec<u32>>,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
    tpbs: Mutex<Vec<Vec<u8>>>,
    blobs: Mutex<HashMap<BlobId, Vec<Vec<u8>>>>,
    next_blob: AtomicUsize,
    attaches: AtomicUsize,
    creates: AtomicUsize,
    sessions: AtomicUsize,
}

fn new_blob_id(shared: &Shared) -> BlobId {
    let n = shared.next_blob.fetch_add(1, Ordering::SeqCst) as u32;
    BlobId::new(128, n + 1)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted server; clones share scripts, logs and stored blobs
#[derive(Clone, Default)]
pub struct FakeServer {
    shared: Arc<Shared>,
}

impl FakeServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.script(
            "SELECT 1 FROM RDB$DATABASE",
            Script::Select {
                columns: vec![column("CONSTANT", sql_type::LONG)],
                inputs: Vec::new(),
                rows: vec![vec![Value::Integer(1)]],
            },
        );
        server
    }

    pub fn script(&self, sql: &str, script: Script) -> &Self {
        lock(&self.shared.scripts).insert(sql.to_string(), script);
        self
    }

    /// Register a SELECT returning `count` rows of `(ID INTEGER, NAME VARCHAR)`
    ///
    /// Each `?` in `sql` becomes an INTEGER parameter.
    pub fn people(&self, sql: &str, count: i64) -> &Self {
        let inputs = sql.matches('?').map(|_| column("ID", sql_type::LONG)).collect();
        let rows = (1..=count)
            .map(|i| vec![Value::Integer(i), Value::String(format!("person {}", i))])
            .collect();
        self.script(
            sql,
            Script::Select {
                columns: vec![column("ID", sql_type::LONG), column("NAME", sql_type::VARYING)],
                inputs,
                rows,
            },
        )
    }

    /// Store a blob directly, split into the given segments
    pub fn store_blob(&self, segments: Vec<Vec<u8>>) -> BlobId {
        let id = new_blob_id(&self.shared);
        lock(&self.shared.blobs).insert(id, segments);
        id
    }

    /// Segments stored for a blob
    pub fn blob_segments(&self, id: BlobId) -> Option<Vec<Vec<u8>>> {
        lock(&self.shared.blobs).get(&id).cloned()
    }

    /// Operation codes received, in arrival order
    pub fn ops(&self) -> Vec<u32> {
        lock(&self.shared.ops).clone()
    }

    pub fn count(&self, op: Operation) -> usize {
        lock(&self.shared.ops).iter().filter(|&&o| o == op as u32).count()
    }

    /// Executed statements with their decoded parameters
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.shared.executed).clone()
    }

    pub fn tpbs(&self) -> Vec<Vec<u8>> {
        lock(&self.shared.tpbs).clone()
    }

    pub fn attaches(&self) -> usize {
        self.shared.attaches.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.shared.creates.load(Ordering::SeqCst)
    }

    /// Sessions whose socket is still open
    pub fn sessions(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    /// Client side of a fresh duplex pipe served by this server
    pub fn transport(&self) -> StreamTransport<DuplexStream> {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let shared = self.shared.clone();
        shared.sessions.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            serve(&shared, server).await;
            shared.sessions.fetch_sub(1, Ordering::SeqCst);
        });
        StreamTransport::new(client)
    }

    pub async fn attach(&self, config: Config) -> Result<Database> {
        self.attach_with_events(config, Events::new()).await
    }

    pub async fn attach_with_events(&self, config: Config, events: Events) -> Result<Database> {
        Database::with_transport(self.transport(), config, events, false).await
    }
}

#[async_trait]
impl Connector for FakeServer {
    async fn connect(&self) -> Result<Database> {
        self.attach(config()).await
    }
}

/// Configuration pointing at the fake server
pub fn config() -> Config {
    Config::new("fake", "/db/test.fdb", "SYSDBA", "masterkey")
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug)]
enum Req {
    Connect,
    Attach { create: bool, database: String },
    Detach,
    Disconnect,
    Transaction { tpb: Vec<u8> },
    End { op: Operation, tx: u32 },
    Allocate,
    Prepare { tx: u32, stmt: u32, sql: String, items: Vec<u8> },
    InfoSql { stmt: u32, items: Vec<u8> },
    Execute { stmt: u32, tx: u32, params: Vec<Value>, output: bool },
    Fetch { stmt: u32, count: u32 },
    Free { stmt: u32, option: u32 },
    OpenBlob { tx: u32, id: BlobId },
    CreateBlob { tx: u32 },
    GetSegment { blob: u32 },
    BatchSegments { blob: u32, buffer: Bytes },
    EndBlob { blob: u32, cancel: bool },
}

fn op_of(req: &Req) -> Operation {
    match req {
        Req::Connect => Operation::Connect,
        Req::Attach { create: true, .. } => Operation::Create,
        Req::Attach { .. } => Operation::Attach,
        Req::Detach => Operation::Detach,
        Req::Disconnect => Operation::Disconnect,
        Req::Transaction { .. } => Operation::Transaction,
        Req::End { op, .. } => *op,
        Req::Allocate => Operation::AllocateStatement,
        Req::Prepare { .. } => Operation::PrepareStatement,
        Req::InfoSql { .. } => Operation::InfoSql,
        Req::Execute { output: true, .. } => Operation::Execute2,
        Req::Execute { .. } => Operation::Execute,
        Req::Fetch { .. } => Operation::Fetch,
        Req::Free { .. } => Operation::FreeStatement,
        Req::OpenBlob { .. } => Operation::OpenBlob,
        Req::CreateBlob { .. } => Operation::CreateBlob2,
        Req::GetSegment { .. } => Operation::GetSegment,
        Req::BatchSegments { .. } => Operation::BatchSegments,
        Req::EndBlob { cancel: true, .. } => Operation::CancelBlob,
        Req::EndBlob { .. } => Operation::CloseBlob,
    }
}

fn parse_request(buf: &mut ReadBuffer) -> Result<Req> {
    let op = Operation::try_from(buf.read_u32()?)?;
    Ok(match op {
        Operation::Connect => {
            buf.read_u32()?; // op_attach
            buf.read_u32()?; // connect version
            buf.read_u32()?; // architecture
            buf.read_string()?;
            let count = buf.read_u32()?;
            buf.read_opaque()?;
            buf.skip(count as usize * 20)?;
            Req::Connect
        }
        Operation::Attach | Operation::Create => {
            buf.read_u32()?;
            let database = buf.read_string()?;
            buf.read_opaque()?;
            Req::Attach {
                create: op == Operation::Create,
                database,
            }
        }
        Operation::Detach => {
            buf.read_u32()?;
            Req::Detach
        }
        Operation::Disconnect => Req::Disconnect,
        Operation::Transaction => {
            buf.read_u32()?;
            Req::Transaction {
                tpb: buf.read_opaque()?.to_vec(),
            }
        }
        Operation::Commit
        | Operation::CommitRetaining
        | Operation::Rollback
        | Operation::RollbackRetaining => Req::End {
            op,
            tx: buf.read_u32()?,
        },
        Operation::AllocateStatement => {
            buf.read_u32()?;
            Req::Allocate
        }
        Operation::PrepareStatement => {
            let tx = buf.read_u32()?;
            let stmt = buf.read_u32()?;
            buf.read_u32()?; // dialect
            let sql = buf.read_string()?;
            let items = buf.read_opaque()?.to_vec();
            buf.read_u32()?;
            Req::Prepare {
                tx,
                stmt,
                sql,
                items,
            }
        }
        Operation::InfoSql => {
            let stmt = buf.read_u32()?;
            buf.read_u32()?;
            let items = buf.read_opaque()?.to_vec();
            buf.read_u32()?;
            Req::InfoSql { stmt, items }
        }
        Operation::Execute | Operation::Execute2 => {
            let stmt = buf.read_u32()?;
            let tx = buf.read_u32()?;
            let blr = buf.read_opaque()?;
            buf.read_u32()?; // message number
            let params = match buf.read_u32()? {
                0 => Vec::new(),
                _ => read_params(&blr, buf)?,
            };
            let output = op == Operation::Execute2;
            if output {
                buf.read_opaque()?;
                buf.read_u32()?;
            }
            Req::Execute {
                stmt,
                tx,
                params,
                output,
            }
        }
        Operation::Fetch => {
            let stmt = buf.read_u32()?;
            buf.read_opaque()?;
            buf.read_u32()?;
            let count = buf.read_u32()?;
            Req::Fetch { stmt, count }
        }
        Operation::FreeStatement => Req::Free {
            stmt: buf.read_u32()?,
            option: buf.read_u32()?,
        },
        Operation::OpenBlob => Req::OpenBlob {
            tx: buf.read_u32()?,
            id: buf.read_quad()?,
        },
        Operation::CreateBlob2 => {
            buf.read_opaque()?;
            let tx = buf.read_u32()?;
            buf.read_quad()?;
            Req::CreateBlob { tx }
        }
        Operation::GetSegment => {
            let blob = buf.read_u32()?;
            buf.read_u32()?;
            buf.read_opaque()?;
            Req::GetSegment { blob }
        }
        Operation::BatchSegments => {
            let blob = buf.read_u32()?;
            buf.read_u32()?;
            Req::BatchSegments {
                blob,
                buffer: buf.read_opaque()?,
            }
        }
        Operation::CloseBlob | Operation::CancelBlob => Req::EndBlob {
            blob: buf.read_u32()?,
            cancel: op == Operation::CancelBlob,
        },
        other => return Err(Error::Protocol(format!("fake server cannot handle {:?}", other))),
    })
}

#[derive(Debug, Clone, Copy)]
enum ParamKind {
    Text { charset: u16, length: usize },
    Int64 { scale: i8 },
    Double,
    Bool,
    Date,
    Time,
    Timestamp,
    Quad,
}

fn malformed_blr() -> Error {
    Error::Protocol("malformed parameter BLR".to_string())
}

fn parse_blr(blr: &[u8]) -> Result<Vec<ParamKind>> {
    let mut kinds = Vec::new();
    let mut rest = blr.get(6..).ok_or_else(malformed_blr)?;
    loop {
        let code = *rest.first().ok_or_else(malformed_blr)?;
        let (kind, width) = match code {
            blr::END => return Ok(kinds),
            blr::TEXT2 => {
                let b = rest.get(1..5).ok_or_else(malformed_blr)?;
                let charset = u16::from_le_bytes([b[0], b[1]]);
                let length = u16::from_le_bytes([b[2], b[3]]) as usize;
                (ParamKind::Text { charset, length }, 5)
            }
            blr::INT64 => {
                let scale = *rest.get(1).ok_or_else(malformed_blr)? as i8;
                (ParamKind::Int64 { scale }, 2)
            }
            blr::QUAD => (ParamKind::Quad, 2),
            blr::DOUBLE => (ParamKind::Double, 1),
            blr::BOOL => (ParamKind::Bool, 1),
            blr::SQL_DATE => (ParamKind::Date, 1),
            blr::SQL_TIME => (ParamKind::Time, 1),
            blr::TIMESTAMP => (ParamKind::Timestamp, 1),
            _ => return Err(malformed_blr()),
        };
        kinds.push(kind);
        // Every value is followed by its `blr_short 0` null indicator
        rest = rest.get(width + 2..).ok_or_else(malformed_blr)?;
    }
}

fn read_params(blr: &[u8], buf: &mut ReadBuffer) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    for kind in parse_blr(blr)? {
        let value = match kind {
            ParamKind::Text { charset: cs, length } => {
                let bytes = buf.read_fixed_opaque(length)?;
                if cs == charset::OCTETS {
                    Value::Bytes(bytes.to_vec())
                } else {
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
            }
            ParamKind::Int64 { scale: 0 } => Value::Integer(buf.read_i64()?),
            ParamKind::Int64 { scale } => {
                Value::Numeric(Numeric::new(buf.read_i64()?, scale as i32))
            }
            ParamKind::Double => Value::Float(buf.read_f64()?),
            ParamKind::Bool => Value::Boolean(buf.read_fixed_opaque(1)?[0] != 0),
            ParamKind::Date => Value::Date(decode_date(buf.read_i32()?)?),
            ParamKind::Time => Value::Time(decode_time(buf.read_u32()?)?),
            ParamKind::Timestamp => {
                let date = buf.read_i32()?;
                let time = buf.read_u32()?;
                Value::Timestamp(decode_timestamp(date, time)?)
            }
            ParamKind::Quad => Value::Blob(buf.read_quad()?),
        };
        let null = buf.read_i32()? != 0;
        values.push(if null { Value::Null } else { value });
    }
    Ok(values)
}

// =============================================================================
// Replies
// =============================================================================

fn ok(handle: u32, blob_id: BlobId, data: &[u8]) -> Bytes {
    let mut buf = WriteBuffer::new();
    write_ok(&mut buf, handle, blob_id, data);
    buf.freeze()
}

fn write_ok(buf: &mut WriteBuffer, handle: u32, blob_id: BlobId, data: &[u8]) {
    buf.write_u32(Operation::Response as u32);
    buf.write_u32(handle);
    buf.write_quad(blob_id);
    let _ = buf.write_opaque(data);
    buf.write_u32(isc_arg::GDS);
    buf.write_u32(0);
    buf.write_u32(isc_arg::END);
}

fn error(codes: &[u32]) -> Bytes {
    let mut buf = WriteBuffer::new();
    buf.write_u32(Operation::Response as u32);
    buf.write_u32(0);
    buf.write_quad(BlobId::default());
    let _ = buf.write_opaque(&[]);
    for code in codes {
        buf.write_u32(isc_arg::GDS);
        buf.write_u32(*code);
    }
    buf.write_u32(isc_arg::END);
    buf.freeze()
}

fn int_item(out: &mut Vec<u8>, tag: u8, value: i32) {
    out.push(tag);
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
}

fn str_item(out: &mut Vec<u8>, tag: u8, value: &str) {
    out.push(tag);
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn describe_list(out: &mut Vec<u8>, tag: u8, columns: &[ColumnInfo]) {
    out.push(tag);
    int_item(out, info::SQL_DESCRIBE_VARS, columns.len() as i32);
    for (i, column) in columns.iter().enumerate() {
        int_item(out, info::SQL_SQLDA_SEQ, i as i32 + 1);
        int_item(out, info::SQL_TYPE, column.sql_type as i32 | column.nullable as i32);
        int_item(out, info::SQL_SUB_TYPE, column.subtype as i32);
        int_item(out, info::SQL_SCALE, column.scale as i32);
        int_item(out, info::SQL_LENGTH, column.length as i32);
        int_item(out, info::SQL_NULL_IND, 0);
        str_item(out, info::SQL_FIELD, &column.field);
        str_item(out, info::SQL_RELATION, &column.relation);
        str_item(out, info::SQL_OWNER, "SYSDBA");
        str_item(out, info::SQL_ALIAS, &column.alias);
        out.push(info::SQL_DESCRIBE_END);
    }
}

fn describe(script: &Script, want_plan: bool) -> Vec<u8> {
    let none: &[ColumnInfo] = &[];
    let (kind, outputs, inputs) = match script {
        Script::Select {
            columns, inputs, ..
        } => (stmt_type::SELECT, columns.as_slice(), inputs.as_slice()),
        Script::Dml { kind, inputs, .. } => (*kind, none, inputs.as_slice()),
        Script::Procedure {
            inputs, outputs, ..
        } => (stmt_type::EXEC_PROCEDURE, outputs.as_slice(), inputs.as_slice()),
        Script::Ddl => (stmt_type::DDL, none, none),
        Script::FailOnExecute(_) => (stmt_type::UPDATE, none, none),
    };
    let mut out = Vec::new();
    int_item(&mut out, info::SQL_STMT_TYPE, kind as i32);
    if want_plan {
        str_item(&mut out, info::SQL_GET_PLAN, "\nPLAN (T NATURAL)");
    }
    describe_list(&mut out, info::SQL_SELECT, outputs);
    describe_list(&mut out, info::SQL_BIND, inputs);
    out.push(info::END);
    out
}

fn write_value(buf: &mut WriteBuffer, column: &ColumnInfo, value: &Value) {
    let null = value.is_null();
    match column.sql_type {
        sql_type::VARYING => {
            let bytes = match value {
                Value::String(s) => s.as_bytes().to_vec(),
                Value::Bytes(b) => b.clone(),
                _ => Vec::new(),
            };
            let _ = buf.write_opaque(&bytes);
        }
        sql_type::TEXT => {
            let mut bytes = value.as_str().unwrap_or("").as_bytes().to_vec();
            bytes.resize(column.length as usize, b' ');
            buf.write_fixed_opaque(&bytes);
        }
        sql_type::SHORT | sql_type::LONG => {
            buf.write_i32(value.as_i64().unwrap_or(0) as i32)
        }
        sql_type::INT64 => buf.write_i64(match value {
            Value::Numeric(n) => n.value,
            other => other.as_i64().unwrap_or(0),
        }),
        sql_type::DOUBLE => buf.write_f64(value.as_f64().unwrap_or(0.0)),
        sql_type::BOOLEAN => buf.write_fixed_opaque(&[value.as_bool().unwrap_or(false) as u8]),
        sql_type::TYPE_DATE => buf.write_i32(value.as_date().map_or(0, |d| encode_date(&d))),
        sql_type::TYPE_TIME => buf.write_u32(value.as_time().map_or(0, |t| encode_time(&t))),
        sql_type::TIMESTAMP => {
            let (date, time) = value
                .as_timestamp()
                .map_or((0, 0), |ts| encode_timestamp(&ts));
            buf.write_i32(date);
            buf.write_u32(time);
        }
        sql_type::BLOB => buf.write_quad(value.as_blob_id().unwrap_or_default()),
        other => panic!("fake server cannot encode SQL type {}", other),
    }
    buf.write_i32(if null { -1 } else { 0 });
}

// =============================================================================
// Session
// =============================================================================

struct Cursor {
    position: usize,
    tx: u32,
}

#[derive(Default)]
struct Stmt {
    sql: Option<String>,
    cursor: Option<Cursor>,
    affected: Option<(u32, u64)>,
}

enum OpenBlob {
    Read { id: BlobId, next: usize },
    Write { id: BlobId, segments: Vec<Vec<u8>> },
}

#[derive(Default)]
struct Session {
    next_handle: u32,
    transactions: HashSet<u32>,
    statements: HashMap<u32, Stmt>,
    blobs: HashMap<u32, OpenBlob>,
}

impl Session {
    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

async fn serve(shared: &Shared, io: DuplexStream) {
    let mut transport = StreamTransport::new(io);
    let mut session = Session::default();
    loop {
        let req = match receive(&mut transport, parse_request).await {
            Ok(req) => req,
            Err(_) => return,
        };
        lock(&shared.ops).push(op_of(&req) as u32);
        let reply = match handle(shared, &mut session, req) {
            Some(reply) => reply,
            None => {
                let _ = transport.close().await;
                return;
            }
        };
        if transport.send(&reply).await.is_err() {
            return;
        }
    }
}

fn script_for(shared: &Shared, session: &Session, stmt: u32) -> Option<(String, Script)> {
    let sql = session.statements.get(&stmt)?.sql.clone()?;
    let script = lock(&shared.scripts).get(&sql).cloned()?;
    Some((sql, script))
}

fn handle(shared: &Shared, session: &mut Session, req: Req) -> Option<Bytes> {
    let reply = match req {
        Req::Connect => {
            let mut buf = WriteBuffer::new();
            buf.write_u32(Operation::Accept as u32);
            buf.write_u32(protocol::VERSION12);
            buf.write_u32(protocol::ARCHITECTURE_GENERIC);
            buf.write_u32(protocol::PTYPE_BATCH_SEND);
            buf.freeze()
        }
        Req::Attach { create, database } => {
            if !create && database == MISSING_DATABASE {
                return Some(error(&[gds::IO_ERROR]));
            }
            if create {
                shared.creates.fetch_add(1, Ordering::SeqCst);
            }
            shared.attaches.fetch_add(1, Ordering::SeqCst);
            ok(0, BlobId::default(), &[])
        }
        Req::Detach => ok(0, BlobId::default(), &[]),
        Req::Disconnect => return None,
        Req::Transaction { tpb } => {
            lock(&shared.tpbs).push(tpb);
            let handle = session.allocate();
            session.transactions.insert(handle);
            ok(handle, BlobId::default(), &[])
        }
        Req::End { op, tx } => {
            if !session.transactions.contains(&tx) {
                return Some(error(&[gds::BAD_TRANS_HANDLE]));
            }
            if matches!(op, Operation::Commit | Operation::Rollback) {
                session.transactions.remove(&tx);
                for stmt in session.statements.values_mut() {
                    if stmt.cursor.as_ref().map_or(false, |c| c.tx == tx) {
                        stmt.cursor = None;
                    }
                }
            }
            ok(0, BlobId::default(), &[])
        }
        Req::Allocate => {
            let handle = session.allocate();
            session.statements.insert(handle, Stmt::default());
            ok(handle, BlobId::default(), &[])
        }
        Req::Prepare {
            tx,
            stmt,
            sql,
            items,
        } => {
            if !session.transactions.contains(&tx) {
                return Some(error(&[gds::BAD_TRANS_HANDLE]));
            }
            let script = lock(&shared.scripts).get(&sql).cloned();
            let (statement, script) = match (session.statements.get_mut(&stmt), script) {
                (Some(statement), Some(script)) => (statement, script),
                (None, _) => return Some(error(&[gds::BAD_STMT_HANDLE])),
                (_, None) => {
                    return Some(error(&[gds::DSQL_ERROR, gds::SQLERR, gds::DSQL_TOKEN_UNK_ERR]))
                }
            };
            statement.sql = Some(sql);
            statement.cursor = None;
            ok(0, BlobId::default(), &describe(&script, items.contains(&info::SQL_GET_PLAN)))
        }
        Req::InfoSql { stmt, items } => {
            let statement = match session.statements.get(&stmt) {
                Some(statement) => statement,
                None => return Some(error(&[gds::BAD_STMT_HANDLE])),
            };
            let mut data = Vec::new();
            if items.first() == Some(&info::SQL_RECORDS) {
                let mut counts = Vec::new();
                let (kind, affected) = statement.affected.unwrap_or((0, 0));
                for (tag, code) in [
                    (info::REQ_SELECT_COUNT, stmt_type::SELECT),
                    (info::REQ_INSERT_COUNT, stmt_type::INSERT),
                    (info::REQ_UPDATE_COUNT, stmt_type::UPDATE),
                    (info::REQ_DELETE_COUNT, stmt_type::DELETE),
                ] {
                    let value = if kind == code { affected } else { 0 };
                    int_item(&mut counts, tag, value as i32);
                }
                counts.push(info::END);
                data.push(info::SQL_RECORDS);
                data.extend_from_slice(&(counts.len() as u16).to_le_bytes());
                data.extend(counts);
            }
            data.push(info::END);
            ok(0, BlobId::default(), &data)
        }
        Req::Execute {
            stmt,
            tx,
            params,
            output,
        } => {
            if !session.transactions.contains(&tx) {
                return Some(error(&[gds::BAD_TRANS_HANDLE]));
            }
            let (sql, script) = match script_for(shared, session, stmt) {
                Some(found) => found,
                None => return Some(error(&[gds::BAD_STMT_HANDLE])),
            };
            let statement = session.statements.get_mut(&stmt)?;
            if statement.cursor.is_some() {
                // Cursor still open: the client must close it first
                return Some(error(&[gds::DSQL_ERROR]));
            }
            lock(&shared.executed).push((sql, params));
            match script {
                Script::Select { .. } => {
                    statement.cursor = Some(Cursor { position: 0, tx });
                    ok(0, BlobId::default(), &[])
                }
                Script::Dml { kind, affected, .. } => {
                    statement.affected = Some((kind, affected));
                    ok(0, BlobId::default(), &[])
                }
                Script::Procedure { outputs, row, .. } if output => {
                    let mut buf = WriteBuffer::new();
                    buf.write_u32(Operation::SqlResponse as u32);
                    buf.write_u32(1);
                    for (column, value) in outputs.iter().zip(&row) {
                        write_value(&mut buf, column, value);
                    }
                    write_ok(&mut buf, 0, BlobId::default(), &[]);
                    buf.freeze()
                }
                Script::Procedure { .. } | Script::Ddl => ok(0, BlobId::default(), &[]),
                Script::FailOnExecute(code) => error(&[code]),
            }
        }
        Req::Fetch { stmt, count } => {
            let (columns, rows) = match script_for(shared, session, stmt) {
                Some((_, Script::Select { columns, rows, .. })) => (columns, rows),
                _ => return Some(error(&[gds::BAD_STMT_HANDLE])),
            };
            let cursor = match session.statements.get_mut(&stmt).and_then(|s| s.cursor.as_mut()) {
                Some(cursor) => cursor,
                None => return Some(error(&[gds::DSQL_ERROR])),
            };
            let mut buf = WriteBuffer::new();
            let mut sent = 0;
            while sent < count as usize && cursor.position < rows.len() {
                buf.write_u32(Operation::FetchResponse as u32);
                buf.write_u32(0);
                buf.write_u32(1);
                for (column, value) in columns.iter().zip(&rows[cursor.position]) {
                    write_value(&mut buf, column, value);
                }
                cursor.position += 1;
                sent += 1;
            }
            buf.write_u32(Operation::FetchResponse as u32);
            buf.write_u32(if sent < count as usize { FETCH_NO_MORE_ROWS } else { 0 });
            buf.write_u32(0);
            buf.freeze()
        }
        Req::Free { stmt, option } => {
            let statement = match session.statements.get_mut(&stmt) {
                Some(statement) => statement,
                None => return Some(error(&[gds::BAD_STMT_HANDLE])),
            };
            if option == dsql::DROP {
                session.statements.remove(&stmt);
            } else if statement.cursor.take().is_none() {
                return Some(error(&[gds::DSQL_ERROR]));
            }
            ok(0, BlobId::default(), &[])
        }
        Req::OpenBlob { tx, id } => {
            if !session.transactions.contains(&tx) {
                return Some(error(&[gds::BAD_TRANS_HANDLE]));
            }
            if !lock(&shared.blobs).contains_key(&id) {
                return Some(error(&[gds::BAD_SEGSTR_HANDLE]));
            }
            let handle = session.allocate();
            session.blobs.insert(handle, OpenBlob::Read { id, next: 0 });
            ok(handle, BlobId::default(), &[])
        }
        Req::CreateBlob { tx } => {
            if !session.transactions.contains(&tx) {
                return Some(error(&[gds::BAD_TRANS_HANDLE]));
            }
            let id = new_blob_id(shared);
            let handle = session.allocate();
            session.blobs.insert(
                handle,
                OpenBlob::Write {
                    id,
                    segments: Vec::new(),
                },
            );
            ok(handle, id, &[])
        }
        Req::GetSegment { blob } => match session.blobs.get_mut(&blob) {
            Some(OpenBlob::Read { id, next }) => {
                let segment = lock(&shared.blobs).get(id).and_then(|s| s.get(*next).cloned());
                match segment {
                    Some(data) => {
                        *next += 1;
                        let mut buffer = (data.len() as u16).to_le_bytes().to_vec();
                        buffer.extend(data);
                        ok(segment::OK, BlobId::default(), &buffer)
                    }
                    None => ok(segment::EOF, BlobId::default(), &[]),
                }
            }
            _ => error(&[gds::BAD_SEGSTR_HANDLE]),
        },
        Req::BatchSegments { blob, buffer } => match session.blobs.get_mut(&blob) {
            Some(OpenBlob::Write { segments, .. }) => {
                let mut rest = &buffer[..];
                while rest.len() >= 2 {
                    let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
                    let end = (2 + len).min(rest.len());
                    segments.push(rest[2..end].to_vec());
                    rest = &rest[end..];
                }
                ok(0, BlobId::default(), &[])
            }
            _ => error(&[gds::BAD_SEGSTR_HANDLE]),
        },
        Req::EndBlob { blob, cancel } => match session.blobs.remove(&blob) {
            Some(OpenBlob::Write { id, segments }) if !cancel => {
                lock(&shared.blobs).insert(id, segments);
                ok(0, BlobId::default(), &[])
            }
            Some(_) => ok(0, BlobId::default(), &[]),
            None => error(&[gds::BAD_SEGSTR_HANDLE]),
        },
    };
    Some(reply)
}
