//! Firebird wire protocol constants
//!
//! Operation codes, SQL type codes, info items and parameter block tags used
//! by the remote protocol (versions 10 to 12, generic architecture).

// =============================================================================
// Operations
// =============================================================================

/// Wire operation codes (first XDR word of every message)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Operation {
    /// Padding / no-op
    Void = 0,
    /// Initial connection request
    Connect = 1,
    /// Server exit
    Exit = 2,
    /// Server accepts the connection
    Accept = 3,
    /// Server rejects the connection
    Reject = 4,
    /// Close the connection
    Disconnect = 6,
    /// Generic response carrying a status vector
    Response = 9,
    /// Attach to an existing database
    Attach = 19,
    /// Create a new database
    Create = 20,
    /// Detach from the database
    Detach = 21,
    /// Start a transaction
    Transaction = 29,
    /// Commit a transaction
    Commit = 30,
    /// Rollback a transaction
    Rollback = 31,
    /// Open an existing blob
    OpenBlob = 35,
    /// Read one blob segment
    GetSegment = 36,
    /// Write one blob segment
    PutSegment = 37,
    /// Abandon a blob being written
    CancelBlob = 38,
    /// Close a blob
    CloseBlob = 39,
    /// Write several blob segments
    BatchSegments = 44,
    /// Commit retaining
    CommitRetaining = 50,
    /// Allocate a statement handle
    AllocateStatement = 62,
    /// Execute a statement
    Execute = 63,
    /// Fetch rows from a cursor
    Fetch = 65,
    /// Row batch response
    FetchResponse = 66,
    /// Close or drop a statement
    FreeStatement = 67,
    /// Prepare a statement
    PrepareStatement = 68,
    /// Request statement information
    InfoSql = 70,
    /// Keep-alive sent by the server
    Dummy = 71,
    /// Execute a statement returning a single output message
    Execute2 = 76,
    /// Singleton output message response
    SqlResponse = 78,
    /// Create a blob with a parameter block
    CreateBlob2 = 57,
    /// Rollback retaining
    RollbackRetaining = 86,
}

impl TryFrom<u32> for Operation {
    type Error = crate::error::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Void),
            1 => Ok(Operation::Connect),
            2 => Ok(Operation::Exit),
            3 => Ok(Operation::Accept),
            4 => Ok(Operation::Reject),
            6 => Ok(Operation::Disconnect),
            9 => Ok(Operation::Response),
            19 => Ok(Operation::Attach),
            20 => Ok(Operation::Create),
            21 => Ok(Operation::Detach),
            29 => Ok(Operation::Transaction),
            30 => Ok(Operation::Commit),
            31 => Ok(Operation::Rollback),
            35 => Ok(Operation::OpenBlob),
            36 => Ok(Operation::GetSegment),
            37 => Ok(Operation::PutSegment),
            38 => Ok(Operation::CancelBlob),
            39 => Ok(Operation::CloseBlob),
            44 => Ok(Operation::BatchSegments),
            50 => Ok(Operation::CommitRetaining),
            57 => Ok(Operation::CreateBlob2),
            62 => Ok(Operation::AllocateStatement),
            63 => Ok(Operation::Execute),
            65 => Ok(Operation::Fetch),
            66 => Ok(Operation::FetchResponse),
            67 => Ok(Operation::FreeStatement),
            68 => Ok(Operation::PrepareStatement),
            70 => Ok(Operation::InfoSql),
            71 => Ok(Operation::Dummy),
            76 => Ok(Operation::Execute2),
            78 => Ok(Operation::SqlResponse),
            86 => Ok(Operation::RollbackRetaining),
            _ => Err(crate::error::Error::UnknownOperation(value)),
        }
    }
}

// =============================================================================
// Connection negotiation
// =============================================================================

/// Values exchanged during `op_connect` / `op_accept`
#[allow(missing_docs)]
pub mod protocol {
    pub const CONNECT_VERSION2: u32 = 2;
    pub const ARCHITECTURE_GENERIC: u32 = 1;

    /// Flag set on protocol versions >= 11
    pub const FLAG: u32 = 0x8000;
    pub const VERSION10: u32 = 10;
    pub const VERSION11: u32 = FLAG | 11;
    pub const VERSION12: u32 = FLAG | 12;

    pub const PTYPE_RPC: u32 = 2;
    pub const PTYPE_BATCH_SEND: u32 = 3;

    /// Offered protocols: (version, architecture, min type, max type, weight)
    pub const OFFERED: [(u32, u32, u32, u32, u32); 3] = [
        (VERSION10, ARCHITECTURE_GENERIC, PTYPE_RPC, PTYPE_BATCH_SEND, 2),
        (VERSION11, ARCHITECTURE_GENERIC, PTYPE_RPC, PTYPE_BATCH_SEND, 4),
        (VERSION12, ARCHITECTURE_GENERIC, PTYPE_RPC, PTYPE_BATCH_SEND, 6),
    ];

    /// User identification tags sent with `op_connect`
    pub const CNCT_USER: u8 = 1;
    pub const CNCT_HOST: u8 = 4;
    pub const CNCT_USER_VERIFICATION: u8 = 6;

    /// Default SQL dialect
    pub const DIALECT_3: u32 = 3;
}

// =============================================================================
// SQL types
// =============================================================================

/// SQL type codes as reported in column descriptors (low bit is the nullable flag)
#[allow(missing_docs)]
pub mod sql_type {
    pub const VARYING: u16 = 448;
    pub const TEXT: u16 = 452;
    pub const DOUBLE: u16 = 480;
    pub const FLOAT: u16 = 482;
    pub const LONG: u16 = 496;
    pub const SHORT: u16 = 500;
    pub const TIMESTAMP: u16 = 510;
    pub const BLOB: u16 = 520;
    pub const D_FLOAT: u16 = 530;
    pub const ARRAY: u16 = 540;
    pub const QUAD: u16 = 550;
    pub const TYPE_TIME: u16 = 560;
    pub const TYPE_DATE: u16 = 570;
    pub const INT64: u16 = 580;
    pub const BOOLEAN: u16 = 32764;
    pub const NULL: u16 = 32766;
}

/// Character set ids (low byte of a text column's subtype)
#[allow(missing_docs)]
pub mod charset {
    pub const NONE: u16 = 0;
    pub const OCTETS: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const UNICODE_FSS: u16 = 3;
    pub const UTF8: u16 = 4;
    pub const ISO8859_1: u16 = 21;
    pub const WIN1252: u16 = 53;

    /// Map a connection charset name to its id
    pub fn id_for_name(name: &str) -> Option<u16> {
        match name.to_ascii_uppercase().as_str() {
            "NONE" => Some(NONE),
            "OCTETS" | "BINARY" => Some(OCTETS),
            "ASCII" => Some(ASCII),
            "UNICODE_FSS" => Some(UNICODE_FSS),
            "UTF8" | "UTF-8" => Some(UTF8),
            "ISO8859_1" | "LATIN1" => Some(ISO8859_1),
            "WIN1252" => Some(WIN1252),
            _ => None,
        }
    }
}

// =============================================================================
// Statement information
// =============================================================================

/// Statement type codes returned by `isc_info_sql_stmt_type`
#[allow(missing_docs)]
pub mod stmt_type {
    pub const SELECT: u32 = 1;
    pub const INSERT: u32 = 2;
    pub const UPDATE: u32 = 3;
    pub const DELETE: u32 = 4;
    pub const DDL: u32 = 5;
    pub const GET_SEGMENT: u32 = 6;
    pub const PUT_SEGMENT: u32 = 7;
    pub const EXEC_PROCEDURE: u32 = 8;
    pub const START_TRANS: u32 = 9;
    pub const COMMIT: u32 = 10;
    pub const ROLLBACK: u32 = 11;
    pub const SELECT_FOR_UPDATE: u32 = 12;
    pub const SET_GENERATOR: u32 = 13;
    pub const SAVEPOINT: u32 = 14;
}

/// Info item tags used in prepare / info responses
#[allow(missing_docs)]
pub mod info {
    pub const END: u8 = 1;
    pub const TRUNCATED: u8 = 2;

    pub const SQL_SELECT: u8 = 4;
    pub const SQL_BIND: u8 = 5;
    pub const SQL_NUM_VARIABLES: u8 = 6;
    pub const SQL_DESCRIBE_VARS: u8 = 7;
    pub const SQL_DESCRIBE_END: u8 = 8;
    pub const SQL_SQLDA_SEQ: u8 = 9;
    pub const SQL_MESSAGE_SEQ: u8 = 10;
    pub const SQL_TYPE: u8 = 11;
    pub const SQL_SUB_TYPE: u8 = 12;
    pub const SQL_SCALE: u8 = 13;
    pub const SQL_LENGTH: u8 = 14;
    pub const SQL_NULL_IND: u8 = 15;
    pub const SQL_FIELD: u8 = 16;
    pub const SQL_RELATION: u8 = 17;
    pub const SQL_OWNER: u8 = 18;
    pub const SQL_ALIAS: u8 = 19;
    pub const SQL_SQLDA_START: u8 = 20;
    pub const SQL_STMT_TYPE: u8 = 21;
    pub const SQL_GET_PLAN: u8 = 22;
    pub const SQL_RECORDS: u8 = 23;

    pub const REQ_SELECT_COUNT: u8 = 13;
    pub const REQ_INSERT_COUNT: u8 = 14;
    pub const REQ_UPDATE_COUNT: u8 = 15;
    pub const REQ_DELETE_COUNT: u8 = 16;

    /// Describe items requested for one descriptor list
    pub const DESCRIBE_VARS: [u8; 12] = [
        SQL_DESCRIBE_VARS,
        SQL_SQLDA_SEQ,
        SQL_TYPE,
        SQL_SUB_TYPE,
        SQL_SCALE,
        SQL_LENGTH,
        SQL_NULL_IND,
        SQL_FIELD,
        SQL_RELATION,
        SQL_OWNER,
        SQL_ALIAS,
        SQL_DESCRIBE_END,
    ];

    /// Size of the info buffer requested from the server
    pub const BUFFER_LENGTH: u32 = 32768;
}

/// Free statement options
#[allow(missing_docs)]
pub mod dsql {
    pub const CLOSE: u32 = 1;
    pub const DROP: u32 = 2;
}

/// `op_fetch_response` status meaning the cursor is exhausted
pub const FETCH_NO_MORE_ROWS: u32 = 100;

// =============================================================================
// Blobs
// =============================================================================

/// `op_get_segment` response states (carried in the handle field)
#[allow(missing_docs)]
pub mod segment {
    pub const OK: u32 = 0;
    pub const PARTIAL: u32 = 1;
    pub const EOF: u32 = 2;
}

/// Largest single segment length (16-bit length prefix)
pub const MAX_SEGMENT_SIZE: usize = 65535;

/// Largest `op_batch_segments` buffer the server accepts
pub const MAX_BATCH_BUFFER: usize = 65535;

/// Blob parameter block version
pub const BPB_VERSION1: u8 = 1;

// =============================================================================
// Parameter blocks
// =============================================================================

/// Database parameter block tags
#[allow(missing_docs)]
pub mod dpb {
    pub const VERSION1: u8 = 1;
    pub const PAGE_SIZE: u8 = 4;
    pub const USER_NAME: u8 = 28;
    pub const PASSWORD: u8 = 29;
    pub const LC_CTYPE: u8 = 48;
    pub const SQL_ROLE_NAME: u8 = 60;
    pub const SQL_DIALECT: u8 = 63;
    pub const SET_DB_CHARSET: u8 = 68;
}

/// Transaction parameter block codes
#[allow(missing_docs)]
pub mod tpb {
    pub const VERSION3: u8 = 3;
    pub const CONSISTENCY: u8 = 1;
    pub const CONCURRENCY: u8 = 2;
    pub const WAIT: u8 = 6;
    pub const NOWAIT: u8 = 7;
    pub const READ: u8 = 8;
    pub const WRITE: u8 = 9;
    pub const READ_COMMITTED: u8 = 15;
    pub const REC_VERSION: u8 = 17;
    pub const NO_REC_VERSION: u8 = 18;
}

// =============================================================================
// BLR (message descriptions)
// =============================================================================

/// BLR codes used to describe parameter and row messages
#[allow(missing_docs)]
pub mod blr {
    pub const VERSION5: u8 = 5;
    pub const BEGIN: u8 = 2;
    pub const MESSAGE: u8 = 4;
    pub const END: u8 = 255;
    pub const EOC: u8 = 76;

    pub const SHORT: u8 = 7;
    pub const LONG: u8 = 8;
    pub const QUAD: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const D_FLOAT: u8 = 11;
    pub const SQL_DATE: u8 = 12;
    pub const SQL_TIME: u8 = 13;
    pub const TEXT2: u8 = 15;
    pub const INT64: u8 = 16;
    pub const BOOL: u8 = 23;
    pub const DOUBLE: u8 = 27;
    pub const TIMESTAMP: u8 = 35;
    pub const VARYING2: u8 = 38;
}

// =============================================================================
// Status vectors
// =============================================================================

/// Status vector argument tags
#[allow(missing_docs)]
pub mod isc_arg {
    pub const END: u32 = 0;
    pub const GDS: u32 = 1;
    pub const STRING: u32 = 2;
    pub const CSTRING: u32 = 3;
    pub const NUMBER: u32 = 4;
    pub const INTERPRETED: u32 = 5;
    pub const SQL_STATE: u32 = 19;
}

/// Well-known server error codes
#[allow(missing_docs)]
pub mod gds {
    pub const ARITH_EXCEPT: u32 = 335544321;
    pub const BAD_SEGSTR_HANDLE: u32 = 335544328;
    pub const BAD_TRANS_HANDLE: u32 = 335544332;
    pub const CONVERT_ERROR: u32 = 335544334;
    pub const DEADLOCK: u32 = 335544336;
    pub const IO_ERROR: u32 = 335544344;
    pub const LOCK_CONFLICT: u32 = 335544345;
    pub const NOT_VALID: u32 = 335544347;
    pub const SEGSTR_EOF: u32 = 335544367;
    pub const RANDOM: u32 = 335544382;
    pub const SQLERR: u32 = 335544436;
    pub const UPDATE_CONFLICT: u32 = 335544451;
    pub const FOREIGN_KEY: u32 = 335544466;
    pub const LOGIN: u32 = 335544472;
    pub const BAD_STMT_HANDLE: u32 = 335544485;
    pub const DSQL_ERROR: u32 = 335544569;
    pub const DSQL_FIELD_ERR: u32 = 335544578;
    pub const DSQL_RELATION_ERR: u32 = 335544580;
    pub const DSQL_TOKEN_UNK_ERR: u32 = 335544634;
    pub const UNIQUE_KEY_VIOLATION: u32 = 335544665;

    /// Message template for a known code (`@n` marks argument n)
    pub fn message_template(code: u32) -> Option<&'static str> {
        Some(match code {
            ARITH_EXCEPT => "arithmetic exception, numeric overflow, or string truncation",
            BAD_SEGSTR_HANDLE => "invalid BLOB handle",
            BAD_TRANS_HANDLE => "invalid transaction handle (expecting explicit transaction start)",
            CONVERT_ERROR => "conversion error from string \"@1\"",
            DEADLOCK => "deadlock",
            IO_ERROR => "I/O error during \"@1\" operation for file \"@2\"",
            LOCK_CONFLICT => "lock conflict on no wait transaction",
            NOT_VALID => "validation error for column @1, value \"@2\"",
            SEGSTR_EOF => "attempted retrieval of more segments than exist",
            RANDOM => "@1",
            SQLERR => "SQL error code = @1",
            UPDATE_CONFLICT => "update conflicts with concurrent update",
            FOREIGN_KEY => "violation of FOREIGN KEY constraint \"@1\" on table \"@2\"",
            LOGIN => "Your user name and password are not defined. Ask your database administrator to set up a Firebird login.",
            BAD_STMT_HANDLE => "invalid statement handle",
            DSQL_ERROR => "Dynamic SQL Error",
            DSQL_FIELD_ERR => "Column unknown",
            DSQL_RELATION_ERR => "Table unknown",
            DSQL_TOKEN_UNK_ERR => "Token unknown - line @1, column @2",
            UNIQUE_KEY_VIOLATION => "violation of PRIMARY or UNIQUE KEY constraint \"@1\" on table \"@2\"",
            _ => return None,
        })
    }
}
