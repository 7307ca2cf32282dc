//! Error types for the Firebird driver
//!
//! Errors fall into four families, see [`ErrorKind`]. Transport and protocol
//! errors are fatal to the connection that produced them; server and usage
//! errors only fail the operation that raised them.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::constants::gds;
use crate::handles::HandleKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket level failure; the connection is gone
    Transport,
    /// Malformed or unexpected wire data; the connection is closed
    Protocol,
    /// The server answered with a non-empty status vector
    Server,
    /// The caller misused the API; detected locally where possible
    Usage,
}

/// One diagnostic carried in a server status vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Server (gds) error code
    pub code: u32,
    /// Message arguments in order
    pub args: Vec<String>,
}

impl StatusEntry {
    /// Render the entry with its arguments substituted into the known message
    pub fn message(&self) -> String {
        match gds::message_template(self.code) {
            Some(template) => {
                let mut message = template.to_string();
                for (i, arg) in self.args.iter().enumerate().rev() {
                    message = message.replace(&format!("@{}", i + 1), arg);
                }
                message
            }
            None if self.args.is_empty() => format!("gds code {}", self.code),
            None => format!("gds code {}: {}", self.code, self.args.join(", ")),
        }
    }
}

/// Decoded server status vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusVector {
    /// Diagnostics in server order; the first is the primary error
    pub entries: Vec<StatusEntry>,
    /// SQLSTATE, when the server supplied one
    pub sql_state: Option<String>,
    /// Free-form interpreted messages
    pub interpreted: Vec<String>,
}

impl StatusVector {
    /// True when the vector carries no error
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.code == 0)
    }

    /// The primary server error code
    pub fn code(&self) -> Option<u32> {
        self.entries.iter().map(|e| e.code).find(|&c| c != 0)
    }

    /// Whether any entry carries the given code
    pub fn has_code(&self, code: u32) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    /// Convert into `Err(Error::Server)` when the vector is an error
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::Server(self))
        }
    }
}

impl fmt::Display for StatusVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.code != 0)
            .map(StatusEntry::message)
            .collect();
        lines.extend(self.interpreted.iter().cloned());
        write!(f, "{}", lines.join("\n"))?;
        if let Some(state) = &self.sql_state {
            write!(f, " [SQLSTATE {}]", state)?;
        }
        Ok(())
    }
}

/// Main error type for the Firebird driver
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection closed, either by the peer or after an earlier fatal error
    #[error("connection closed")]
    ConnectionClosed,

    /// TCP connect did not complete in time
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(Duration),

    /// A response did not arrive in time; the connection was torn down
    #[error("request timeout after {0:?}")]
    RequestTimeout(Duration),

    /// The server refused every offered protocol version
    #[error("connection rejected by server")]
    ConnectionRejected,

    /// Invalid connection string
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Not enough data to decode a complete message
    #[error("buffer underflow: need {needed} bytes but only {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    /// Encoded value too large for its field
    #[error("buffer overflow: need {needed} bytes but only {available} available")]
    BufferOverflow { needed: usize, available: usize },

    /// Operation code the driver does not know
    #[error("unknown operation code: {0}")]
    UnknownOperation(u32),

    /// Known operation received where a different one was expected
    #[error("unexpected operation: expected {expected}, got {actual:?}")]
    UnexpectedOperation {
        expected: &'static str,
        actual: crate::constants::Operation,
    },

    /// Server accepted a protocol version we never offered
    #[error("unsupported protocol version {0:#x}")]
    UnsupportedProtocol(u32),

    /// General protocol error
    #[error("protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Non-empty status vector returned by the server
    #[error("{0}")]
    Server(StatusVector),

    // =========================================================================
    // Usage Errors
    // =========================================================================
    /// Handle is not (or no longer) live on this connection
    #[error("invalid {kind} handle {handle}")]
    InvalidHandle { kind: HandleKind, handle: u32 },

    /// Statement was dropped
    #[error("statement has been dropped")]
    StatementDropped,

    /// Fetch without an open cursor
    #[error("cursor is not open")]
    CursorClosed,

    /// Wrong number of parameters for a prepared statement
    #[error("statement expects {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    /// Value cannot be converted to or from the column type
    #[error("data conversion error: {0}")]
    DataConversion(String),

    /// NULL value encountered where not expected
    #[error("unexpected NULL value")]
    UnexpectedNull,

    /// The pool has been destroyed
    #[error("pool is closed")]
    PoolClosed,

    /// Feature not supported
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::ConnectionClosed
            | Error::ConnectionTimeout(_)
            | Error::RequestTimeout(_)
            | Error::ConnectionRejected
            | Error::InvalidConnectionString(_) => ErrorKind::Transport,
            Error::BufferUnderflow { .. }
            | Error::BufferOverflow { .. }
            | Error::UnknownOperation(_)
            | Error::UnexpectedOperation { .. }
            | Error::UnsupportedProtocol(_)
            | Error::Protocol(_) => ErrorKind::Protocol,
            Error::Server(_) => ErrorKind::Server,
            _ => ErrorKind::Usage,
        }
    }

    /// Whether the error leaves the connection unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol)
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// The primary server error code, for server errors
    pub fn code(&self) -> Option<u32> {
        match self {
            Error::Server(status) => status.code(),
            _ => None,
        }
    }

    /// The status vector, for server errors
    pub fn status(&self) -> Option<&StatusVector> {
        match self {
            Error::Server(status) => Some(status),
            _ => None,
        }
    }

    /// Build a server error from a single code and arguments
    pub fn server(code: u32, args: Vec<String>) -> Self {
        Error::Server(StatusVector {
            entries: vec![StatusEntry { code, args }],
            sql_state: None,
            interpreted: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let status = StatusVector {
            entries: vec![
                StatusEntry { code: gds::DSQL_ERROR, args: vec![] },
                StatusEntry { code: gds::SQLERR, args: vec!["-104".into()] },
                StatusEntry {
                    code: gds::DSQL_TOKEN_UNK_ERR,
                    args: vec!["1".into(), "8".into()],
                },
            ],
            sql_state: Some("42000".into()),
            interpreted: vec![],
        };
        let err = Error::Server(status);
        assert_eq!(
            err.to_string(),
            "Dynamic SQL Error\nSQL error code = -104\nToken unknown - line 1, column 8 [SQLSTATE 42000]"
        );
        assert_eq!(err.code(), Some(gds::DSQL_ERROR));
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unknown_code_message() {
        let entry = StatusEntry { code: 42, args: vec!["x".into()] };
        assert_eq!(entry.message(), "gds code 42: x");
    }

    #[test]
    fn test_status_success() {
        let ok = StatusVector {
            entries: vec![StatusEntry { code: 0, args: vec![] }],
            ..Default::default()
        };
        assert!(ok.is_success());
        assert!(ok.into_result().is_ok());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::Transport);
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(Error::Protocol("bad".into()).is_fatal());
        assert_eq!(Error::CursorClosed.kind(), ErrorKind::Usage);
        assert!(!Error::ParameterCount { expected: 1, actual: 2 }.is_fatal());
        assert!(Error::ConnectionTimeout(Duration::from_secs(1)).is_connection_error());
    }
}
