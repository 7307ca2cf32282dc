//! Connection configuration and connection string parsing
//!
//! Supports the usual Firebird connection string forms:
//! - `host:/path/to/db.fdb`
//! - `host/port:/path/to/db.fdb`
//! - `host:alias`
//! - `/path/to/db.fdb` (local host)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{charset, protocol};
use crate::error::{Error, Result};
use crate::row::RowShape;

/// Default Firebird port
pub const DEFAULT_PORT: u16 = 3050;

/// Default number of rows requested per `op_fetch`
pub const DEFAULT_FETCH_SIZE: u32 = 200;

/// Default blob segment size for writes
pub const DEFAULT_BLOB_SEGMENT_SIZE: usize = 16384;

/// Default statement cache size
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 20;

/// Connection configuration for Firebird databases.
///
/// # Examples
///
/// ## Basic connection
///
/// ```rust
/// use firebird_rs::Config;
///
/// let config = Config::new("localhost", "/var/lib/firebird/data/app.fdb", "SYSDBA", "masterkey");
/// assert_eq!(config.port, 3050);
/// ```
///
/// ## With custom options
///
/// ```rust
/// use firebird_rs::{Config, RowShape};
/// use std::time::Duration;
///
/// let config = Config::new("db.example.com", "employee", "APP", "secret")
///     .port(3051)
///     .role("READER")
///     .connect_timeout(Duration::from_secs(5))
///     .fetch_size(500)
///     .row_shape(RowShape::Object);
/// ```
///
/// ## From a connection string
///
/// ```rust
/// use firebird_rs::Config;
///
/// let config: Config = "db.example.com/3051:/data/app.fdb".parse().unwrap();
/// assert_eq!(config.port, 3051);
/// assert_eq!(config.database, "/data/app.fdb");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to connect to
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Database path or alias on the server
    pub database: String,
    /// User name sent in the DPB
    pub user: String,
    /// Password sent in the DPB
    pub(crate) password: String,
    /// SQL role
    pub role: Option<String>,
    /// Page size, used only when creating a database
    pub page_size: Option<u32>,
    /// Connection character set name
    pub charset: String,
    /// SQL dialect
    pub dialect: u32,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-request response timeout; the connection is closed when it expires
    pub request_timeout: Option<Duration>,
    /// Rows requested per fetch
    pub fetch_size: u32,
    /// Segment size for blob writes
    pub blob_segment_size: usize,
    /// Shape of decoded rows
    pub row_shape: RowShape,
    /// Lowercase column aliases used as object keys
    pub lowercase_keys: bool,
    /// Statement cache size (0 = disabled)
    pub statement_cache_size: usize,
}

impl Config {
    /// Create a new configuration
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the SQL role
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the page size used by [`crate::create`]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set the connection character set (e.g. `UTF8`, `ISO8859_1`)
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the SQL dialect
    pub fn dialect(mut self, dialect: u32) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set request timeout
    ///
    /// When a response does not arrive in time the connection is closed and
    /// every queued request fails.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the number of rows requested per fetch
    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = rows.max(1);
        self
    }

    /// Set the segment size used when writing blobs
    ///
    /// Values above the protocol maximum of 65535 bytes are clamped.
    pub fn blob_segment_size(mut self, size: usize) -> Self {
        self.blob_segment_size = size.clamp(1, crate::constants::MAX_SEGMENT_SIZE);
        self
    }

    /// Set the row shape
    pub fn row_shape(mut self, shape: RowShape) -> Self {
        self.row_shape = shape;
        self
    }

    /// Lowercase object keys
    pub fn lowercase_keys(mut self, lowercase: bool) -> Self {
        self.lowercase_keys = lowercase;
        self
    }

    /// Set statement cache size
    ///
    /// Set to 0 to disable statement caching.
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Set the password
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// Set the user name
    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = user.into();
    }

    /// Character set id of the connection charset
    pub fn charset_id(&self) -> Result<u16> {
        charset::id_for_name(&self.charset).ok_or_else(|| {
            Error::InvalidConnectionString(format!("unknown character set {}", self.charset))
        })
    }

    /// Get the socket address string
    ///
    /// IPv6 literal hosts are bracketed.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: String::new(),
            user: "SYSDBA".to_string(),
            password: String::new(),
            role: None,
            page_size: None,
            charset: "UTF8".to_string(),
            dialect: protocol::DIALECT_3,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            blob_segment_size: DEFAULT_BLOB_SEGMENT_SIZE,
            row_shape: RowShape::Array,
            lowercase_keys: false,
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
        }
    }
}

/// Parse a Firebird connection string
///
/// Formats supported:
/// - `host:path`
/// - `host/port:path`
/// - `path` (absolute path or alias on localhost)
///
/// A single letter before the first colon is a Windows drive, not a host.
impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() {
            return Err(Error::InvalidConnectionString(
                "empty connection string".to_string(),
            ));
        }

        let mut config = Config::default();

        let (server, path) = match s.find(':') {
            Some(1) => (None, s),
            Some(pos) => (Some(&s[..pos]), &s[pos + 1..]),
            None => (None, s),
        };

        if let Some(server) = server {
            match server.split_once('/') {
                Some((host, port)) => {
                    config.host = host.to_string();
                    config.port = port.parse().map_err(|_| {
                        Error::InvalidConnectionString(format!("invalid port number {}", port))
                    })?;
                }
                None => config.host = server.to_string(),
            }
            if config.host.is_empty() {
                return Err(Error::InvalidConnectionString("missing host".to_string()));
            }
        }

        if path.is_empty() {
            return Err(Error::InvalidConnectionString(
                "missing database path".to_string(),
            ));
        }
        config.database = path.to_string();

        Ok(config)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_PORT {
            write!(f, "{}:{}", self.host, self.database)
        } else {
            write!(f, "{}/{}:{}", self.host, self.port, self.database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_path() {
        let config: Config = "myhost:/data/app.fdb".parse().unwrap();
        assert_eq!(config.host, "myhost");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database, "/data/app.fdb");
    }

    #[test]
    fn test_parse_host_port_and_path() {
        let config: Config = "myhost/3051:employee".parse().unwrap();
        assert_eq!(config.host, "myhost");
        assert_eq!(config.port, 3051);
        assert_eq!(config.database, "employee");
    }

    #[test]
    fn test_parse_bare_path() {
        let config: Config = "/data/app.fdb".parse().unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.database, "/data/app.fdb");
    }

    #[test]
    fn test_parse_windows_drive() {
        let config: Config = "C:\\data\\app.fdb".parse().unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.database, "C:\\data\\app.fdb");

        let config: Config = "server:C:\\data\\app.fdb".parse().unwrap();
        assert_eq!(config.host, "server");
        assert_eq!(config.database, "C:\\data\\app.fdb");
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Config>().is_err());
        assert!("myhost:".parse::<Config>().is_err());
        assert!("myhost/port:/db".parse::<Config>().is_err());
        assert!("/3050:/db".parse::<Config>().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::new("db.example.com", "app", "u", "p");
        assert_eq!(config.socket_addr(), "db.example.com:3050");

        let mut config = config.port(3051);
        config.host = "::1".to_string();
        assert_eq!(config.socket_addr(), "[::1]:3051");
        assert!(config.socket_addr().parse::<std::net::SocketAddr>().is_ok());

        config.host = "[fe80::1]".to_string();
        assert_eq!(config.socket_addr(), "[fe80::1]:3051");
    }

    #[test]
    fn test_config_display() {
        let config = Config::new("myhost", "/db.fdb", "u", "p");
        assert_eq!(config.to_string(), "myhost:/db.fdb");
        assert_eq!(config.port(3051).to_string(), "myhost/3051:/db.fdb");
    }

    #[test]
    fn test_config_builder_pattern() {
        let config = Config::new("host", "db", "user", "pass")
            .connect_timeout(Duration::from_secs(30))
            .request_timeout(Duration::from_secs(5))
            .blob_segment_size(1 << 20)
            .fetch_size(0)
            .row_shape(RowShape::Object)
            .lowercase_keys(true);

        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.blob_segment_size, 65535);
        assert_eq!(config.fetch_size, 1);
        assert_eq!(config.row_shape, RowShape::Object);
        assert!(config.lowercase_keys);
        assert_eq!(config.charset_id().unwrap(), charset::UTF8);
        assert!(config.charset("KLINGON").charset_id().is_err());
    }
}
