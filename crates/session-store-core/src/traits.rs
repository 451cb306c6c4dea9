//! Core traits for the storage collaborators a session engine talks to.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::cookie::Cookie;

/// The in-memory session payload: string keys to arbitrary JSON values.
pub type SessionData = HashMap<String, Value>;

/// Backend error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Query failed: {0}")]
    Query(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Positional parameter or column value exchanged with a relational client.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
    /// Bound as text in `YYYY-MM-DD HH:MM:SS` form (UTC).
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Timestamp format used for every stored `updated_at` value.
    pub const TIMESTAMP_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

    /// Render the value as the text a SQL driver should bind.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(i) => Some(i.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Timestamp(ts) => Some(ts.format(Self::TIMESTAMP_FORMAT).to_string()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// One fetched row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub HashMap<String, SqlValue>);

impl Row {
    /// Text content of a column; `None` for NULL or a missing column.
    #[must_use]
    pub fn text(&self, column: &str) -> Option<&str> {
        match self.0.get(column) {
            Some(SqlValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Result of a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Rows changed (DML) or returned (queries).
    pub affected_rows: u64,
    /// Fetched rows, in order. Empty for DML.
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// First row of the result, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// Trait for relational database clients.
#[async_trait]
pub trait RelationalClient: Send + Sync {
    /// Execute a statement with `?` positional parameters.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, BackendError>;
}

/// Resolves a configured server name into a connected client.
#[async_trait]
pub trait RelationalConnector: Send + Sync {
    /// Connect to the named server.
    async fn connect(&self, server: &str) -> Result<Arc<dyn RelationalClient>, BackendError>;
}

/// Trait for distributed cache clients.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Register a server in the client's pool.
    async fn add_server(&self, address: &str, port: u16) -> Result<(), BackendError>;

    /// Fetch a value. `None` on miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Store a value. A zero TTL means the entry never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError>;
}

/// Parameters for starting a native session.
#[derive(Debug, Clone)]
pub struct NativeStart {
    /// Cookie name carrying the identifier.
    pub name: String,
    /// Identifier presented by the client (already validated), if any.
    pub identifier: Option<String>,
    /// Cookie attributes the mechanism writes on start.
    pub cookie: Cookie,
}

/// The platform's native cookie-based session mechanism.
///
/// Holds top-level session variables; the store nests its own data map
/// under a private partition key.
#[async_trait]
pub trait NativeSession: Send + Sync {
    /// Force the identifier of the native session.
    fn set_id(&self, id: &str);

    /// Start the mechanism and return the adopted identifier.
    async fn start(&self, params: &NativeStart) -> Result<String, BackendError>;

    /// Read a partition as a data map.
    fn partition(&self, partition: &str) -> Option<SessionData>;

    /// Write one key inside a partition.
    fn put(&self, partition: &str, key: &str, value: Value);

    /// Remove one key from a partition. Absent keys are ignored.
    fn remove(&self, partition: &str, key: &str);

    /// Persist the native session.
    async fn commit(&self) -> Result<(), BackendError>;
}
