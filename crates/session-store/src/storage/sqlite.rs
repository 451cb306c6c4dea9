//! SQLite relational client (feature-gated).

use std::{collections::HashMap, str::FromStr, sync::Arc};

use async_trait::async_trait;
use session_store_core::{
    BackendError, QueryResult, RelationalClient, RelationalConnector, Row, SqlValue,
};
use sqlx::{
    Column, Row as _, TypeInfo, ValueRef,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
};
use tracing::debug;

/// SQLite client over an `sqlx` pool.
///
/// In-memory databases are private to a connection, so `:memory:` URLs get
/// a single-connection pool.
#[derive(Clone)]
pub struct SqliteClient {
    pool: SqlitePool,
}

impl SqliteClient {
    /// Connect to a SQLite database, creating the file if needed.
    ///
    /// # Errors
    /// Returns error if database connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, BackendError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| BackendError::Connection(e.to_string()))?
            .create_if_missing(true);
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the session table if it does not exist.
    ///
    /// # Errors
    /// Returns error if the table name is not a plain identifier or the
    /// statement fails.
    pub async fn ensure_table(&self, table: &str) -> Result<(), BackendError> {
        if table.is_empty() || !table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(BackendError::Query(format!("invalid table name: {table}")));
        }
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS `{table}` (
                `id` TEXT PRIMARY KEY NOT NULL,
                `session_value` TEXT NULL,
                `updated_at` TEXT NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS `{table}_updated_at` ON `{table}` (`updated_at`)"
        ))
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }
}

fn query_error(e: sqlx::Error) -> BackendError {
    BackendError::Query(e.to_string())
}

fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start();
    head.get(..6).is_some_and(|verb| verb.eq_ignore_ascii_case("SELECT"))
}

fn convert_row(row: &SqliteRow) -> Result<Row, BackendError> {
    let mut columns = HashMap::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index).map_err(query_error)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else if raw.type_info().name() == "INTEGER" {
            SqlValue::Integer(row.try_get(index).map_err(query_error)?)
        } else {
            SqlValue::Text(row.try_get(index).map_err(query_error)?)
        };
        columns.insert(column.name().to_string(), value);
    }
    Ok(Row(columns))
}

#[async_trait]
impl RelationalClient for SqliteClient {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, BackendError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Integer(i) => query.bind(*i),
                SqlValue::Text(_) | SqlValue::Timestamp(_) => query.bind(param.as_text()),
            };
        }

        if returns_rows(sql) {
            let rows = query.fetch_all(&self.pool).await.map_err(query_error)?;
            let rows = rows.iter().map(convert_row).collect::<Result<Vec<_>, _>>()?;
            Ok(QueryResult {
                affected_rows: rows.len() as u64,
                rows,
            })
        } else {
            let done = query.execute(&self.pool).await.map_err(query_error)?;
            Ok(QueryResult {
                affected_rows: done.rows_affected(),
                rows: Vec::new(),
            })
        }
    }
}

#[async_trait]
impl RelationalConnector for SqliteClient {
    async fn connect(&self, server: &str) -> Result<Arc<dyn RelationalClient>, BackendError> {
        debug!(server, "Using shared SQLite pool");
        let client: Arc<dyn RelationalClient> = Arc::new(self.clone());
        Ok(client)
    }
}
