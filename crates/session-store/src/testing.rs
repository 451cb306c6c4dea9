//! Test doubles shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use session_store_core::{
    BackendError, CacheClient, NativeSession, NativeStart, QueryResult, RelationalClient,
    RelationalConnector, Row, SessionData, SqlValue,
};

/// In-memory stand-in for the session table. Understands exactly the four
/// statements the relational engine issues, told apart by their verb.
#[derive(Default)]
pub struct FakeTable {
    rows: Mutex<HashMap<String, (Option<String>, String)>>,
    statements: Mutex<Vec<String>>,
    fail_queries: AtomicBool,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
}

fn text(params: &[SqlValue], index: usize) -> String {
    params
        .get(index)
        .and_then(SqlValue::as_text)
        .unwrap_or_default()
}

impl FakeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_row(&self, id: &str, value: Option<&str>, updated_at: DateTime<Utc>) {
        let updated_at = SqlValue::Timestamp(updated_at).as_text().unwrap();
        self.rows
            .lock()
            .unwrap()
            .insert(id.to_string(), (value.map(str::to_string), updated_at));
    }

    pub fn row(&self, id: &str) -> Option<(Option<String>, String)> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn remove_row(&self, id: &str) {
        self.rows.lock().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelationalClient for FakeTable {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, BackendError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(BackendError::Query("table unavailable".to_string()));
        }
        self.statements.lock().unwrap().push(sql.to_string());

        let mut rows = self.rows.lock().unwrap();
        let verb = sql.split_whitespace().next().unwrap_or_default();
        let result = match verb {
            "DELETE" => {
                let cutoff = text(params, 0);
                let before = rows.len();
                rows.retain(|_, (_, updated_at)| *updated_at > cutoff);
                QueryResult {
                    affected_rows: (before - rows.len()) as u64,
                    rows: Vec::new(),
                }
            }
            "SELECT" => {
                let found: Vec<Row> = rows
                    .get(&text(params, 0))
                    .map(|(value, _)| {
                        let column = value.clone().map_or(SqlValue::Null, SqlValue::Text);
                        Row(HashMap::from([("session_value".to_string(), column)]))
                    })
                    .into_iter()
                    .collect();
                QueryResult {
                    affected_rows: found.len() as u64,
                    rows: found,
                }
            }
            "INSERT" => {
                rows.insert(text(params, 0), (None, text(params, 1)));
                QueryResult {
                    affected_rows: 1,
                    rows: Vec::new(),
                }
            }
            "UPDATE" => {
                let affected = rows.get_mut(&text(params, 2)).map_or(0, |row| {
                    *row = (params[0].as_text(), text(params, 1));
                    1
                });
                QueryResult {
                    affected_rows: affected,
                    rows: Vec::new(),
                }
            }
            other => return Err(BackendError::Query(format!("unexpected statement: {other}"))),
        };
        Ok(result)
    }
}

/// Connector handing out a shared [`FakeTable`].
pub struct FakeConnector(pub Arc<FakeTable>);

#[async_trait]
impl RelationalConnector for FakeConnector {
    async fn connect(&self, _server: &str) -> Result<Arc<dyn RelationalClient>, BackendError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_connect.load(Ordering::SeqCst) {
            return Err(BackendError::Connection("connection refused".to_string()));
        }
        let client: Arc<dyn RelationalClient> = self.0.clone();
        Ok(client)
    }
}

/// Native session counting how often it is started.
pub struct CountingNative {
    inner: Arc<dyn NativeSession>,
    starts: AtomicUsize,
}

impl CountingNative {
    pub fn new(inner: Arc<dyn NativeSession>) -> Self {
        Self {
            inner,
            starts: AtomicUsize::new(0),
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NativeSession for CountingNative {
    fn set_id(&self, id: &str) {
        self.inner.set_id(id);
    }

    async fn start(&self, params: &NativeStart) -> Result<String, BackendError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.inner.start(params).await
    }

    fn partition(&self, partition: &str) -> Option<SessionData> {
        self.inner.partition(partition)
    }

    fn put(&self, partition: &str, key: &str, value: Value) {
        self.inner.put(partition, key, value);
    }

    fn remove(&self, partition: &str, key: &str) {
        self.inner.remove(partition, key);
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.inner.commit().await
    }
}

/// Cache client counting registrations and reads.
pub struct CountingCache {
    inner: Arc<dyn CacheClient>,
    add_servers: AtomicUsize,
    gets: AtomicUsize,
}

impl CountingCache {
    pub fn new(inner: Arc<dyn CacheClient>) -> Self {
        Self {
            inner,
            add_servers: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    pub fn add_servers(&self) -> usize {
        self.add_servers.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheClient for CountingCache {
    async fn add_server(&self, address: &str, port: u16) -> Result<(), BackendError> {
        self.add_servers.fetch_add(1, Ordering::SeqCst);
        self.inner.add_server(address, port).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        self.inner.set(key, value, ttl).await
    }
}
