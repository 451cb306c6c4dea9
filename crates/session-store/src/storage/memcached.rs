//! Memcached client over the `memcache` crate (feature-gated).

use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use session_store_core::{BackendError, CacheClient};
use tracing::{debug, trace};

/// Relative expirations above this many seconds are read by memcached as
/// absolute Unix timestamps.
const MAX_RELATIVE_EXPIRY: u64 = 60 * 60 * 24 * 30;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Memcached client over a pool of servers.
///
/// The underlying `memcache::Client` is blocking, so every command runs on
/// the blocking thread pool. It is built on first use and rebuilt after the
/// server list changes.
pub struct MemcachedClient {
    servers: RwLock<Vec<String>>,
    client: Mutex<Option<Arc<memcache::Client>>>,
    timeout: Duration,
}

impl MemcachedClient {
    /// Create a client with an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            client: Mutex::new(None),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the read and write timeout of every connection.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registered server URLs (`memcache://host:port`).
    #[must_use]
    pub fn servers(&self) -> Vec<String> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn client(&self) -> Result<Arc<memcache::Client>, BackendError> {
        if let Some(client) = self.client.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Ok(client);
        }

        let urls = self.servers();
        if urls.is_empty() {
            return Err(BackendError::Connection("no cache servers registered".to_string()));
        }
        let timeout = self.timeout;
        debug!(servers = ?urls, "Connecting to memcached");
        let client = Arc::new(blocking(move || connect(urls, timeout)).await?);

        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&client));
        Ok(client)
    }
}

impl Default for MemcachedClient {
    fn default() -> Self {
        Self::new()
    }
}

fn connect(urls: Vec<String>, timeout: Duration) -> Result<memcache::Client, BackendError> {
    let client =
        memcache::Client::connect(urls).map_err(|e| BackendError::Connection(e.to_string()))?;
    client
        .set_read_timeout(Some(timeout))
        .map_err(|e| BackendError::Connection(e.to_string()))?;
    client
        .set_write_timeout(Some(timeout))
        .map_err(|e| BackendError::Connection(e.to_string()))?;
    Ok(client)
}

async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Connection(format!("cache task failed: {e}")))?
}

/// Expiration field for a TTL: relative seconds, or an absolute timestamp
/// past the 30-day limit. Zero never expires; absurdly long TTLs clamp to
/// the largest timestamp memcached accepts.
fn expiration(ttl: Duration) -> u32 {
    let secs = ttl.as_secs();
    let secs = if secs <= MAX_RELATIVE_EXPIRY {
        secs
    } else {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now.saturating_add(secs)
    };
    u32::try_from(secs).unwrap_or(u32::MAX)
}

#[async_trait]
impl CacheClient for MemcachedClient {
    async fn add_server(&self, address: &str, port: u16) -> Result<(), BackendError> {
        let url = format!("memcache://{address}:{port}");
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        if !servers.contains(&url) {
            servers.push(url);
            self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let client = self.client().await?;
        let key = key.to_string();
        blocking(move || {
            let value = client
                .get::<Vec<u8>>(&key)
                .map_err(|e| BackendError::Protocol(e.to_string()))?;
            if value.is_none() {
                trace!(key = %key, "Cache miss");
            }
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        let client = self.client().await?;
        let key = key.to_string();
        let value = value.to_vec();
        let expiration = expiration(ttl);
        blocking(move || {
            client
                .set(&key, value.as_slice(), expiration)
                .map_err(|e| BackendError::Protocol(e.to_string()))
        })
        .await
    }
}
