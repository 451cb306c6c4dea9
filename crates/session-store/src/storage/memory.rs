//! In-memory collaborators.
//!
//! Useful for development, single-process deployments and tests.
//! Nothing survives the process.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use session_store_core::{BackendError, CacheClient, Clock, Cookie, CookieJar, SystemClock};

/// Cookie jar for one request: incoming cookies plus the cookies queued for
/// the response.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    incoming: RwLock<HashMap<String, String>>,
    sent: RwLock<Vec<Cookie>>,
    deleted: RwLock<Vec<String>>,
}

impl MemoryCookieJar {
    /// Create an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an incoming cookie.
    #[must_use]
    pub fn with_cookie(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.incoming
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
        self
    }

    /// Cookies queued for the response, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Cookie> {
        self.sent.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Last value queued for `name`.
    #[must_use]
    pub fn sent_value(&self, name: &str) -> Option<String> {
        self.sent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| c.value.clone())
    }

    /// Names of the cookies deleted during the request.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.incoming
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn set(&self, cookie: &Cookie) {
        self.incoming
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cookie.name.clone(), cookie.value.clone());
        self.sent
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cookie.clone());
    }

    fn delete(&self, name: &str) {
        self.incoming
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        self.deleted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// One recorded `set` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCall {
    pub key: String,
    pub ttl: Duration,
}

/// In-process cache with TTL expiry, driven by a [`Clock`].
///
/// A zero TTL never expires, as with memcached.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    servers: RwLock<Vec<(String, u16)>>,
    set_calls: RwLock<Vec<SetCall>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Create a cache on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache on a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            servers: RwLock::new(Vec::new()),
            set_calls: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Servers registered through [`CacheClient::add_server`].
    #[must_use]
    pub fn servers(&self) -> Vec<(String, u16)> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every `set` call received so far.
    #[must_use]
    pub fn set_calls(&self) -> Vec<SetCall> {
        self.set_calls.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.expires_at.is_none_or(|at| now < at))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn add_server(&self, address: &str, port: u16) -> Result<(), BackendError> {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        let server = (address.to_string(), port);
        if !servers.contains(&server) {
            servers.push(server);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|at| now >= at),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        // TTLs reaching past the representable calendar never expire.
        let expires_at = if ttl.is_zero() {
            None
        } else {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
        };

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                CacheEntry {
                    value: value.to_vec(),
                    expires_at,
                },
            );
        self.set_calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SetCall {
                key: key.to_string(),
                ttl,
            });
        Ok(())
    }
}
