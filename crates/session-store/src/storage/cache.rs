//! Cache engine: the whole data map under one TTL-bound cache key.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use session_store_core::{
    BackendError, CacheClient, CookieJar, EngineType, IdentifierIssuer, SessionData,
    SessionSettings,
};
use tracing::debug;

use crate::backend::{FlushOutcome, SessionBackend, Started, bind_identifier, decode_data};

/// Prefix of every session cache key.
pub const KEY_PREFIX: &str = "session_";

/// Cache key holding the session `identifier`.
#[must_use]
pub fn cache_key(identifier: &str) -> String {
    format!("{KEY_PREFIX}{identifier}")
}

/// Engine backed by a distributed cache.
///
/// Expiration is left entirely to the cache: every flush rewrites the entry
/// with a TTL of `expires` minutes.
pub struct CacheBackend {
    client: Arc<dyn CacheClient>,
    cookies: Arc<dyn CookieJar>,
    issuer: IdentifierIssuer,
    settings: SessionSettings,
}

impl CacheBackend {
    /// Register the configured server with the client.
    ///
    /// # Errors
    /// Returns error if the client rejects the server.
    pub async fn connect(
        client: Arc<dyn CacheClient>,
        settings: SessionSettings,
        cookies: Arc<dyn CookieJar>,
    ) -> Result<Self, BackendError> {
        client
            .add_server(&settings.cache.address, settings.cache.port)
            .await?;
        Ok(Self {
            client,
            cookies,
            issuer: IdentifierIssuer::new(),
            settings,
        })
    }

    /// TTL written with every flush.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.settings.expires.saturating_mul(60))
    }
}

#[async_trait]
impl SessionBackend for CacheBackend {
    fn engine(&self) -> EngineType {
        EngineType::Cache
    }

    async fn start(&self, identifier: Option<String>) -> Result<Started, BackendError> {
        let identifier =
            bind_identifier(self.cookies.as_ref(), &self.issuer, &self.settings, identifier);

        let data = match self.client.get(&cache_key(&identifier)).await? {
            Some(payload) => decode_data(&identifier, &payload),
            None => {
                debug!(session_id = %identifier, "Session cache miss");
                SessionData::new()
            }
        };

        Ok(Started { identifier, data })
    }

    async fn flush(
        &self,
        identifier: &str,
        data: &SessionData,
    ) -> Result<FlushOutcome, BackendError> {
        let payload = serde_json::to_vec(data)?;
        self.client
            .set(&cache_key(identifier), &payload, self.ttl())
            .await?;
        Ok(FlushOutcome::Written)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use session_store_core::ManualClock;

    use super::*;
    use crate::storage::{MemoryCache, MemoryCookieJar};

    async fn backend(expires: u64) -> (CacheBackend, Arc<MemoryCache>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let settings = SessionSettings::new(EngineType::Cache).with_expires(expires);
        let backend =
            CacheBackend::connect(cache.clone(), settings, Arc::new(MemoryCookieJar::new()))
                .await
                .unwrap();
        (backend, cache, clock)
    }

    #[tokio::test]
    async fn test_connect_registers_server() {
        let (_, cache, _) = backend(10).await;
        assert_eq!(cache.servers(), vec![("127.0.0.1".to_string(), 11211)]);
    }

    #[tokio::test]
    async fn test_miss_and_falsy_values_start_empty() {
        let (backend, cache, _) = backend(10).await;
        assert!(backend.start(Some("a".to_string())).await.unwrap().data.is_empty());

        cache.set("session_b", b"", Duration::ZERO).await.unwrap();
        assert!(backend.start(Some("b".to_string())).await.unwrap().data.is_empty());
    }

    #[tokio::test]
    async fn test_flush_then_expire() {
        let (backend, cache, clock) = backend(10).await;
        let started = backend.start(None).await.unwrap();

        let mut data = started.data;
        data.insert("a".to_string(), json!(1));
        backend.flush(&started.identifier, &data).await.unwrap();

        let sets = cache.set_calls();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].ttl, Duration::from_secs(600));

        clock.advance(chrono::Duration::seconds(599));
        let reloaded = backend.start(Some(started.identifier.clone())).await.unwrap();
        assert_eq!(reloaded.data.get("a"), Some(&json!(1)));

        clock.advance(chrono::Duration::seconds(1));
        let expired = backend.start(Some(started.identifier)).await.unwrap();
        assert!(expired.data.is_empty());
    }
}
