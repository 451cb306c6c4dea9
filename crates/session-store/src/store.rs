//! Session store: lazy start, engine dispatch, the in-memory snapshot and
//! the single flush at the end of the owning scope.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use session_store_core::{
    BackendError, CacheClient, Clock, ConfigError, ConfigSource, CookieJar, EngineType,
    IdentifierIssuer, NativeSession, RelationalConnector, SessionData, SessionSettings,
    SystemClock,
};
use tracing::{debug, error, warn};

use crate::{
    backend::{FlushOutcome, SessionBackend},
    storage::{CacheBackend, FileBackend, RelationalBackend},
};

/// Session store error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Session backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
    #[error("No {0} backend registered with the session store")]
    MissingBackend(EngineType),
    #[error("Invalid session identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Session value error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-request session store.
///
/// Every operation starts the session on first use: settings are loaded,
/// the identifier is resolved from the cookie, the configured engine loads
/// the data and one flush is armed. Reads and writes then touch only the
/// in-memory snapshot until the flush runs.
///
/// The flush runs exactly once, through [`SessionStore::close`],
/// [`SessionStore::scope`] or, as a safety net, when the store is dropped
/// with the flush still armed.
pub struct SessionStore {
    config: Arc<dyn ConfigSource>,
    cookies: Arc<dyn CookieJar>,
    native: Option<Arc<dyn NativeSession>>,
    relational: Option<Arc<dyn RelationalConnector>>,
    cache: Option<Arc<dyn CacheClient>>,
    clock: Arc<dyn Clock>,
    issuer: IdentifierIssuer,

    settings: Option<SessionSettings>,
    identifier: Option<String>,
    data: SessionData,
    started: bool,
    backend: Option<Arc<dyn SessionBackend>>,
    flush_armed: bool,
}

impl SessionStore {
    /// Create a store reading settings from `config` and the identifier
    /// cookie from `cookies`.
    #[must_use]
    pub fn new(config: Arc<dyn ConfigSource>, cookies: Arc<dyn CookieJar>) -> Self {
        Self {
            config,
            cookies,
            native: None,
            relational: None,
            cache: None,
            clock: Arc::new(SystemClock),
            issuer: IdentifierIssuer::new(),
            settings: None,
            identifier: None,
            data: SessionData::new(),
            started: false,
            backend: None,
            flush_armed: false,
        }
    }

    /// Native session mechanism used by the `file` engine.
    #[must_use]
    pub fn with_native(mut self, native: Arc<dyn NativeSession>) -> Self {
        self.native = Some(native);
        self
    }

    /// Connector used by the `database` engine.
    #[must_use]
    pub fn with_relational(mut self, connector: Arc<dyn RelationalConnector>) -> Self {
        self.relational = Some(connector);
        self
    }

    /// Client used by the `memcached` engine.
    #[must_use]
    pub fn with_cache(mut self, client: Arc<dyn CacheClient>) -> Self {
        self.cache = Some(client);
        self
    }

    /// Time source for row timestamps and pruning.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether the session has been started.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Engine of the started session.
    #[must_use]
    pub fn engine(&self) -> Option<EngineType> {
        self.settings.as_ref().map(|s| s.engine)
    }

    /// Settings of the started session.
    #[must_use]
    pub const fn settings(&self) -> Option<&SessionSettings> {
        self.settings.as_ref()
    }

    /// Cookie name of the started session.
    #[must_use]
    pub fn cookie_name(&self) -> Option<&str> {
        self.settings.as_ref().map(|s| s.name.as_str())
    }

    /// Start the session. Returns `true` once started; later calls are
    /// no-ops.
    ///
    /// `name` overrides the configured cookie name.
    ///
    /// # Errors
    /// Returns error if the settings are invalid, the configured engine has
    /// no collaborator, or the engine cannot load the session.
    pub async fn start(&mut self, name: Option<&str>) -> Result<bool, SessionError> {
        if self.started {
            return Ok(true);
        }

        let mut settings = SessionSettings::load(self.config.as_ref())?;
        if let Some(name) = name {
            settings.name = name.to_string();
        }

        let requested = self.resolve_identifier(&settings.name);
        let backend = self.build_backend(&settings).await?;
        let started = backend.start(requested).await?;

        debug!(
            session_id = %started.identifier,
            engine = %settings.engine,
            keys = started.data.len(),
            "Session started"
        );

        self.identifier = Some(started.identifier);
        self.data = started.data;
        self.settings = Some(settings);
        self.backend = Some(backend);
        self.started = true;
        self.flush_armed = true;
        Ok(true)
    }

    async fn ensure_started(&mut self) -> Result<(), SessionError> {
        self.start(None).await.map(|_| ())
    }

    /// Identifier the engine should adopt: a forced one, else a valid
    /// cookie value. A forged or corrupt cookie is replaced by a fresh
    /// identifier; a missing one is cleared and left to the engine.
    fn resolve_identifier(&self, cookie_name: &str) -> Option<String> {
        if let Some(forced) = &self.identifier {
            return Some(forced.clone());
        }

        match self.cookies.get(cookie_name).filter(|v| !v.is_empty()) {
            Some(presented) if self.issuer.validate(&presented) => Some(presented),
            Some(presented) => {
                let replacement = self.issuer.generate();
                warn!(
                    cookie = %cookie_name,
                    presented_len = presented.len(),
                    session_id = %replacement,
                    "Rejected malformed session identifier"
                );
                Some(replacement)
            }
            None => {
                self.cookies.delete(cookie_name);
                None
            }
        }
    }

    async fn build_backend(
        &self,
        settings: &SessionSettings,
    ) -> Result<Arc<dyn SessionBackend>, SessionError> {
        let backend: Arc<dyn SessionBackend> = match settings.engine {
            EngineType::File => {
                let native = self
                    .native
                    .clone()
                    .ok_or(SessionError::MissingBackend(EngineType::File))?;
                Arc::new(FileBackend::new(native, settings.clone()))
            }
            EngineType::Relational => {
                let connector = self
                    .relational
                    .as_ref()
                    .ok_or(SessionError::MissingBackend(EngineType::Relational))?;
                Arc::new(
                    RelationalBackend::connect(
                        connector.as_ref(),
                        settings.clone(),
                        Arc::clone(&self.cookies),
                        Arc::clone(&self.clock),
                    )
                    .await?,
                )
            }
            EngineType::Cache => {
                let client = self
                    .cache
                    .clone()
                    .ok_or(SessionError::MissingBackend(EngineType::Cache))?;
                Arc::new(
                    CacheBackend::connect(client, settings.clone(), Arc::clone(&self.cookies))
                        .await?,
                )
            }
        };
        Ok(backend)
    }

    /// Whether `key` holds a value.
    ///
    /// # Errors
    /// Returns error if the session cannot be started.
    pub async fn is_set(&mut self, key: &str) -> Result<bool, SessionError> {
        self.ensure_started().await?;
        Ok(self.data.contains_key(key))
    }

    /// Store a value.
    ///
    /// # Errors
    /// Returns error if the session cannot be started or the value does not
    /// serialize.
    pub async fn set(&mut self, key: &str, value: impl Serialize) -> Result<(), SessionError> {
        self.ensure_started().await?;
        let value = serde_json::to_value(value)?;
        if let Some(backend) = &self.backend {
            backend.on_set(key, &value);
        }
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    /// Value stored under `key`.
    ///
    /// # Errors
    /// Returns error if the session cannot be started.
    pub async fn get(&mut self, key: &str) -> Result<Option<Value>, SessionError> {
        self.ensure_started().await?;
        Ok(self.data.get(key).cloned())
    }

    /// Value stored under `key`, deserialized.
    ///
    /// # Errors
    /// Returns error if the session cannot be started or the stored value
    /// does not deserialize into `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &mut self,
        key: &str,
    ) -> Result<Option<T>, SessionError> {
        self.ensure_started().await?;
        self.data
            .get(key)
            .map(|value| T::deserialize(value))
            .transpose()
            .map_err(SessionError::from)
    }

    /// All session data, or `None` when the session holds nothing.
    ///
    /// # Errors
    /// Returns error if the session cannot be started.
    pub async fn get_all(&mut self) -> Result<Option<&SessionData>, SessionError> {
        self.ensure_started().await?;
        Ok((!self.data.is_empty()).then_some(&self.data))
    }

    /// Session identifier.
    ///
    /// # Errors
    /// Returns error if the session cannot be started.
    pub async fn get_id(&mut self) -> Result<&str, SessionError> {
        self.ensure_started().await?;
        Ok(self.identifier.as_deref().unwrap_or_default())
    }

    /// Remove `key`. Removing an absent key is a no-op.
    ///
    /// # Errors
    /// Returns error if the session cannot be started.
    pub async fn unregister(&mut self, key: &str) -> Result<(), SessionError> {
        self.ensure_started().await?;
        self.data.remove(key);
        if let Some(backend) = &self.backend {
            backend.on_unregister(key);
        }
        Ok(())
    }

    /// Force the session identifier.
    ///
    /// Before start, the identifier replaces whatever the cookie carries.
    /// After start, the flush writes under the new identifier; the native
    /// session is re-keyed as well, except for the `database` engine.
    ///
    /// # Errors
    /// Returns error if `identifier` has characters outside
    /// `[A-Za-z0-9-]`.
    pub fn set_identifier(&mut self, identifier: &str) -> Result<(), SessionError> {
        if !self.issuer.validate(identifier) {
            return Err(SessionError::InvalidIdentifier(identifier.to_string()));
        }
        self.identifier = Some(identifier.to_string());
        if let Some(backend) = &self.backend {
            backend.set_identifier(identifier);
        } else if let Some(native) = &self.native {
            native.set_id(identifier);
        }
        Ok(())
    }

    /// Run the armed flush and release the store.
    pub async fn close(mut self) -> FlushOutcome {
        self.flush_now().await
    }

    /// Run `f` against the store, then flush whether `f` succeeded or not.
    ///
    /// # Errors
    /// Returns whatever `f` returns; flush failures are only logged.
    pub async fn scope<T, E, F>(mut self, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&mut Self) -> Result<T, E>,
    {
        let result = f(&mut self).await;
        self.flush_now().await;
        result
    }

    async fn flush_now(&mut self) -> FlushOutcome {
        let Some(backend) = self.disarm() else {
            return FlushOutcome::Skipped;
        };
        let identifier = self.identifier.clone().unwrap_or_default();
        run_flush(backend.as_ref(), &identifier, &self.data).await
    }

    fn disarm(&mut self) -> Option<Arc<dyn SessionBackend>> {
        if !std::mem::take(&mut self.flush_armed) {
            return None;
        }
        self.backend.clone()
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        let Some(backend) = self.disarm() else {
            return;
        };
        let identifier = self.identifier.take().unwrap_or_default();
        let data = std::mem::take(&mut self.data);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    session_id = %identifier,
                    "Session dropped before close; flushing in background"
                );
                handle.spawn(async move {
                    run_flush(backend.as_ref(), &identifier, &data).await;
                });
            }
            Err(_) => {
                error!(
                    session_id = %identifier,
                    "Session dropped outside a runtime; data not flushed"
                );
            }
        }
    }
}

async fn run_flush(
    backend: &dyn SessionBackend,
    identifier: &str,
    data: &SessionData,
) -> FlushOutcome {
    let outcome = match backend.flush(identifier, data).await {
        Ok(outcome) => outcome,
        Err(e) => FlushOutcome::Failed(e.to_string()),
    };

    match &outcome {
        FlushOutcome::Written => {
            debug!(session_id = %identifier, engine = %backend.engine(), "Session flushed");
        }
        FlushOutcome::LostUpdate => {
            warn!(
                session_id = %identifier,
                engine = %backend.engine(),
                "Session flush lost: row no longer exists"
            );
        }
        FlushOutcome::Failed(reason) => {
            error!(
                session_id = %identifier,
                engine = %backend.engine(),
                error = %reason,
                "Session flush failed"
            );
        }
        FlushOutcome::Skipped => {}
    }
    outcome
}
