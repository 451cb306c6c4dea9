//! Directory-backed native session mechanism.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use session_store_core::{
    BackendError, Cookie, CookieJar, IdentifierIssuer, NativeSession, NativeStart, SessionData,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct NativeState {
    id: Option<String>,
    vars: Map<String, Value>,
    started: bool,
}

/// Native session stored as one JSON file per identifier
/// (`sess_<identifier>.json`).
///
/// Variables live in memory between [`NativeSession::start`] and
/// [`NativeSession::commit`]; a commit atomically replaces the file. No
/// lock is taken across requests sharing an identifier: the last commit
/// wins.
pub struct FileNativeSession {
    dir: PathBuf,
    cookies: Arc<dyn CookieJar>,
    issuer: IdentifierIssuer,
    state: RwLock<NativeState>,
}

impl FileNativeSession {
    /// Create a native session storing files under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, cookies: Arc<dyn CookieJar>) -> Self {
        Self {
            dir: dir.into(),
            cookies,
            issuer: IdentifierIssuer::new(),
            state: RwLock::new(NativeState::default()),
        }
    }

    /// Default session directory: the platform's local data dir, or the
    /// temp dir when there is none.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .map_or_else(std::env::temp_dir, |d| d.join("session-store"))
            .join("sessions")
    }

    /// Directory holding the session files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current identifier, once forced or started.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.read().id.clone()
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("sess_{id}.json"))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, NativeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, NativeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self, id: &str) -> Result<Map<String, Value>, BackendError> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Map<String, Value>>(&bytes) {
            Ok(vars) => Ok(vars),
            Err(e) => {
                warn!(
                    session_id = %id,
                    path = %path.display(),
                    error = %e,
                    "Ignoring corrupt session file"
                );
                Ok(Map::new())
            }
        }
    }
}

#[async_trait]
impl NativeSession for FileNativeSession {
    fn set_id(&self, id: &str) {
        self.write().id = Some(id.to_string());
    }

    async fn start(&self, params: &NativeStart) -> Result<String, BackendError> {
        let id = {
            let state = self.read();
            if state.started {
                if let Some(id) = &state.id {
                    return Ok(id.clone());
                }
            }
            // The identifier names a file, so anything outside the charset is
            // replaced rather than trusted.
            state
                .id
                .clone()
                .or_else(|| params.identifier.clone())
                .filter(|id| self.issuer.validate(id))
                .unwrap_or_else(|| self.issuer.generate())
        };

        let vars = self.load(&id).await?;
        {
            let mut state = self.write();
            state.id = Some(id.clone());
            state.vars = vars;
            state.started = true;
        }

        self.cookies.set(&Cookie {
            name: params.name.clone(),
            value: id.clone(),
            ..params.cookie.clone()
        });
        debug!(session_id = %id, dir = %self.dir.display(), "Native session started");
        Ok(id)
    }

    fn partition(&self, partition: &str) -> Option<SessionData> {
        self.read()
            .vars
            .get(partition)
            .and_then(Value::as_object)
            .map(|map| map.clone().into_iter().collect())
    }

    fn put(&self, partition: &str, key: &str, value: Value) {
        let mut state = self.write();
        let slot = state
            .vars
            .entry(partition.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(map) = slot {
            map.insert(key.to_string(), value);
        }
    }

    fn remove(&self, partition: &str, key: &str) {
        if let Some(Value::Object(map)) = self.write().vars.get_mut(partition) {
            map.remove(key);
        }
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let (id, payload) = {
            let state = self.read();
            match (&state.id, state.started) {
                (Some(id), true) => (id.clone(), serde_json::to_vec(&state.vars)?),
                _ => return Ok(()),
            }
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".sess_{id}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &payload).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(&id)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(session_id = %id, bytes = payload.len(), "Native session committed");
        Ok(())
    }
}
