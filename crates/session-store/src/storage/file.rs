//! File-style engine: layers the store on the native session mechanism.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use session_store_core::{
    BackendError, Cookie, EngineType, NativeSession, NativeStart, SessionData, SessionSettings,
};
use tracing::debug;

use crate::backend::{FlushOutcome, PARTITION_KEY, SessionBackend, Started};

/// Engine backed by the native session mechanism.
///
/// The native mechanism owns the cookie and the persistence; this engine
/// keeps the store's data map in the [`PARTITION_KEY`] partition.
pub struct FileBackend {
    native: Arc<dyn NativeSession>,
    settings: SessionSettings,
}

impl FileBackend {
    #[must_use]
    pub fn new(native: Arc<dyn NativeSession>, settings: SessionSettings) -> Self {
        Self { native, settings }
    }
}

#[async_trait]
impl SessionBackend for FileBackend {
    fn engine(&self) -> EngineType {
        EngineType::File
    }

    async fn start(&self, identifier: Option<String>) -> Result<Started, BackendError> {
        let params = NativeStart {
            name: self.settings.name.clone(),
            identifier,
            cookie: Cookie::session(self.settings.name.clone(), "", self.settings.domain.clone()),
        };
        let identifier = self.native.start(&params).await?;
        let data = self.native.partition(PARTITION_KEY).unwrap_or_default();

        debug!(session_id = %identifier, keys = data.len(), "File session started");
        Ok(Started { identifier, data })
    }

    fn on_set(&self, key: &str, value: &Value) {
        self.native.put(PARTITION_KEY, key, value.clone());
    }

    fn on_unregister(&self, key: &str) {
        self.native.remove(PARTITION_KEY, key);
    }

    fn set_identifier(&self, identifier: &str) {
        self.native.set_id(identifier);
    }

    async fn flush(
        &self,
        _identifier: &str,
        _data: &SessionData,
    ) -> Result<FlushOutcome, BackendError> {
        // Writes were mirrored as they happened; committing is all that is left.
        self.native.commit().await?;
        Ok(FlushOutcome::Written)
    }
}
