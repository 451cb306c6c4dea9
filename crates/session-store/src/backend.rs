//! The engine interface the store dispatches to, plus the identifier cookie
//! glue shared by the engines that bind their own cookie.

use async_trait::async_trait;
use serde_json::Value;
use session_store_core::{
    BackendError, Cookie, CookieJar, EngineType, IdentifierIssuer, SessionData, SessionSettings,
};
use tracing::warn;

/// Private partition key under which the store nests its data map inside
/// the native session.
pub const PARTITION_KEY: &str = "_store_";

/// A started session: the adopted identifier and the loaded data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Started {
    pub identifier: String,
    pub data: SessionData,
}

/// How a flush ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to write: the session was never started or already flushed.
    Skipped,
    /// Data reached the backend.
    Written,
    /// The backend no longer holds the session (pruned or re-keyed
    /// concurrently); the write was dropped.
    LostUpdate,
    /// The backend failed; the write was dropped.
    Failed(String),
}

/// Storage engine behind a started session.
///
/// One value is built per session from validated settings. Reads are
/// served from the store's in-memory snapshot, so engines only see
/// start, write-through hooks and the final flush.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Engine tag.
    fn engine(&self) -> EngineType;

    /// Establish the identifier and load existing data.
    ///
    /// `identifier` is the validated identifier presented by the client, if
    /// any; the engine mints one otherwise.
    async fn start(&self, identifier: Option<String>) -> Result<Started, BackendError>;

    /// Mirror a write outside the snapshot.
    fn on_set(&self, _key: &str, _value: &Value) {}

    /// Mirror a removal outside the snapshot.
    fn on_unregister(&self, _key: &str) {}

    /// Force the identifier of an underlying native mechanism.
    fn set_identifier(&self, _identifier: &str) {}

    /// Persist the data.
    async fn flush(
        &self,
        identifier: &str,
        data: &SessionData,
    ) -> Result<FlushOutcome, BackendError>;
}

/// Resolve the identifier for engines that manage their own cookie, and
/// (re)send the identifier cookie.
pub(crate) fn bind_identifier(
    cookies: &dyn CookieJar,
    issuer: &IdentifierIssuer,
    settings: &SessionSettings,
    requested: Option<String>,
) -> String {
    let identifier = requested.unwrap_or_else(|| issuer.generate());
    cookies.set(&Cookie::session(
        settings.name.clone(),
        identifier.clone(),
        settings.domain.clone(),
    ));
    identifier
}

/// Decode a stored payload. Empty, `null` and undecodable payloads load as
/// an empty session.
pub(crate) fn decode_data(identifier: &str, payload: &[u8]) -> SessionData {
    if payload.is_empty() {
        return SessionData::new();
    }
    match serde_json::from_slice::<Option<SessionData>>(payload) {
        Ok(data) => data.unwrap_or_default(),
        Err(e) => {
            warn!(session_id = %identifier, error = %e, "Discarding undecodable session payload");
            SessionData::new()
        }
    }
}
