//! Relational engine: one row per identifier in a session table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use session_store_core::{
    BackendError, Clock, CookieJar, EngineType, IdentifierIssuer, RelationalClient,
    RelationalConnector, SessionData, SessionSettings, SqlValue,
};
use tracing::{debug, warn};

use crate::backend::{FlushOutcome, SessionBackend, Started, bind_identifier, decode_data};

/// Pruning window used when the configured expiration is zero (24 hours).
pub const DEFAULT_PRUNE_MINUTES: u64 = 24 * 60;

/// Engine backed by a relational table
/// (`id` PK, `session_value` nullable, `updated_at`).
///
/// No row lock is held between start and flush: concurrent requests for the
/// same identifier race and the last flush wins.
pub struct RelationalBackend {
    client: Arc<dyn RelationalClient>,
    cookies: Arc<dyn CookieJar>,
    clock: Arc<dyn Clock>,
    issuer: IdentifierIssuer,
    settings: SessionSettings,
}

impl RelationalBackend {
    /// Connect to the configured server.
    ///
    /// # Errors
    /// Returns error if the connector cannot reach the server.
    pub async fn connect(
        connector: &dyn RelationalConnector,
        settings: SessionSettings,
        cookies: Arc<dyn CookieJar>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BackendError> {
        let client = connector.connect(&settings.database.server).await?;
        Ok(Self::new(client, settings, cookies, clock))
    }

    #[must_use]
    pub fn new(
        client: Arc<dyn RelationalClient>,
        settings: SessionSettings,
        cookies: Arc<dyn CookieJar>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            cookies,
            clock,
            issuer: IdentifierIssuer::new(),
            settings,
        }
    }

    /// Age after which rows are pruned. A zero expiration prunes after
    /// [`DEFAULT_PRUNE_MINUTES`]; windows past the representable range
    /// saturate.
    #[must_use]
    pub fn prune_window(&self) -> Duration {
        let minutes = match self.settings.expires {
            0 => DEFAULT_PRUNE_MINUTES,
            m => m,
        };
        i64::try_from(minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or(Duration::MAX)
    }

    /// Delete every row, of any session, last updated at or before
    /// `now - prune_window`. Nothing is deleted when that cutoff predates
    /// the representable calendar.
    ///
    /// # Errors
    /// Returns error if the statement fails.
    pub async fn prune(&self) -> Result<u64, BackendError> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.prune_window()) else {
            return Ok(0);
        };
        let sql = format!("DELETE FROM `{}` WHERE `updated_at` <= ?", self.table());
        let result = self.client.execute(&sql, &[SqlValue::Timestamp(cutoff)]).await?;
        if result.affected_rows > 0 {
            debug!(
                table = %self.table(),
                pruned = result.affected_rows,
                "Pruned expired sessions"
            );
        }
        Ok(result.affected_rows)
    }

    fn table(&self) -> &str {
        &self.settings.database.table
    }
}

#[async_trait]
impl SessionBackend for RelationalBackend {
    fn engine(&self) -> EngineType {
        EngineType::Relational
    }

    async fn start(&self, identifier: Option<String>) -> Result<Started, BackendError> {
        let identifier =
            bind_identifier(self.cookies.as_ref(), &self.issuer, &self.settings, identifier);

        self.prune().await?;

        let select = format!("SELECT `session_value` FROM `{}` WHERE `id` = ?", self.table());
        let result = self
            .client
            .execute(&select, &[SqlValue::from(identifier.as_str())])
            .await?;

        let data = if let Some(row) = result.first() {
            row.text("session_value")
                .map(|value| decode_data(&identifier, value.as_bytes()))
                .unwrap_or_default()
        } else {
            let insert = format!(
                "INSERT INTO `{}` (`id`, `session_value`, `updated_at`) VALUES (?, NULL, ?)",
                self.table()
            );
            self.client
                .execute(
                    &insert,
                    &[
                        SqlValue::from(identifier.as_str()),
                        SqlValue::Timestamp(self.clock.now()),
                    ],
                )
                .await?;
            debug!(session_id = %identifier, table = %self.table(), "Inserted session row");
            SessionData::new()
        };

        Ok(Started { identifier, data })
    }

    async fn flush(
        &self,
        identifier: &str,
        data: &SessionData,
    ) -> Result<FlushOutcome, BackendError> {
        let value = serde_json::to_string(data)?;
        let update = format!(
            "UPDATE `{}` SET `session_value` = ?, `updated_at` = ? WHERE `id` = ?",
            self.table()
        );
        let result = self
            .client
            .execute(
                &update,
                &[
                    SqlValue::Text(value),
                    SqlValue::Timestamp(self.clock.now()),
                    SqlValue::from(identifier),
                ],
            )
            .await?;

        if result.affected_rows == 0 {
            warn!(
                session_id = %identifier,
                table = %self.table(),
                "Session row vanished before flush"
            );
            return Ok(FlushOutcome::LostUpdate);
        }
        Ok(FlushOutcome::Written)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use session_store_core::{EngineType, ManualClock};

    use super::*;
    use crate::{storage::MemoryCookieJar, testing::FakeTable};

    type Fixture = (RelationalBackend, Arc<FakeTable>, Arc<ManualClock>, Arc<MemoryCookieJar>);

    fn backend(expires: u64) -> Fixture {
        let table = Arc::new(FakeTable::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cookies = Arc::new(MemoryCookieJar::new());
        let settings = SessionSettings::new(EngineType::Relational).with_expires(expires);
        let backend =
            RelationalBackend::new(table.clone(), settings, cookies.clone(), clock.clone());
        (backend, table, clock, cookies)
    }

    #[test]
    fn test_prune_window() {
        assert_eq!(backend(30).0.prune_window(), Duration::minutes(30));
        assert_eq!(backend(0).0.prune_window(), Duration::hours(24));
    }

    #[tokio::test]
    async fn test_huge_expiration_keeps_rows() {
        assert_eq!(backend(1 << 62).0.prune_window(), Duration::MAX);
        assert_eq!(backend(u64::MAX).0.prune_window(), Duration::MAX);

        for expires in [200_000_000_000, 1 << 62, u64::MAX] {
            let (backend, table, clock, _) = backend(expires);
            table.put_row("old", Some("{}"), clock.now() - Duration::days(3650));

            let started = backend.start(None).await.unwrap();
            assert!(table.row("old").is_some());
            assert!(table.row(&started.identifier).is_some());
            assert!(!table.statements().iter().any(|s| s.starts_with("DELETE")));
        }
    }

    #[tokio::test]
    async fn test_start_inserts_placeholder_and_binds_cookie() {
        let (backend, table, _, cookies) = backend(30);

        let started = backend.start(None).await.unwrap();
        assert_eq!(started.identifier.len(), 26);
        assert!(started.data.is_empty());

        let row = table.row(&started.identifier).unwrap();
        assert_eq!(row.0, None);
        assert_eq!(cookies.sent_value("SESSID").as_deref(), Some(started.identifier.as_str()));
    }

    #[tokio::test]
    async fn test_start_loads_existing_row() {
        let (backend, table, clock, _) = backend(30);
        table.put_row("abc-123", Some(r#"{"user":42}"#), clock.now());

        let started = backend.start(Some("abc-123".to_string())).await.unwrap();
        assert_eq!(started.identifier, "abc-123");
        assert_eq!(started.data.get("user"), Some(&json!(42)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_start_prunes_other_sessions() {
        let (backend, table, clock, _) = backend(30);
        let now = clock.now();
        table.put_row("stale", Some("{}"), now - Duration::minutes(31));
        table.put_row("edge", Some("{}"), now - Duration::minutes(30));
        table.put_row("fresh", Some("{}"), now - Duration::minutes(5));

        backend.start(Some("mine".to_string())).await.unwrap();

        assert!(table.row("stale").is_none());
        assert!(table.row("edge").is_none());
        assert!(table.row("fresh").is_some());
        assert!(table.row("mine").is_some());
    }

    #[tokio::test]
    async fn test_flush_updates_row() {
        let (backend, table, clock, _) = backend(30);
        let started = backend.start(None).await.unwrap();

        clock.advance(Duration::minutes(3));
        let mut data = started.data;
        data.insert("user".to_string(), json!(42));
        let outcome = backend.flush(&started.identifier, &data).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Written);

        let (value, updated_at) = table.row(&started.identifier).unwrap();
        assert!(value.unwrap().contains("42"));
        assert_eq!(updated_at, SqlValue::Timestamp(clock.now()).as_text().unwrap());
    }

    #[tokio::test]
    async fn test_flush_after_concurrent_prune_is_lost_update() {
        let (backend, table, _, _) = backend(30);
        let started = backend.start(None).await.unwrap();
        table.remove_row(&started.identifier);

        let outcome = backend.flush(&started.identifier, &SessionData::new()).await.unwrap();
        assert_eq!(outcome, FlushOutcome::LostUpdate);
    }

    #[tokio::test]
    async fn test_start_propagates_query_failure() {
        let (backend, table, _, _) = backend(30);
        table.fail_queries(true);
        let err = backend.start(None).await.unwrap_err();
        assert!(matches!(err, BackendError::Query(_)));
    }
}
