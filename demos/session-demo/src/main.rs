//! Session store demo: replays a few requests that share one cookie.
//!
//! Run with: cargo run -p session-demo -- [config.toml] [requests]
//!
//! Without a config file the `database` engine runs on an in-memory SQLite
//! database. A `memcached` config needs a reachable memcached server.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use session_store::{
    FileNativeSession, MemcachedClient, MemoryCookieJar, SessionStore, SqliteClient,
};
use session_store_core::{ConfigTree, EngineType, SessionSettings, config::SYSTEM_NAMESPACE};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = r#"
[session]
type = "database"
expires = 30
name = "SID"
"#;

const DEFAULT_REQUESTS: u32 = 3;

/// Collaborators shared by every simulated request.
enum Engine {
    File(PathBuf),
    Cache(Arc<MemcachedClient>),
    Relational(SqliteClient),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,session_store=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = ConfigTree::new();
    match args.next() {
        Some(path) => config
            .load_toml_file(SYSTEM_NAMESPACE, &path)
            .with_context(|| format!("failed to load {path}"))?,
        None => config.insert_toml(SYSTEM_NAMESPACE, DEFAULT_CONFIG)?,
    }
    let requests: u32 = match args.next() {
        Some(n) => n.parse().with_context(|| format!("invalid request count: {n}"))?,
        None => DEFAULT_REQUESTS,
    };

    let settings = SessionSettings::load(&config)?;
    let engine = match settings.engine {
        EngineType::File => Engine::File(FileNativeSession::default_dir()),
        EngineType::Cache => Engine::Cache(Arc::new(MemcachedClient::new())),
        EngineType::Relational => {
            let client = SqliteClient::connect("sqlite::memory:").await?;
            client.ensure_table(&settings.database.table).await?;
            Engine::Relational(client)
        }
    };
    tracing::info!(
        engine = %settings.engine,
        cookie = %settings.name,
        requests,
        "Replaying requests"
    );

    let config = Arc::new(config);
    let mut cookie: Option<String> = None;

    for request in 1..=requests {
        let mut jar = MemoryCookieJar::new();
        if let Some(value) = &cookie {
            jar = jar.with_cookie(settings.name.clone(), value.clone());
        }
        let jar = Arc::new(jar);

        let store = SessionStore::new(config.clone(), jar.clone());
        let mut store = match &engine {
            Engine::File(dir) => {
                store.with_native(Arc::new(FileNativeSession::new(dir.clone(), jar.clone())))
            }
            Engine::Cache(client) => store.with_cache(client.clone()),
            Engine::Relational(client) => store.with_relational(Arc::new(client.clone())),
        };

        let visits = store.get_as::<u64>("visits").await?.unwrap_or(0) + 1;
        store.set("visits", visits).await?;
        let session_id = store.get_id().await?.to_string();
        let outcome = store.close().await;

        tracing::info!(request, %session_id, visits, ?outcome, "Request finished");
        cookie = jar.sent_value(&settings.name).or(cookie);
    }

    Ok(())
}
