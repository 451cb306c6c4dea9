//! Session configuration: the engine tag, typed settings and the namespaced
//! configuration source they are read from.

use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Namespace holding the `session` settings object.
pub const SYSTEM_NAMESPACE: &str = "system";
/// Key of the settings object inside [`SYSTEM_NAMESPACE`].
pub const SESSION_KEY: &str = "session";

pub const DEFAULT_EXPIRES_MINUTES: u64 = 120;
pub const DEFAULT_COOKIE_NAME: &str = "SESSID";
pub const DEFAULT_CACHE_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_CACHE_PORT: u16 = 11211;
pub const DEFAULT_DATABASE_SERVER: &str = "default";
pub const DEFAULT_DATABASE_TABLE: &str = "_sessions";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Undefined session type")]
    MissingType,
    #[error("Invalid session type: {0}")]
    InvalidType(String),
    #[error("Invalid session table name: {0}")]
    InvalidTable(String),
    #[error("Invalid session settings: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage engine behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineType {
    /// Native file-session mechanism.
    #[serde(rename = "file")]
    File,
    /// Distributed memory cache.
    #[serde(rename = "memcached")]
    Cache,
    /// Relational table.
    #[serde(rename = "database")]
    Relational,
}

impl EngineType {
    /// The configuration tag of this engine.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Cache => "memcached",
            Self::Relational => "database",
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "memcached" => Ok(Self::Cache),
            "database" => Ok(Self::Relational),
            other => Err(ConfigError::InvalidType(other.to_string())),
        }
    }
}

/// Cache server address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSettings {
    pub address: String,
    pub port: u16,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_CACHE_ADDRESS.to_string(),
            port: DEFAULT_CACHE_PORT,
        }
    }
}

/// Relational server name and table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSettings {
    pub server: String,
    pub table: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            server: DEFAULT_DATABASE_SERVER.to_string(),
            table: DEFAULT_DATABASE_TABLE.to_string(),
        }
    }
}

/// Validated session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSettings {
    pub engine: EngineType,
    /// Expiration in minutes. Zero means no explicit TTL.
    pub expires: u64,
    /// Cookie name carrying the identifier.
    pub name: String,
    pub domain: Option<String>,
    pub cache: CacheSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Default, Deserialize)]
struct RawCache {
    address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabase {
    server: Option<String>,
    table: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(rename = "type")]
    kind: Option<String>,
    expires: Option<u64>,
    name: Option<String>,
    domain: Option<String>,
    #[serde(default)]
    memcached: RawCache,
    server_addr: Option<String>,
    server_port: Option<u16>,
    #[serde(default)]
    database: RawDatabase,
}

impl SessionSettings {
    /// Settings for `engine` with every other field at its default.
    #[must_use]
    pub fn new(engine: EngineType) -> Self {
        Self {
            engine,
            expires: DEFAULT_EXPIRES_MINUTES,
            name: DEFAULT_COOKIE_NAME.to_string(),
            domain: None,
            cache: CacheSettings::default(),
            database: DatabaseSettings::default(),
        }
    }

    /// Read and validate the `system` / `session` object.
    ///
    /// # Errors
    /// Returns error if the engine type is missing or unknown, or a field
    /// has the wrong shape.
    pub fn load(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let value = source
            .get(SYSTEM_NAMESPACE, SESSION_KEY)
            .ok_or(ConfigError::MissingType)?;
        Self::from_value(value)
    }

    /// Validate a settings object.
    ///
    /// # Errors
    /// Returns error if the engine type is missing or unknown, or a field
    /// has the wrong shape.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let raw: RawSettings = serde_json::from_value(value)?;

        let engine: EngineType = raw.kind.ok_or(ConfigError::MissingType)?.parse()?;
        let mut settings = Self::new(engine);

        if let Some(expires) = raw.expires {
            settings.expires = expires;
        }
        if let Some(name) = raw.name {
            settings.name = name;
        }
        settings.domain = raw.domain.filter(|d| !d.is_empty());

        // Nested keys win over the flat aliases.
        if let Some(address) = raw.memcached.address.or(raw.server_addr) {
            settings.cache.address = address;
        }
        if let Some(port) = raw.memcached.port.or(raw.server_port) {
            settings.cache.port = port;
        }

        if let Some(server) = raw.database.server {
            settings.database.server = server;
        }
        if let Some(table) = raw.database.table {
            if table.is_empty()
                || !table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
            {
                return Err(ConfigError::InvalidTable(table));
            }
            settings.database.table = table;
        }

        Ok(settings)
    }

    /// Override the cookie name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the expiration.
    #[must_use]
    pub const fn with_expires(mut self, minutes: u64) -> Self {
        self.expires = minutes;
        self
    }
}

/// Generic configuration lookup.
pub trait ConfigSource: Send + Sync {
    /// Look up `key` (dot-separated path) inside `namespace`.
    fn get(&self, namespace: &str, key: &str) -> Option<Value>;
}

/// Namespaced configuration tree.
///
/// Each namespace is a JSON object; keys are resolved as dotted paths
/// (`session.memcached.port`).
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    namespaces: HashMap<String, Value>,
}

impl ConfigTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>, value: Value) -> Self {
        self.insert(namespace, value);
        self
    }

    /// Add or replace a namespace.
    pub fn insert(&mut self, namespace: impl Into<String>, value: Value) {
        self.namespaces.insert(namespace.into(), value);
    }

    /// Load a namespace from TOML text.
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML.
    pub fn insert_toml(
        &mut self,
        namespace: impl Into<String>,
        text: &str,
    ) -> Result<(), ConfigError> {
        let value: Value = toml::from_str(text)?;
        self.insert(namespace, value);
        Ok(())
    }

    /// Load a namespace from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load_toml_file(
        &mut self,
        namespace: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path)?;
        self.insert_toml(namespace, &text)
    }
}

impl ConfigSource for ConfigTree {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let mut node = self.namespaces.get(namespace)?;
        for part in key.split('.') {
            node = node.as_object()?.get(part)?;
        }
        Some(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tree(session: Value) -> ConfigTree {
        ConfigTree::new().with_namespace(SYSTEM_NAMESPACE, json!({ "session": session }))
    }

    #[test]
    fn test_defaults_applied() {
        let settings = SessionSettings::load(&tree(json!({ "type": "file" }))).unwrap();
        assert_eq!(settings.engine, EngineType::File);
        assert_eq!(settings.expires, DEFAULT_EXPIRES_MINUTES);
        assert_eq!(settings.name, DEFAULT_COOKIE_NAME);
        assert_eq!(settings.cache, CacheSettings::default());
        assert_eq!(settings.database, DatabaseSettings::default());
        assert!(settings.domain.is_none());
    }

    #[test]
    fn test_missing_and_invalid_type() {
        let err = SessionSettings::load(&ConfigTree::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingType));

        let err = SessionSettings::load(&tree(json!({ "expires": 10 }))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingType));

        let err = SessionSettings::load(&tree(json!({ "type": "redis" }))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType(t) if t == "redis"));
    }

    #[test]
    fn test_flat_cache_aliases() {
        let settings = SessionSettings::load(&tree(json!({
            "type": "memcached",
            "server_addr": "x",
            "server_port": 11212,
        })))
        .unwrap();
        assert_eq!(settings.engine, EngineType::Cache);
        assert_eq!(settings.cache.address, "x");
        assert_eq!(settings.cache.port, 11212);

        let settings = SessionSettings::load(&tree(json!({
            "type": "memcached",
            "server_addr": "flat",
            "memcached": { "address": "nested" },
        })))
        .unwrap();
        assert_eq!(settings.cache.address, "nested");
        assert_eq!(settings.cache.port, DEFAULT_CACHE_PORT);
    }

    #[test]
    fn test_database_settings_and_table_validation() {
        let settings = SessionSettings::load(&tree(json!({
            "type": "database",
            "database": { "server": "replica", "table": "web_sessions" },
        })))
        .unwrap();
        assert_eq!(settings.database.server, "replica");
        assert_eq!(settings.database.table, "web_sessions");

        let err = SessionSettings::load(&tree(json!({
            "type": "database",
            "database": { "table": "x; DROP TABLE users" },
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTable(_)));
    }

    #[test]
    fn test_toml_source_and_dotted_lookup() {
        let mut tree = ConfigTree::new();
        tree.insert_toml(
            SYSTEM_NAMESPACE,
            r#"
            [session]
            type = "database"
            expires = 30
            name = "SID"
            domain = "example.com"
            "#,
        )
        .unwrap();

        assert_eq!(tree.get(SYSTEM_NAMESPACE, "session.domain"), Some(json!("example.com")));
        assert_eq!(tree.get(SYSTEM_NAMESPACE, "session.missing"), None);
        assert_eq!(tree.get("other", "session"), None);

        let settings = SessionSettings::load(&tree).unwrap();
        assert_eq!(settings.engine, EngineType::Relational);
        assert_eq!(settings.expires, 30);
        assert_eq!(settings.name, "SID");
        assert_eq!(settings.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_engine_tags() {
        for engine in [EngineType::File, EngineType::Cache, EngineType::Relational] {
            assert_eq!(engine.as_str().parse::<EngineType>().unwrap(), engine);
        }
    }
}
