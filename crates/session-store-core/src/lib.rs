//! Core abstractions for the pluggable session-state store.
//!
//! This crate provides the building blocks shared by every engine:
//! - `SessionSettings` / `EngineType` - Typed session configuration
//! - `ConfigTree` - Namespaced configuration source (TOML)
//! - `IdentifierIssuer` - Identifier generation and validation
//! - Collaborator traits for cookies, caches, relational clients and the
//!   native file-session mechanism

pub mod clock;
pub mod config;
pub mod cookie;
pub mod identifier;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigSource, ConfigTree, EngineType, SessionSettings};
pub use cookie::{Cookie, CookieJar};
pub use identifier::IdentifierIssuer;
pub use traits::{
    BackendError, CacheClient, NativeSession, NativeStart, QueryResult, RelationalClient,
    RelationalConnector, Row, SessionData, SqlValue,
};
