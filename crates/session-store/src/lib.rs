//! Pluggable session-state store.
//!
//! Provides:
//! - `SessionStore` - Lazy start, in-memory data and the deferred flush
//! - `SessionBackend` - Engine interface
//! - Engines over the native file session, memcached and relational tables
//! - Collaborators: directory-backed native sessions, in-memory cookie jar
//!   and cache, memcached (feature `memcached`), SQLite (feature `sqlite`)

pub mod backend;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testing;

pub use backend::{FlushOutcome, PARTITION_KEY, SessionBackend, Started};
pub use storage::{CacheBackend, FileBackend, FileNativeSession, RelationalBackend};
pub use store::{SessionError, SessionStore};

#[cfg(feature = "memcached")]
pub use storage::MemcachedClient;

#[cfg(feature = "memory")]
pub use storage::{MemoryCache, MemoryCookieJar};

#[cfg(feature = "sqlite")]
pub use storage::SqliteClient;
