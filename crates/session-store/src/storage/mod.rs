//! Storage engines and the collaborators they run on.

pub mod cache;
pub mod file;
pub mod native;
pub mod relational;

#[cfg(feature = "memcached")]
pub mod memcached;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::CacheBackend;
pub use file::FileBackend;
pub use native::FileNativeSession;
pub use relational::RelationalBackend;

#[cfg(feature = "memcached")]
pub use memcached::MemcachedClient;

#[cfg(feature = "memory")]
pub use memory::{MemoryCache, MemoryCookieJar};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteClient;
