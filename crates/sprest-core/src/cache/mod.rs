//! Response cache layer.
//!
//! GET responses can be cached per request. Values are stored as JSON in one
//! of two stores:
//! - session: in-memory, lives as long as the process
//! - local: persistent (SQLite) when configured, otherwise unavailable
//!
//! Reads go through [`ClientStore`], which enforces expiry. Writes happen in
//! [`CachingParser`] after a response parses successfully.

mod caching;
mod memory;
mod sqlite;
mod storage;
mod traits;

pub use caching::{CachingOptions, CachingParser, ResolvedCaching};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use storage::{ClientStorage, ClientStore};
pub use traits::{CacheEntry, CacheStore, UnavailableStore};
