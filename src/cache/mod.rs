//! Durable key → timestamped-value store.
//!
//! One storage unit per [`EntityKind`] plus one for the current account
//! token. Writes follow the freshness-merge rule: a record is only replaced
//! by one with a strictly greater timestamp, so out-of-order writes settle
//! on the newest value regardless of arrival order.

mod layer;
mod storage;
mod traits;

pub use layer::PersistentCache;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage, StorageUnavailable};
pub use traits::{Cacheable, EntityKind, StoredRecord};
