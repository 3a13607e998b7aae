pub mod cached;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedIdentityStore;
pub use sqlite::SqliteStorage;
pub use trait_def::{IdentityStore, StorageError, StorageResult};
