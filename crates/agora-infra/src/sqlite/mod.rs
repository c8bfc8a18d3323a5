//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod memory;
pub mod pool;

pub use memory::SqliteMemoryRepository;
pub use pool::DatabasePool;
