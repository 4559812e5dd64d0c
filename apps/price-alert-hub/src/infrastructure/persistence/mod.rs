//! Persistence Adapters
//!
//! Implementations of [`PersistenceStore`](crate::application::ports::PersistenceStore).
//!
//! - `in_memory`: Process-local store for tests and ephemeral runs
//! - `sqlite`: Durable store backed by `sqlx` and SQLite

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
