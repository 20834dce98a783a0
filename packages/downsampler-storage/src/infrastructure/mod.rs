//! Infrastructure layer - Storage adapters
//!
//! - `memory`: process-local map
//! - `sqlite`: SQLite adapter (feature `sqlite`)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryQueryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteQueryStore;
