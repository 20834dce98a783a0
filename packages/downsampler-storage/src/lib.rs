//! Downsampling query store
//!
//! Persistence for downsampling configuration objects.
//!
//! ## Core Principles
//!
//! 1. **Whole-object writes**: a query is read as a copy and written back as a
//!    whole document; there are no partial updates.
//! 2. **Absent is not an error**: `get` returns `None` for an unknown id so
//!    callers can treat a vanished record as already handled.
//! 3. **Last write wins**: no version token guards concurrent writers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use downsampler_storage::{InMemoryQueryStore, QueryState, QueryStore};
//!
//! let store = InMemoryQueryStore::new();
//! store.put(&query).await?;
//!
//! let pending = store.list_by_state(QueryState::Pending).await?;
//! let loaded = store.get("197601d5").await?;
//! store.delete("197601d5").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{AggregationField, DownsamplingQuery, QueryState, QueryStore, QUERY_TABLE};
pub use infrastructure::InMemoryQueryStore;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteQueryStore;
