//! In-memory adapter for QueryStore

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{DownsamplingQuery, QueryState, QueryStore};
use crate::Result;

/// Query store backed by a shared ordered map.
///
/// Clones share the same map, so a test can keep a handle while the code
/// under test owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueryStore {
    queries: Arc<Mutex<BTreeMap<String, DownsamplingQuery>>>,
}

impl InMemoryQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queries(queries: impl IntoIterator<Item = DownsamplingQuery>) -> Self {
        let store = Self::new();
        {
            let mut map = store.queries.lock();
            for query in queries {
                map.insert(query.query_id.clone(), query);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.lock().is_empty()
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.queries.lock().contains_key(query_id)
    }
}

#[async_trait]
impl QueryStore for InMemoryQueryStore {
    async fn list_by_state(&self, state: QueryState) -> Result<Vec<DownsamplingQuery>> {
        self.list_by_states(&[state]).await
    }

    async fn list_by_states(&self, states: &[QueryState]) -> Result<Vec<DownsamplingQuery>> {
        let queries = self.queries.lock();
        Ok(queries
            .values()
            .filter(|q| states.contains(&q.query_state))
            .cloned()
            .collect())
    }

    async fn get(&self, query_id: &str) -> Result<Option<DownsamplingQuery>> {
        Ok(self.queries.lock().get(query_id).cloned())
    }

    async fn put(&self, query: &DownsamplingQuery) -> Result<()> {
        self.queries
            .lock()
            .insert(query.query_id.clone(), query.clone());
        Ok(())
    }

    async fn delete(&self, query_id: &str) -> Result<()> {
        self.queries.lock().remove(query_id);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
