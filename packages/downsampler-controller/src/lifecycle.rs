//! Query lifecycle accessor
//!
//! State-filtered reads and the read-modify-write transitions every flow uses.
//! Writers re-fetch before mutating so fields changed by another actor since
//! the flow's first read are not clobbered. There is no conditional write:
//! two writers racing on the same id resolve as last-write-wins.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use downsampler_storage::{DownsamplingQuery, QueryState, QueryStore};
use tracing::{debug, info, warn};

use crate::error::{ControllerError, Result};
use crate::query::{is_preview_expired, QueryStateMachine};

/// Result of a re-fetch-and-transition write
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The new document as written
    Applied(DownsamplingQuery),
    /// The record disappeared since it was first read
    NotFound,
    /// Another invocation already moved the record on
    StaleState { found: QueryState },
}

#[derive(Clone)]
pub struct QueryLifecycleStore {
    store: Arc<dyn QueryStore>,
}

impl QueryLifecycleStore {
    pub fn new(store: Arc<dyn QueryStore>) -> Self {
        Self { store }
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }

    pub async fn list_by_state(&self, state: QueryState) -> Result<Vec<DownsamplingQuery>> {
        Ok(self.store.list_by_state(state).await?)
    }

    /// PENDING, PREVIEW_PENDING and DELETED queries, oldest first.
    pub async fn list_actionable(&self) -> Result<Vec<DownsamplingQuery>> {
        let mut queries = self.store.list_actionable().await?;
        queries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(queries)
    }

    pub async fn get(&self, query_id: &str) -> Result<Option<DownsamplingQuery>> {
        Ok(self.store.get(query_id).await?)
    }

    pub async fn put(&self, query: &DownsamplingQuery) -> Result<()> {
        Ok(self.store.put(query).await?)
    }

    pub async fn delete(&self, query_id: &str) -> Result<()> {
        info!(query_id, "Deleting query from store");
        Ok(self.store.delete(query_id).await?)
    }

    /// PENDING → DEPLOYED on a freshly read copy.
    pub async fn mark_deployed(&self, query_id: &str, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        self.transition(query_id, QueryState::Pending, |sm| sm.deploy(now))
            .await
    }

    /// PREVIEW_PENDING → PREVIEW_DEPLOYED on a freshly read copy.
    pub async fn mark_preview_deployed(
        &self,
        query_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<TransitionOutcome> {
        self.transition(query_id, QueryState::PreviewPending, |sm| {
            sm.deploy_preview(now, ttl)
        })
        .await
    }

    async fn transition<F>(
        &self,
        query_id: &str,
        expected: QueryState,
        apply: F,
    ) -> Result<TransitionOutcome>
    where
        F: FnOnce(&mut QueryStateMachine) -> Result<()>,
    {
        let Some(current) = self.store.get(query_id).await? else {
            warn!(query_id, "Query vanished before its state could be updated, ignoring");
            return Ok(TransitionOutcome::NotFound);
        };

        if current.query_state != expected {
            warn!(
                query_id,
                expected = %expected,
                found = %current.query_state,
                "Query state changed underneath us, ignoring"
            );
            return Ok(TransitionOutcome::StaleState {
                found: current.query_state,
            });
        }

        let mut sm = QueryStateMachine::new(current);
        apply(&mut sm)?;
        let updated = sm.into_query();
        self.store.put(&updated).await?;

        debug!(query_id, state = %updated.query_state, "Query state written");
        Ok(TransitionOutcome::Applied(updated))
    }

    pub async fn expired_previews(&self, now: DateTime<Utc>) -> Result<Vec<DownsamplingQuery>> {
        let deployed = self.store.list_by_state(QueryState::PreviewDeployed).await?;
        Ok(deployed
            .into_iter()
            .filter(|q| is_preview_expired(q, now))
            .collect())
    }

    /// Delete every deployed preview whose expiry passed before `now`.
    ///
    /// Stops at the first failed delete; the error carries how many rows
    /// were already removed.
    pub async fn delete_expired_previews(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.expired_previews(now).await?;

        let mut count = 0;
        for query in &expired {
            info!(query_id = %query.query_id, "Deleting expired preview");
            self.store
                .delete(&query.query_id)
                .await
                .map_err(|e| ControllerError::from(e).after(count))?;
            count += 1;
        }
        Ok(count)
    }
}
