use chrono::{DateTime, Duration, Utc};
use downsampler_storage::{DownsamplingQuery, QueryState};

use crate::error::{ControllerError, Result};

/// Forward-only transitions of a downsampling query.
///
/// Flows check the precondition themselves and skip on mismatch, so an
/// `InvalidStateTransition` here means a caller skipped that check.
pub struct QueryStateMachine {
    query: DownsamplingQuery,
}

impl QueryStateMachine {
    pub fn new(query: DownsamplingQuery) -> Self {
        Self { query }
    }

    pub fn query(&self) -> &DownsamplingQuery {
        &self.query
    }

    pub fn into_query(self) -> DownsamplingQuery {
        self.query
    }

    /// Transition: PENDING → DEPLOYED
    pub fn deploy(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect(QueryState::Pending, QueryState::Deployed)?;
        self.query.query_state = QueryState::Deployed;
        self.query.updated_at = now;
        Ok(())
    }

    /// Transition: PREVIEW_PENDING → PREVIEW_DEPLOYED, expiring after `ttl`
    pub fn deploy_preview(&mut self, now: DateTime<Utc>, ttl: Duration) -> Result<()> {
        self.expect(QueryState::PreviewPending, QueryState::PreviewDeployed)?;
        self.query.query_state = QueryState::PreviewDeployed;
        self.query.updated_at = now;
        self.query.preview_expires_at = Some(now + ttl);
        Ok(())
    }

    fn expect(&self, from: QueryState, to: QueryState) -> Result<()> {
        if self.query.query_state == from {
            Ok(())
        } else {
            Err(ControllerError::InvalidStateTransition {
                from: self.query.query_state.to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// A deployed preview whose expiry has passed. A deployed preview without a
/// recorded expiry counts as expired so it cannot linger forever.
pub fn is_preview_expired(query: &DownsamplingQuery, now: DateTime<Utc>) -> bool {
    if query.query_state != QueryState::PreviewDeployed {
        return false;
    }
    match query.preview_expires_at {
        Some(expires_at) => now > expires_at,
        None => true,
    }
}
