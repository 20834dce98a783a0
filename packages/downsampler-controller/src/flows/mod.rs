//! Job execution flows
//!
//! One flow runs per process invocation. Each reads the query, checks the
//! state it expects, drives the cluster and writes the next state back.
//!
//! | Operation  | Needs            | Does                                   |
//! |------------|------------------|----------------------------------------|
//! | coordinate | -                | schedules a worker per actionable query |
//! | deploy     | PENDING          | production job, then DEPLOYED          |
//! | simulate   | PREVIEW_PENDING  | preview stack + job, then PREVIEW_DEPLOYED |
//! | delete     | DELETED          | cancels all jobs, removes the row      |
//! | expire     | -                | sweeps stale previews                  |
//!
//! A missing record or an unexpected state is not an error: another
//! invocation got there first.

mod coordinate;
mod delete;
mod deploy;
mod expire;
mod simulate;

pub use coordinate::CoordinateFlow;
pub use delete::DeleteFlow;
pub use deploy::DeployFlow;
pub use expire::ExpireFlow;
pub use simulate::SimulateFlow;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use downsampler_storage::{DownsamplingQuery, QueryState};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::infra::{InfraProvisioner, JobRunner};
use crate::lifecycle::{QueryLifecycleStore, TransitionOutcome};
use crate::offsets::TopicMetadata;
use crate::stream_job::StreamJobCoordinator;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Coordinate,
    Simulate,
    Deploy,
    Delete,
    Expire,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Coordinate => "coordinate",
            Operation::Simulate => "simulate",
            Operation::Deploy => "deploy",
            Operation::Delete => "delete",
            Operation::Expire => "expire",
        }
    }

    pub fn requires_query_id(&self) -> bool {
        matches!(
            self,
            Operation::Simulate | Operation::Deploy | Operation::Delete
        )
    }

    /// Whether the flow talks to the stream processing cluster.
    pub fn uses_processing_cluster(&self) -> bool {
        !matches!(self, Operation::Coordinate)
    }

    /// The single-item operation that advances a query in `state`.
    pub fn for_state(state: QueryState) -> Option<Self> {
        match state {
            QueryState::PreviewPending => Some(Operation::Simulate),
            QueryState::Pending => Some(Operation::Deploy),
            QueryState::Deleted => Some(Operation::Delete),
            QueryState::PreviewDeployed | QueryState::Deployed => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One invocation
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub operation: Operation,
    pub query_id: Option<String>,
    /// Wall clock captured once at start; every timestamp written uses it.
    pub now: DateTime<Utc>,
}

impl JobRequest {
    pub fn new(operation: Operation, query_id: Option<String>) -> Self {
        Self {
            operation,
            query_id: query_id.filter(|id| !id.trim().is_empty()),
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// The target id, or an input error naming the operation.
    pub fn require_query_id(&self) -> Result<&str> {
        self.query_id
            .as_deref()
            .ok_or_else(|| ControllerError::missing_query_id(self.operation.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireSummary {
    pub infra_removed: usize,
    pub jobs_cancelled: usize,
    pub queries_deleted: usize,
}

/// How a flow finished. Every variant is a successful run.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    Applied,
    NotFound,
    StaleState {
        expected: QueryState,
        found: QueryState,
    },
    Scheduled {
        created: usize,
        existing: usize,
    },
    Expired(ExpireSummary),
}

impl FlowOutcome {
    fn from_transition(outcome: TransitionOutcome, expected: QueryState) -> Self {
        match outcome {
            TransitionOutcome::Applied(_) => FlowOutcome::Applied,
            TransitionOutcome::NotFound => FlowOutcome::NotFound,
            TransitionOutcome::StaleState { found } => FlowOutcome::StaleState { expected, found },
        }
    }
}

/// Collaborators shared by every flow
#[derive(Clone)]
pub struct FlowContext {
    pub config: Arc<ControllerConfig>,
    pub store: QueryLifecycleStore,
    pub jobs: Arc<StreamJobCoordinator>,
    pub topics: Arc<dyn TopicMetadata>,
    pub infra: Arc<dyn InfraProvisioner>,
    pub runner: Arc<dyn JobRunner>,
}

#[async_trait]
pub trait ControllerJob: Send + Sync {
    fn operation(&self) -> Operation;

    async fn run(&self, request: &JobRequest, ctx: &FlowContext) -> Result<FlowOutcome>;
}

pub fn flow_for(operation: Operation) -> Box<dyn ControllerJob> {
    match operation {
        Operation::Coordinate => Box::new(CoordinateFlow),
        Operation::Simulate => Box::new(SimulateFlow),
        Operation::Deploy => Box::new(DeployFlow),
        Operation::Delete => Box::new(DeleteFlow),
        Operation::Expire => Box::new(ExpireFlow),
    }
}

/// Validate the request and run its flow.
pub async fn execute(request: &JobRequest, ctx: &FlowContext) -> Result<FlowOutcome> {
    if request.operation.requires_query_id() {
        request.require_query_id()?;
    }
    let outcome = flow_for(request.operation).run(request, ctx).await?;
    info!(operation = %request.operation, outcome = ?outcome, "Flow finished");
    Ok(outcome)
}

enum Loaded {
    Ready(DownsamplingQuery),
    Skip(FlowOutcome),
}

/// Fetch `query_id` and check it is in `expected`.
async fn load_expecting(
    ctx: &FlowContext,
    query_id: &str,
    expected: QueryState,
) -> Result<Loaded> {
    let Some(query) = ctx.store.get(query_id).await? else {
        info!(query_id, "Query not found, nothing to do");
        return Ok(Loaded::Skip(FlowOutcome::NotFound));
    };
    if query.query_state != expected {
        info!(
            query_id,
            expected = %expected,
            found = %query.query_state,
            "Query not in expected state, already handled"
        );
        return Ok(Loaded::Skip(FlowOutcome::StaleState {
            expected,
            found: query.query_state,
        }));
    }
    Ok(Loaded::Ready(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_for_state() {
        assert_eq!(
            Operation::for_state(QueryState::PreviewPending),
            Some(Operation::Simulate)
        );
        assert_eq!(Operation::for_state(QueryState::Pending), Some(Operation::Deploy));
        assert_eq!(Operation::for_state(QueryState::Deleted), Some(Operation::Delete));
        assert_eq!(Operation::for_state(QueryState::Deployed), None);
        assert_eq!(Operation::for_state(QueryState::PreviewDeployed), None);
    }

    #[test]
    fn test_query_id_requirement() {
        assert!(Operation::Deploy.requires_query_id());
        assert!(Operation::Simulate.requires_query_id());
        assert!(Operation::Delete.requires_query_id());
        assert!(!Operation::Coordinate.requires_query_id());
        assert!(!Operation::Expire.requires_query_id());
    }

    #[test]
    fn test_coordinate_stays_off_the_processing_cluster() {
        assert!(!Operation::Coordinate.uses_processing_cluster());
        for op in [
            Operation::Simulate,
            Operation::Deploy,
            Operation::Delete,
            Operation::Expire,
        ] {
            assert!(op.uses_processing_cluster());
        }
    }

    #[test]
    fn test_blank_query_id_is_missing() {
        let request = JobRequest::new(Operation::Deploy, Some("  ".into()));

        let err = request.require_query_id().unwrap_err();
        assert!(matches!(err, ControllerError::MissingQueryId { ref operation } if operation == "deploy"));
    }

    #[test]
    fn test_flow_for_every_operation() {
        for op in [
            Operation::Coordinate,
            Operation::Simulate,
            Operation::Deploy,
            Operation::Delete,
            Operation::Expire,
        ] {
            assert_eq!(flow_for(op).operation(), op);
        }
    }
}
