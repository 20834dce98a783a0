use async_trait::async_trait;
use downsampler_storage::QueryState;
use tracing::info;

use super::{load_expecting, ControllerJob, FlowContext, FlowOutcome, JobRequest, Loaded, Operation};
use crate::error::Result;
use crate::stream_job::JobMode;

/// DELETED → cancel every job of the query → row removed
pub struct DeleteFlow;

#[async_trait]
impl ControllerJob for DeleteFlow {
    fn operation(&self) -> Operation {
        Operation::Delete
    }

    async fn run(&self, request: &JobRequest, ctx: &FlowContext) -> Result<FlowOutcome> {
        let query_id = request.require_query_id()?;
        if let Loaded::Skip(outcome) = load_expecting(ctx, query_id, QueryState::Deleted).await? {
            return Ok(outcome);
        }

        let cancelled = ctx.jobs.cancel_all(query_id, JobMode::All).await?;
        info!(query_id, cancelled, "Cancelled jobs of deleted query");

        ctx.store.delete(query_id).await?;
        Ok(FlowOutcome::Applied)
    }
}
