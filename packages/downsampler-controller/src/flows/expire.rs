use async_trait::async_trait;
use tracing::info;

use super::{ControllerJob, ExpireSummary, FlowContext, FlowOutcome, JobRequest, Operation};
use crate::error::Result;

/// Sweep previews older than the configured TTL: orchestrator resources,
/// then preview jobs, then the expired query rows.
pub struct ExpireFlow;

#[async_trait]
impl ControllerJob for ExpireFlow {
    fn operation(&self) -> Operation {
        Operation::Expire
    }

    async fn run(&self, request: &JobRequest, ctx: &FlowContext) -> Result<FlowOutcome> {
        let ttl = ctx.config.expire_after();

        let infra_removed = ctx.infra.remove_stale(ttl, request.now).await?;
        info!(infra_removed, "Removed stale preview resources");

        let jobs_cancelled = ctx.jobs.cancel_expired(ttl, request.now).await?;
        info!(jobs_cancelled, "Cancelled expired preview jobs");

        let queries_deleted = ctx.store.delete_expired_previews(request.now).await?;
        info!(queries_deleted, "Deleted expired preview queries");

        Ok(FlowOutcome::Expired(ExpireSummary {
            infra_removed,
            jobs_cancelled,
            queries_deleted,
        }))
    }
}
