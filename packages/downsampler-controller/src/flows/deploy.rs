use async_trait::async_trait;
use downsampler_storage::QueryState;
use tracing::info;

use super::{load_expecting, ControllerJob, FlowContext, FlowOutcome, JobRequest, Loaded, Operation};
use crate::error::Result;
use crate::stream_job::{DeployOutcome, DeployTarget};

/// PENDING → production job → DEPLOYED
pub struct DeployFlow;

#[async_trait]
impl ControllerJob for DeployFlow {
    fn operation(&self) -> Operation {
        Operation::Deploy
    }

    async fn run(&self, request: &JobRequest, ctx: &FlowContext) -> Result<FlowOutcome> {
        let query_id = request.require_query_id()?;
        let query = match load_expecting(ctx, query_id, QueryState::Pending).await? {
            Loaded::Ready(query) => query,
            Loaded::Skip(outcome) => return Ok(outcome),
        };

        match ctx.jobs.deploy(&query, &DeployTarget::Production).await? {
            DeployOutcome::Submitted { job_name } => {
                info!(query_id, job_name = %job_name, "Production job deployed")
            }
            DeployOutcome::AlreadyRunning => {
                info!(query_id, "Production job was already running")
            }
        }

        let written = ctx.store.mark_deployed(query_id, request.now).await?;
        Ok(FlowOutcome::from_transition(written, QueryState::Pending))
    }
}
