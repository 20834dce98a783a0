use async_trait::async_trait;
use downsampler_storage::QueryState;
use tracing::info;

use super::{load_expecting, ControllerJob, FlowContext, FlowOutcome, JobRequest, Loaded, Operation};
use crate::error::Result;
use crate::infra::PREVIEW_RETENTION_POLICY;
use crate::liveness::wait_until_reachable;
use crate::offsets::OffsetWindowCalculator;
use crate::stream_job::{DeployOutcome, DeployTarget};

/// PREVIEW_PENDING → preview stack → preview database → replay job → PREVIEW_DEPLOYED
pub struct SimulateFlow;

#[async_trait]
impl ControllerJob for SimulateFlow {
    fn operation(&self) -> Operation {
        Operation::Simulate
    }

    async fn run(&self, request: &JobRequest, ctx: &FlowContext) -> Result<FlowOutcome> {
        let query_id = request.require_query_id()?;
        let query = match load_expecting(ctx, query_id, QueryState::PreviewPending).await? {
            Loaded::Ready(query) => query,
            Loaded::Skip(outcome) => return Ok(outcome),
        };

        let endpoints = ctx.infra.provision_preview(&query).await?;
        info!(query_id, stack = %endpoints.stack_name, "Preview stack provisioned");

        wait_until_reachable(
            &endpoints.influxdb_url,
            ctx.config.liveness_interval,
            || ctx.infra.probe(&endpoints),
        )
        .await;
        ctx.infra
            .bootstrap_database(&endpoints, &query.db, PREVIEW_RETENTION_POLICY)
            .await?;

        let topic = ctx.config.source_topic(&query);
        let offsets = OffsetWindowCalculator::new(ctx.topics.as_ref())
            .compute_desired_offsets(&topic)
            .await?;

        let target = DeployTarget::Preview {
            influxdb_base_url: endpoints.influxdb_url.clone(),
            offsets,
        };
        match ctx.jobs.deploy(&query, &target).await? {
            DeployOutcome::Submitted { job_name } => {
                info!(query_id, job_name = %job_name, "Preview job deployed")
            }
            DeployOutcome::AlreadyRunning => info!(query_id, "Preview job was already running"),
        }

        let written = ctx
            .store
            .mark_preview_deployed(query_id, request.now, ctx.config.expire_after())
            .await?;
        Ok(FlowOutcome::from_transition(written, QueryState::PreviewPending))
    }
}
