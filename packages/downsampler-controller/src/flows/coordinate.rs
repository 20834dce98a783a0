use async_trait::async_trait;
use tracing::{info, warn};

use super::{ControllerJob, FlowContext, FlowOutcome, JobRequest, Operation};
use crate::error::Result;
use crate::infra::WorkerJobSpec;

/// Schedule one worker invocation per actionable query, oldest first.
///
/// Does not run the work itself. Job names are deterministic, so a worker
/// that is already scheduled is reported as existing rather than retried.
pub struct CoordinateFlow;

#[async_trait]
impl ControllerJob for CoordinateFlow {
    fn operation(&self) -> Operation {
        Operation::Coordinate
    }

    async fn run(&self, _request: &JobRequest, ctx: &FlowContext) -> Result<FlowOutcome> {
        let queries = ctx.store.list_actionable().await?;
        info!(count = queries.len(), "Actionable queries");

        let mut created = 0;
        let mut existing = 0;
        for query in &queries {
            let Some(operation) = Operation::for_state(query.query_state) else {
                continue;
            };
            let spec = WorkerJobSpec::new(
                &ctx.config.environment,
                operation.as_str(),
                &query.query_id,
            );

            match ctx.runner.create_job(&spec).await {
                Ok(true) => created += 1,
                Ok(false) => existing += 1,
                Err(e) => {
                    warn!(job = %spec.name, error = %e, "Scheduling failed");
                    return Err(e.after(created + existing));
                }
            }
        }

        Ok(FlowOutcome::Scheduled { created, existing })
    }
}
