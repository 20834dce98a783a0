use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use downsampler_storage::DownsamplingQuery;
use tracing::{info, warn};

use super::name::{JobIndex, StreamJobName};
use super::params::{build_params, DeployTarget};
use super::{Artifact, ClusterJobDirectory, JobMode, StreamJob};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};

/// Substring identifying the downsampling job package
pub const ARTIFACT_MARKER: &str = "flink-line-protocol-downsampler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Submitted { job_name: String },
    /// A matching job was already running; nothing was submitted.
    AlreadyRunning,
}

/// Idempotent job operations keyed by query id and mode
pub struct StreamJobCoordinator {
    directory: Arc<dyn ClusterJobDirectory>,
    config: Arc<ControllerConfig>,
}

impl StreamJobCoordinator {
    pub fn new(directory: Arc<dyn ClusterJobDirectory>, config: Arc<ControllerConfig>) -> Self {
        Self { directory, config }
    }

    pub async fn has_active_job(&self, query_id: &str, mode: JobMode) -> Result<bool> {
        let index = JobIndex::new(self.directory.list_running_jobs().await?);
        Ok(index.has_active(query_id, mode))
    }

    pub async fn deploy(
        &self,
        query: &DownsamplingQuery,
        target: &DeployTarget,
    ) -> Result<DeployOutcome> {
        let mode = target.mode();
        if self.has_active_job(&query.query_id, mode).await? {
            info!(
                query_id = %query.query_id,
                mode = %mode,
                "Job already running, skipping submission"
            );
            return Ok(DeployOutcome::AlreadyRunning);
        }

        let artifact = self.resolve_artifact().await?;
        let params = build_params(&self.config, query, target)?;
        let job_name = StreamJobName::for_query(query, mode).to_string();

        self.directory.submit(&artifact.id, &params).await?;
        info!(
            query_id = %query.query_id,
            job_name = %job_name,
            artifact = %artifact.name,
            "Submitted stream job"
        );
        Ok(DeployOutcome::Submitted { job_name })
    }

    /// First uploaded artifact whose name carries [`ARTIFACT_MARKER`].
    pub async fn resolve_artifact(&self) -> Result<Artifact> {
        let artifacts = self.directory.list_artifacts().await?;
        let names: Vec<String> = artifacts.iter().map(|a| a.name.clone()).collect();

        artifacts
            .into_iter()
            .find(|a| a.name.contains(ARTIFACT_MARKER))
            .ok_or_else(|| ControllerError::ArtifactNotFound {
                marker: ARTIFACT_MARKER.to_string(),
                response: names.join(", "),
            })
    }

    /// Cancel every job of `query_id` under `mode`.
    pub async fn cancel_all(&self, query_id: &str, mode: JobMode) -> Result<usize> {
        let index = JobIndex::new(self.directory.list_running_jobs().await?);
        let matched = index.matching(query_id, mode);
        if matched.is_empty() {
            info!(query_id, mode = %mode, "No running jobs to cancel");
            return Ok(0);
        }
        self.cancel_each(matched).await
    }

    /// Cancel preview jobs that started more than `max_age` before `now`.
    pub async fn cancel_expired(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let jobs = self.directory.list_running_jobs().await?;
        let now_ms = now.timestamp_millis();
        let max_age_ms = max_age.num_milliseconds();
        let preview_prefix = format!("{}:", JobMode::Simulation.prefix());

        let expired: Vec<&StreamJob> = jobs
            .iter()
            .filter(|job| job.name.starts_with(&preview_prefix))
            .filter(|job| now_ms - job.start_time_ms > max_age_ms)
            .collect();
        self.cancel_each(expired).await
    }

    async fn cancel_each(&self, jobs: Vec<&StreamJob>) -> Result<usize> {
        let mut count = 0;
        for job in jobs {
            if let Err(e) = self.directory.cancel(&job.id).await {
                warn!(job_id = %job.id, job_name = %job.name, error = %e, "Cancel failed");
                return Err(e.after(count));
            }
            info!(job_id = %job.id, job_name = %job.name, "Cancelled job");
            count += 1;
        }
        Ok(count)
    }
}
