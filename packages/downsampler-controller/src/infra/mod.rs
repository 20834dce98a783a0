//! Infrastructure ports
//!
//! Preview stacks and worker jobs live on the container orchestrator. Flows
//! only see these traits; [`kubernetes::KubernetesApi`] implements both.

pub mod kubernetes;

pub use kubernetes::KubernetesApi;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use downsampler_storage::DownsamplingQuery;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Label key/value carried by every preview resource
pub const PREVIEW_LABEL: (&str, &str) = ("purpose", "downsamplr-preview");

/// Retention policy the preview job writes into
pub const PREVIEW_RETENTION_POLICY: &str = "downsample";

pub fn preview_stack_name(query_id: &str) -> String {
    format!("{}-{}", PREVIEW_LABEL.1, query_id)
}

/// Where a provisioned preview stack can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEndpoints {
    pub stack_name: String,
    /// Base URL of the preview time-series database, without port
    pub influxdb_url: String,
}

#[async_trait]
pub trait InfraProvisioner: Send + Sync {
    /// Create the preview stack for `query`. Existing resources are kept.
    async fn provision_preview(&self, query: &DownsamplingQuery) -> Result<PreviewEndpoints>;

    /// Succeeds once the preview database answers.
    async fn probe(&self, endpoints: &PreviewEndpoints) -> Result<()>;

    /// Create `db` with `retention_policy` as its default policy. Re-running is harmless.
    async fn bootstrap_database(
        &self,
        endpoints: &PreviewEndpoints,
        db: &str,
        retention_policy: &str,
    ) -> Result<()>;

    /// Delete preview resources created more than `max_age` before `now`.
    async fn remove_stale(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize>;
}

/// A one-shot controller invocation to schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerJobSpec {
    pub name: String,
    pub operation: String,
    pub query_id: String,
    pub args: Vec<String>,
}

impl WorkerJobSpec {
    /// Name is deterministic so the scheduler rejects duplicates.
    pub fn new(environment: &str, operation: &str, query_id: &str) -> Self {
        Self {
            name: format!(
                "downsample-controller-{}-{}-{}",
                environment, operation, query_id
            ),
            operation: operation.to_string(),
            query_id: query_id.to_string(),
            args: vec![
                "in-cluster".to_string(),
                operation.to_string(),
                query_id.to_string(),
            ],
        }
    }
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    /// `Ok(false)` when a job with the same name already exists.
    async fn create_job(&self, spec: &WorkerJobSpec) -> Result<bool>;
}
