//! Stream jobs on the remote processing cluster
//!
//! A job is tied to a query only through its name:
//!
//! ```text
//! <mode>:<queryId>:<db>:<measurement>:<interval>
//! ```
//!
//! where mode is `downsample` (production) or `simulate` (preview). Jobs are
//! never persisted here; every decision starts from a fresh cluster listing.

pub mod coordinator;
pub mod flink;
pub mod name;
pub mod params;

pub use coordinator::{DeployOutcome, StreamJobCoordinator};
pub use flink::FlinkRestClient;
pub use name::{JobIndex, StreamJobName};
pub use params::{canonical_fields, DeployTarget};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};

/// Which class of stream job an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Both production and preview jobs
    All,
    /// Preview jobs
    Simulation,
    /// Production jobs
    Actual,
}

impl JobMode {
    /// Job-name prefix selecting this mode; empty matches every job.
    pub fn prefix(&self) -> &'static str {
        match self {
            JobMode::All => "",
            JobMode::Simulation => "simulate",
            JobMode::Actual => "downsample",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::All => "all",
            JobMode::Simulation => "simulation",
            JobMode::Actual => "actual",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(JobMode::All),
            "simulation" => Ok(JobMode::Simulation),
            "actual" => Ok(JobMode::Actual),
            _ => Err(ControllerError::InvalidMode(s.to_string())),
        }
    }

    /// Whether `job_name` belongs to `query_id` under this mode.
    ///
    /// Query ids are collision-resistant tokens, so containment is treated as
    /// an exact correlation.
    pub fn matches(&self, job_name: &str, query_id: &str) -> bool {
        job_name.starts_with(self.prefix()) && job_name.contains(query_id)
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A running job as listed by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamJob {
    pub id: String,
    pub name: String,
    pub start_time_ms: i64,
}

impl StreamJob {
    pub fn new(id: impl Into<String>, name: impl Into<String>, start_time_ms: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            start_time_ms,
        }
    }
}

/// An uploaded job package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub name: String,
}

/// Processing cluster port
#[async_trait]
pub trait ClusterJobDirectory: Send + Sync {
    async fn list_running_jobs(&self) -> Result<Vec<StreamJob>>;

    /// Cancel a job. Unknown ids are not an error.
    async fn cancel(&self, job_id: &str) -> Result<()>;

    async fn submit(&self, artifact_id: &str, params: &str) -> Result<()>;

    async fn list_artifacts(&self) -> Result<Vec<Artifact>>;
}
