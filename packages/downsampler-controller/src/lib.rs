/*
 * Downsampler Controller - downsampling query lifecycle
 *
 * Single-shot operations invoked once per process:
 * - Query state machine (preview and production tracks)
 * - Stream job coordination on the processing cluster (name-correlated)
 * - Replay offset windows for preview jobs
 * - Preview stack provisioning and worker scheduling
 *
 * Every mutating operation is safe to re-run.
 */

// Public modules
pub mod config;
pub mod error;
pub mod flows;
pub mod infra;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod lifecycle;
pub mod liveness;
pub mod offsets;
pub mod query;
pub mod stream_job;

// Re-exports
pub use config::{ControllerConfig, RunMode};
pub use error::{ControllerError, ErrorCategory, Result};
pub use flows::{
    execute, ControllerJob, ExpireSummary, FlowContext, FlowOutcome, JobRequest, Operation,
};
pub use infra::{InfraProvisioner, JobRunner, KubernetesApi, PreviewEndpoints, WorkerJobSpec};
#[cfg(feature = "kafka")]
pub use kafka::KafkaTopicMetadata;
pub use lifecycle::{QueryLifecycleStore, TransitionOutcome};
pub use liveness::wait_until_reachable;
pub use offsets::{OffsetMarker, OffsetWindowCalculator, PartitionOffsetWindow, TopicMetadata};
pub use query::QueryStateMachine;
pub use stream_job::{
    Artifact, ClusterJobDirectory, DeployOutcome, DeployTarget, FlinkRestClient, JobMode,
    StreamJob, StreamJobCoordinator,
};
