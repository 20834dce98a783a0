use downsampler_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("queryId not received for {operation}")]
    MissingQueryId { operation: String },

    #[error("Invalid job mode: {0} (expected all, simulation or actual)")]
    InvalidMode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Received no partition for topic {topic}, which is unusual")]
    NoPartitions { topic: String },

    #[error("No job artifact matching {marker:?} found, response: {response}")]
    ArtifactNotFound { marker: String, response: String },

    #[error("Cluster responded with HTTP {status}: {body}")]
    ClusterResponse { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Store error: {0}")]
    Store(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("{source} (after {completed} completed)")]
    PartialBatch {
        completed: usize,
        #[source]
        source: Box<ControllerError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ControllerError {
    pub fn missing_query_id(operation: impl Into<String>) -> Self {
        Self::MissingQueryId {
            operation: operation.into(),
        }
    }

    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Wrap `self` as the failure that stopped a batch after `completed` items.
    pub fn after(self, completed: usize) -> Self {
        Self::PartialBatch {
            completed,
            source: Box::new(self),
        }
    }

    /// Items a batch completed before failing; zero for non-batch errors.
    pub fn completed(&self) -> usize {
        match self {
            Self::PartialBatch { completed, .. } => *completed,
            _ => 0,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingQueryId { .. } | Self::InvalidMode(_) | Self::Config(_) => {
                ErrorCategory::Input
            }
            Self::NoPartitions { .. }
            | Self::ArtifactNotFound { .. }
            | Self::Serialization(_)
            | Self::InvalidStateTransition { .. } => ErrorCategory::Permanent,
            Self::PartialBatch { source, .. } => source.category(),
            _ => ErrorCategory::Dependency,
        }
    }
}

/// How the surrounding scheduler should treat a failed invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Bad arguments or configuration - fix the caller, never retry
    Input,
    /// Misconfiguration the cluster cannot recover from (e.g. unknown topic)
    Permanent,
    /// A collaborator failed - the next scheduled invocation retries
    Dependency,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Dependency => "dependency",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_are_classified() {
        assert_eq!(
            ControllerError::missing_query_id("deploy").category(),
            ErrorCategory::Input
        );
        assert_eq!(
            ControllerError::InvalidMode("sideways".into()).category(),
            ErrorCategory::Input
        );
        assert_eq!(
            ControllerError::config("EXPIRE_AFTER_MINUTE missing").category(),
            ErrorCategory::Input
        );
    }

    #[test]
    fn test_no_partitions_is_permanent() {
        let err = ControllerError::NoPartitions {
            topic: "omni-influx-metrics".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(err.to_string().contains("omni-influx-metrics"));
    }

    #[test]
    fn test_partial_batch_keeps_count_and_cause() {
        let err = ControllerError::ClusterResponse {
            status: 500,
            body: "boom".into(),
        }
        .after(2);

        assert_eq!(err.completed(), 2);
        assert_eq!(err.category(), ErrorCategory::Dependency);
        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("after 2 completed"));
    }

    #[test]
    fn test_store_errors_are_dependency_errors() {
        let err: ControllerError = StorageError::database("locked").into();
        assert_eq!(err.category(), ErrorCategory::Dependency);
        assert_eq!(err.completed(), 0);
    }

    #[test]
    fn test_error_category_as_str() {
        assert_eq!(ErrorCategory::Input.as_str(), "input");
        assert_eq!(ErrorCategory::Permanent.as_str(), "permanent");
        assert_eq!(ErrorCategory::Dependency.as_str(), "dependency");
    }
}
