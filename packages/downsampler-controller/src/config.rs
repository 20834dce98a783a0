//! Controller configuration
//!
//! Built once at startup from the process environment and handed to every
//! component by `Arc`. Tests use [`ControllerConfig::from_lookup`] with a map.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use downsampler_storage::DownsamplingQuery;
use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::flows::Operation;

/// Where the controller runs; decides how orchestration credentials are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Local,
    InCluster,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Local => "local",
            RunMode::InCluster => "in-cluster",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap address of the cluster the raw metrics topics live on
    pub source: String,
    /// Bootstrap address of the cluster downsampled output is written to
    pub sink: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlinkConfig {
    pub jars_url: String,
    pub jobs_url: String,
    pub job_delete_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub image: String,
    pub aws_role: String,
    /// Directory holding the JSON manifest templates
    pub template_dir: PathBuf,
    /// Orchestration API endpoint used in local mode
    pub kube_api_url: String,
    /// Preview time-series endpoint, `{stack}` is replaced by the stack name
    pub preview_influxdb_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub environment: String,
    pub namespace: String,
    pub db_table_prefix: String,
    /// Preview TTL and maximum age of preview jobs/resources, in minutes
    pub expire_after_minutes: f64,
    pub run_mode: RunMode,
    pub store_path: PathBuf,
    pub liveness_interval: Duration,
    pub http_timeout: Duration,
    pub deployment: DeploymentConfig,
    pub kafka: KafkaConfig,
    pub flink: FlinkConfig,
}

impl ControllerConfig {
    /// Read configuration from the process environment.
    pub fn from_env(run_mode: RunMode) -> Result<Self> {
        Self::from_lookup(run_mode, |key| std::env::var(key).ok())
    }

    pub fn from_map(run_mode: RunMode, vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(run_mode, |key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(run_mode: RunMode, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let get_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let expire_raw = get("EXPIRE_AFTER_MINUTE");
        let expire_after_minutes: f64 = expire_raw.trim().parse().map_err(|_| {
            ControllerError::config(format!(
                "EXPIRE_AFTER_MINUTE must be a number of minutes, got {:?}",
                expire_raw
            ))
        })?;
        if !expire_after_minutes.is_finite() || expire_after_minutes <= 0.0 {
            return Err(ControllerError::config(format!(
                "EXPIRE_AFTER_MINUTE must be positive, got {}",
                expire_after_minutes
            )));
        }

        Ok(Self {
            environment: get("ENVIRONMENT"),
            namespace: get("NAMESPACE"),
            db_table_prefix: get("DB_TABLE_PREFIX"),
            expire_after_minutes,
            run_mode,
            store_path: PathBuf::from(get_or("STORE_PATH", "downsampling.db")),
            liveness_interval: Duration::from_secs(parse_secs(
                "LIVENESS_INTERVAL_SECS",
                &get_or("LIVENESS_INTERVAL_SECS", "5"),
            )?),
            http_timeout: Duration::from_secs(parse_secs(
                "HTTP_TIMEOUT_SECS",
                &get_or("HTTP_TIMEOUT_SECS", "30"),
            )?),
            deployment: DeploymentConfig {
                image: get("POD_IMAGE"),
                aws_role: get("AWS_ROLE"),
                template_dir: PathBuf::from(get_or("PREVIEW_TEMPLATE_DIR", "templates")),
                kube_api_url: get_or("KUBE_API_URL", "http://127.0.0.1:8001"),
                preview_influxdb_url: get_or("PREVIEW_INFLUXDB_URL", "http://{stack}"),
            },
            kafka: KafkaConfig {
                source: get("SOURCE_CLUSTER"),
                sink: get("SINK_CLUSTER"),
            },
            flink: FlinkConfig {
                jars_url: get("FLINK_JARS_URL"),
                jobs_url: get("FLINK_JOBS_URL"),
                job_delete_url: get("FLINK_JOB_DELETE_URL"),
            },
        })
    }

    /// Settings `operation` cannot run without, paired with their values.
    pub fn required_settings(&self, operation: Operation) -> Vec<(&'static str, &str)> {
        let mut settings = vec![
            ("ENVIRONMENT", self.environment.as_str()),
            ("NAMESPACE", self.namespace.as_str()),
        ];
        if operation.uses_processing_cluster() {
            settings.push(("FLINK_JOBS_URL", self.flink.jobs_url.as_str()));
            settings.push(("FLINK_JOB_DELETE_URL", self.flink.job_delete_url.as_str()));
        }
        match operation {
            Operation::Coordinate => {
                settings.push(("POD_IMAGE", self.deployment.image.as_str()));
                settings.push(("AWS_ROLE", self.deployment.aws_role.as_str()));
            }
            Operation::Simulate | Operation::Deploy => {
                settings.push(("FLINK_JARS_URL", self.flink.jars_url.as_str()));
                settings.push(("SOURCE_CLUSTER", self.kafka.source.as_str()));
                settings.push(("SINK_CLUSTER", self.kafka.sink.as_str()));
            }
            Operation::Delete | Operation::Expire => {}
        }
        settings
    }

    /// Fail fast when a value a given collaborator needs is empty.
    pub fn require(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let missing: Vec<&str> = pairs
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn expire_after(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.expire_after_minutes * 60_000.0) as i64)
    }

    pub fn source_topic(&self, query: &DownsamplingQuery) -> String {
        format!("{}-influx-metrics", query.db.to_lowercase())
    }

    pub fn sink_topic(&self, query: &DownsamplingQuery) -> String {
        format!("{}-downsampling-influx-metrics", query.db.to_lowercase())
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| {
        ControllerError::config(format!("{} must be whole seconds, got {:?}", key, raw))
    })
}
