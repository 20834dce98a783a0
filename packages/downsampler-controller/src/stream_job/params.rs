//! Job submission parameters
//!
//! The job entry point takes a single argument string. The job configuration
//! travels inside it as base64-encoded JSON.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use downsampler_storage::{AggregationField, DownsamplingQuery};
use serde_json::Value;

use super::name::StreamJobName;
use super::JobMode;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::infra::PREVIEW_RETENTION_POLICY;
use crate::offsets::{encode_offsets, PartitionOffsetWindow};

pub const CANONICAL_FUNCTION: &str = "metricsAGG";

/// Key the job reads its aggregation list from
pub const FIELD_LIST_KEY: &str = "listFieldFunc";

/// Where a job's output goes
#[derive(Debug, Clone, PartialEq)]
pub enum DeployTarget {
    /// Sink topic on the production cluster
    Production,
    /// A throwaway time-series database, replaying from `offsets`
    Preview {
        influxdb_base_url: String,
        offsets: Vec<PartitionOffsetWindow>,
    },
}

impl DeployTarget {
    pub fn mode(&self) -> JobMode {
        match self {
            DeployTarget::Production => JobMode::Actual,
            DeployTarget::Preview { .. } => JobMode::Simulation,
        }
    }
}

/// One `metricsAGG` aggregation per distinct field name, sorted by field.
pub fn canonical_fields(fields: &[AggregationField]) -> Vec<AggregationField> {
    fields
        .iter()
        .map(|f| f.field.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|field| {
            AggregationField::new(
                format!("{}_{}", CANONICAL_FUNCTION, field),
                field,
                CANONICAL_FUNCTION,
            )
        })
        .collect()
}

/// The query document as the job reads it, aggregations canonicalised.
pub fn job_config(query: &DownsamplingQuery) -> Result<Value> {
    let mut doc = serde_json::to_value(query).map_err(ControllerError::serialization)?;
    let fields =
        serde_json::to_value(canonical_fields(&query.fields)).map_err(ControllerError::serialization)?;

    let Value::Object(map) = &mut doc else {
        return Err(ControllerError::serialization("query did not serialize to an object"));
    };
    map.remove("fields");
    map.insert(FIELD_LIST_KEY.to_string(), fields);
    Ok(doc)
}

pub fn encoded_job_config(query: &DownsamplingQuery) -> Result<String> {
    let json = serde_json::to_string(&job_config(query)?).map_err(ControllerError::serialization)?;
    Ok(BASE64.encode(json))
}

/// Write endpoint of the preview database for `query`.
pub fn preview_write_url(base_url: &str, query: &DownsamplingQuery) -> String {
    format!(
        "{}:80/write?db={}&rp={}&precision=us",
        base_url.trim_end_matches('/'),
        query.db,
        PREVIEW_RETENTION_POLICY
    )
}

/// Full argument string for submitting `query` to `target`.
pub fn build_params(
    config: &ControllerConfig,
    query: &DownsamplingQuery,
    target: &DeployTarget,
) -> Result<String> {
    let job_name = StreamJobName::for_query(query, target.mode());
    let mut args = vec![
        ("--jobConfig", encoded_job_config(query)?),
        ("--sourceTopic", config.source_topic(query)),
        ("--sourceCluster", config.kafka.source.clone()),
    ];

    match target {
        DeployTarget::Production => {
            args.push(("--consumerGroupId", format!("downsample-{}", query.query_id)));
            args.push(("--sinkCluster", config.kafka.sink.clone()));
            args.push(("--sinkTopic", config.sink_topic(query)));
            args.push(("--jobName", job_name.to_string()));
        }
        DeployTarget::Preview {
            influxdb_base_url,
            offsets,
        } => {
            args.push((
                "--consumerGroupId",
                format!("downsample-simulation-{}", query.query_id),
            ));
            args.push((
                "--influxdbUrl",
                BASE64.encode(preview_write_url(influxdb_base_url, query)),
            ));
            args.push(("--previewMode", "true".to_string()));
            args.push(("--jobName", job_name.to_string()));
            args.push(("--topicOffsets", encode_offsets(offsets)));
        }
    }

    Ok(args
        .into_iter()
        .map(|(flag, value)| format!("{} {}", flag, value))
        .collect::<Vec<_>>()
        .join(" "))
}
