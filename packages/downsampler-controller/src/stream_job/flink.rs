//! Flink REST adapter for [`ClusterJobDirectory`]

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{Artifact, ClusterJobDirectory, StreamJob};
use crate::config::FlinkConfig;
use crate::error::{ControllerError, Result};

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    jid: String,
    name: String,
    #[serde(rename = "start-time")]
    start_time: i64,
}

#[derive(Debug, Deserialize)]
struct JarsResponse {
    #[serde(default)]
    files: Vec<JarEntry>,
}

#[derive(Debug, Deserialize)]
struct JarEntry {
    id: String,
    name: String,
}

#[derive(Clone)]
pub struct FlinkRestClient {
    http: reqwest::Client,
    jars_url: String,
    jobs_url: String,
    job_delete_url: String,
}

impl FlinkRestClient {
    pub fn new(config: &FlinkConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            jars_url: config.jars_url.clone(),
            jobs_url: config.jobs_url.clone(),
            job_delete_url: config.job_delete_url.trim_end_matches('/').to_string(),
        })
    }

    /// Body of a successful response. The cluster sometimes reports failures
    /// with a 200 and an `error` payload.
    async fn checked_body(resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() || body.contains("error") {
            return Err(ControllerError::ClusterResponse {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn decode<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T> {
        serde_json::from_str(body).map_err(ControllerError::serialization)
    }
}

#[async_trait]
impl ClusterJobDirectory for FlinkRestClient {
    async fn list_running_jobs(&self) -> Result<Vec<StreamJob>> {
        let resp = self.http.get(&self.jobs_url).send().await?;
        let body = Self::checked_body(resp).await?;
        let parsed: JobsResponse = Self::decode(&body)?;

        debug!(count = parsed.jobs.len(), "Listed running jobs");
        Ok(parsed
            .jobs
            .into_iter()
            .map(|j| StreamJob::new(j.jid, j.name, j.start_time))
            .collect())
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/{}/cancel", self.job_delete_url, job_id);
        let resp = self.http.delete(url).send().await?;
        Self::checked_body(resp).await?;
        Ok(())
    }

    async fn submit(&self, artifact_id: &str, params: &str) -> Result<()> {
        let url = format!("{}{}/run", self.jars_url, artifact_id);
        let resp = self
            .http
            .post(url)
            .query(&[("program-args", params)])
            .send()
            .await?;
        let body = Self::checked_body(resp).await?;
        debug!(artifact_id, response = %body, "Submitted job");
        Ok(())
    }

    async fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        let resp = self.http.get(&self.jars_url).send().await?;
        let body = Self::checked_body(resp).await?;
        let parsed: JarsResponse = Self::decode(&body)?;

        Ok(parsed
            .files
            .into_iter()
            .map(|f| Artifact {
                id: f.id,
                name: f.name,
            })
            .collect())
    }
}
