//! Kubernetes REST adapter
//!
//! Manifests are JSON templates with `{{placeholder}}` slots, loaded once
//! from the configured template directory when the client is built.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use downsampler_storage::DownsamplingQuery;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    preview_stack_name, InfraProvisioner, JobRunner, PreviewEndpoints, WorkerJobSpec,
    PREVIEW_LABEL,
};
use crate::config::{ControllerConfig, RunMode};
use crate::error::{ControllerError, Result};

const IN_CLUSTER_URL: &str = "https://kubernetes.default.svc";
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

pub const DEPLOYMENT_TEMPLATE: &str = "simulation-deployment.json";
pub const SERVICE_TEMPLATE: &str = "simulation-service.json";
pub const INGRESS_TEMPLATE: &str = "simulation-ingress.json";
pub const CONTROLLER_JOB_TEMPLATE: &str = "controller-job.json";

const TEMPLATES: [&str; 4] = [
    DEPLOYMENT_TEMPLATE,
    SERVICE_TEMPLATE,
    INGRESS_TEMPLATE,
    CONTROLLER_JOB_TEMPLATE,
];

/// Preview resource kinds in provisioning order; stale removal uses the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewResource {
    Deployment,
    Service,
    Ingress,
}

impl PreviewResource {
    pub const ALL: [PreviewResource; 3] = [
        PreviewResource::Deployment,
        PreviewResource::Service,
        PreviewResource::Ingress,
    ];

    pub fn template(&self) -> &'static str {
        match self {
            PreviewResource::Deployment => DEPLOYMENT_TEMPLATE,
            PreviewResource::Service => SERVICE_TEMPLATE,
            PreviewResource::Ingress => INGRESS_TEMPLATE,
        }
    }

    pub fn collection_path(&self, namespace: &str) -> String {
        match self {
            PreviewResource::Deployment => {
                format!("/apis/apps/v1/namespaces/{}/deployments", namespace)
            }
            PreviewResource::Service => format!("/api/v1/namespaces/{}/services", namespace),
            PreviewResource::Ingress => format!(
                "/apis/networking.k8s.io/v1/namespaces/{}/ingresses",
                namespace
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewResource::Deployment => "deployment",
            PreviewResource::Service => "service",
            PreviewResource::Ingress => "ingress",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    items: Vec<ResourceItem>,
}

#[derive(Debug, Deserialize)]
struct ResourceItem {
    metadata: ResourceMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceMetadata {
    name: String,
    creation_timestamp: Option<DateTime<Utc>>,
}

/// Fill `{{key}}` slots in `template`.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

/// `CREATE DATABASE` statement making `retention_policy` the default policy of `db`.
pub fn create_database_statement(db: &str, retention_policy: &str) -> String {
    format!(
        "CREATE DATABASE \"{}\" WITH DURATION 0s REPLICATION 1 SHARD DURATION 0s NAME \"{}\"",
        db, retention_policy
    )
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    error: Option<String>,
}

impl QueryResponse {
    fn first_error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.results.iter().find_map(|r| r.error.as_deref()))
    }
}

fn load_templates(dir: &Path) -> Result<HashMap<&'static str, String>> {
    TEMPLATES
        .iter()
        .map(|&name| {
            let path = dir.join(name);
            let text = std::fs::read_to_string(&path).map_err(|e| {
                ControllerError::config(format!("template {}: {}", path.display(), e))
            })?;
            Ok((name, text))
        })
        .collect()
}

/// Names in a list response created more than `max_age` before `now`.
fn stale_names(list: ResourceList, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
    list.items
        .into_iter()
        .filter(|item| match item.metadata.creation_timestamp {
            Some(created) => now - created > max_age,
            None => false,
        })
        .map(|item| item.metadata.name)
        .collect()
}

pub struct KubernetesApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    namespace: String,
    environment: String,
    image: String,
    aws_role: String,
    templates: HashMap<&'static str, String>,
    influxdb_url_pattern: String,
}

impl KubernetesApi {
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.http_timeout);
        let (base_url, token) = match config.run_mode {
            RunMode::InCluster => {
                let dir = Path::new(SERVICE_ACCOUNT_DIR);
                let token = std::fs::read_to_string(dir.join("token"))?;
                let ca = std::fs::read(dir.join("ca.crt"))?;
                builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&ca)?);
                (IN_CLUSTER_URL.to_string(), Some(token.trim().to_string()))
            }
            RunMode::Local => (
                config.deployment.kube_api_url.trim_end_matches('/').to_string(),
                None,
            ),
        };

        Ok(Self {
            http: builder.build()?,
            base_url,
            token,
            namespace: config.namespace.clone(),
            environment: config.environment.clone(),
            image: config.deployment.image.clone(),
            aws_role: config.deployment.aws_role.clone(),
            templates: load_templates(&config.deployment.template_dir)?,
            influxdb_url_pattern: config.deployment.preview_influxdb_url.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn manifest(&self, template: &str, vars: &[(&str, &str)]) -> Result<Value> {
        let text = self
            .templates
            .get(template)
            .ok_or_else(|| ControllerError::config(format!("unknown template {}", template)))?;
        serde_json::from_str(&render_template(text, vars))
            .map_err(|e| ControllerError::serialization(format!("{}: {}", template, e)))
    }

    /// POST a manifest; `Ok(false)` when the resource already exists.
    async fn create(&self, path: &str, manifest: &Value) -> Result<bool> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(manifest)
            .send()
            .await?;
        match resp.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(ControllerError::ClusterResponse {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn list_labelled(&self, path: &str) -> Result<ResourceList> {
        let selector = format!("{}={}", PREVIEW_LABEL.0, PREVIEW_LABEL.1);
        let resp = self
            .request(reqwest::Method::GET, path)
            .query(&[("labelSelector", selector.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ControllerError::ClusterResponse {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self.request(reqwest::Method::DELETE, path).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(ControllerError::ClusterResponse {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    fn influxdb_url(&self, stack_name: &str) -> String {
        self.influxdb_url_pattern.replace("{stack}", stack_name)
    }
}

#[async_trait]
impl InfraProvisioner for KubernetesApi {
    async fn provision_preview(&self, query: &DownsamplingQuery) -> Result<PreviewEndpoints> {
        let stack_name = preview_stack_name(&query.query_id);
        let vars = [
            ("name", stack_name.as_str()),
            ("namespace", self.namespace.as_str()),
            ("queryId", query.query_id.as_str()),
            ("environment", self.environment.as_str()),
            ("labelKey", PREVIEW_LABEL.0),
            ("labelValue", PREVIEW_LABEL.1),
        ];

        for resource in PreviewResource::ALL {
            let manifest = self.manifest(resource.template(), &vars)?;
            let created = self
                .create(&resource.collection_path(&self.namespace), &manifest)
                .await?;
            info!(
                stack = %stack_name,
                kind = resource.as_str(),
                created,
                "Preview resource provisioned"
            );
        }

        Ok(PreviewEndpoints {
            influxdb_url: self.influxdb_url(&stack_name),
            stack_name,
        })
    }

    async fn probe(&self, endpoints: &PreviewEndpoints) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}:80/ping", endpoints.influxdb_url))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ControllerError::ClusterResponse {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn bootstrap_database(
        &self,
        endpoints: &PreviewEndpoints,
        db: &str,
        retention_policy: &str,
    ) -> Result<()> {
        let statement = create_database_statement(db, retention_policy);
        let resp = self
            .http
            .post(format!("{}:80/query", endpoints.influxdb_url))
            .query(&[("q", statement.as_str())])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ControllerError::ClusterResponse {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: QueryResponse = serde_json::from_str(&body).unwrap_or_default();
        if let Some(error) = parsed.first_error() {
            return Err(ControllerError::ClusterResponse {
                status: status.as_u16(),
                body: error.to_string(),
            });
        }
        info!(db, retention_policy, stack = %endpoints.stack_name, "Preview database ready");
        Ok(())
    }

    async fn remove_stale(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut count = 0;
        for resource in PreviewResource::ALL {
            let path = resource.collection_path(&self.namespace);
            let list = self.list_labelled(&path).await.map_err(|e| e.after(count))?;
            for name in stale_names(list, max_age, now) {
                if let Err(e) = self.delete(&format!("{}/{}", path, name)).await {
                    warn!(kind = resource.as_str(), name = %name, error = %e, "Delete failed");
                    return Err(e.after(count));
                }
                info!(kind = resource.as_str(), name = %name, "Removed stale preview resource");
                count += 1;
            }
        }
        debug!(count, "Stale preview sweep finished");
        Ok(count)
    }
}

#[async_trait]
impl JobRunner for KubernetesApi {
    async fn create_job(&self, spec: &WorkerJobSpec) -> Result<bool> {
        let args = serde_json::to_string(&spec.args).map_err(ControllerError::serialization)?;
        let manifest = self.manifest(
            CONTROLLER_JOB_TEMPLATE,
            &[
                ("name", spec.name.as_str()),
                ("namespace", self.namespace.as_str()),
                ("environment", self.environment.as_str()),
                ("operation", spec.operation.as_str()),
                ("queryId", spec.query_id.as_str()),
                ("image", self.image.as_str()),
                ("awsRole", self.aws_role.as_str()),
                ("args", args.as_str()),
            ],
        )?;

        let path = format!("/apis/batch/v1/namespaces/{}/jobs", self.namespace);
        let created = self.create(&path, &manifest).await?;
        if created {
            info!(job = %spec.name, "Scheduled controller job");
        } else {
            info!(job = %spec.name, "Controller job already exists");
        }
        Ok(created)
    }
}
