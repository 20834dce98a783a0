//! In-process fakes for the cluster, topic metadata and orchestrator ports

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use downsampler_controller::{
    Artifact, ClusterJobDirectory, ControllerConfig, ControllerError, FlowContext,
    InfraProvisioner, JobRunner, OffsetMarker, PreviewEndpoints, QueryLifecycleStore, Result,
    RunMode, StreamJob, StreamJobCoordinator, TopicMetadata, WorkerJobSpec,
};
use downsampler_storage::{DownsamplingQuery, InMemoryQueryStore};

pub const JAR_ID: &str = "5f1e_flink-line-protocol-downsampler-1.4.jar";

pub fn config_vars() -> HashMap<String, String> {
    [
        ("ENVIRONMENT", "test"),
        ("NAMESPACE", "downsampling"),
        ("DB_TABLE_PREFIX", "test_"),
        ("EXPIRE_AFTER_MINUTE", "45"),
        ("SOURCE_CLUSTER", "kafka-source:9092"),
        ("SINK_CLUSTER", "kafka-sink:9092"),
        ("FLINK_JARS_URL", "http://flink:8081/jars/"),
        ("FLINK_JOBS_URL", "http://flink:8081/joboverview/running"),
        ("FLINK_JOB_DELETE_URL", "http://flink:8081/jobs"),
        ("POD_IMAGE", "registry/downsampler-controller:1.0"),
        ("AWS_ROLE", "downsampler"),
        ("LIVENESS_INTERVAL_SECS", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn config() -> Arc<ControllerConfig> {
    Arc::new(ControllerConfig::from_map(RunMode::Local, &config_vars()).unwrap())
}

/// Value following `flag` in a submitted parameter string
pub fn param<'a>(params: &'a str, flag: &str) -> Option<&'a str> {
    let mut words = params.split(' ');
    while let Some(word) = words.next() {
        if word == flag {
            return words.next();
        }
    }
    None
}

fn unavailable(what: &str) -> ControllerError {
    ControllerError::ClusterResponse {
        status: 503,
        body: format!("{} unavailable", what),
    }
}

/// Cluster that lists what was submitted and forgets what was cancelled.
#[derive(Default)]
pub struct FakeDirectory {
    pub jobs: Mutex<Vec<StreamJob>>,
    pub artifacts: Mutex<Vec<Artifact>>,
    pub submitted: Mutex<Vec<(String, String)>>,
    pub cancelled: Mutex<Vec<String>>,
    /// Cancels that succeed before every further cancel fails
    pub cancel_budget: Mutex<Option<usize>>,
    pub listing_down: Mutex<bool>,
    next_id: Mutex<u32>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        let directory = Self::default();
        directory.artifacts.lock().unwrap().extend([
            Artifact {
                id: "0a1b_other-job.jar".into(),
                name: "other-job.jar".into(),
            },
            Artifact {
                id: JAR_ID.into(),
                name: "flink-line-protocol-downsampler-1.4.jar".into(),
            },
        ]);
        directory
    }

    pub fn with_jobs(jobs: Vec<StreamJob>) -> Self {
        let directory = Self::new();
        *directory.jobs.lock().unwrap() = jobs;
        directory
    }

    pub fn running_names(&self) -> Vec<String> {
        self.jobs.lock().unwrap().iter().map(|j| j.name.clone()).collect()
    }

    pub fn submitted(&self) -> Vec<(String, String)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterJobDirectory for FakeDirectory {
    async fn list_running_jobs(&self) -> Result<Vec<StreamJob>> {
        if *self.listing_down.lock().unwrap() {
            return Err(unavailable("job listing"));
        }
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let mut budget = self.cancel_budget.lock().unwrap();
        if let Some(remaining) = budget.as_mut() {
            if *remaining == 0 {
                return Err(unavailable("cancel"));
            }
            *remaining -= 1;
        }
        self.jobs.lock().unwrap().retain(|j| j.id != job_id);
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn submit(&self, artifact_id: &str, params: &str) -> Result<()> {
        let name = param(params, "--jobName").unwrap_or_default().to_string();
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        self.jobs.lock().unwrap().push(StreamJob::new(
            format!("job-{}", next),
            name,
            Utc::now().timestamp_millis(),
        ));
        self.submitted
            .lock()
            .unwrap()
            .push((artifact_id.to_string(), params.to_string()));
        Ok(())
    }

    async fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        Ok(self.artifacts.lock().unwrap().clone())
    }
}

/// Topic bounds keyed by partition, identical for every topic name
#[derive(Default)]
pub struct FakeTopics {
    pub bounds: BTreeMap<i32, (i64, i64)>,
    pub requested: Mutex<Vec<String>>,
    pub offsets_down: Mutex<bool>,
}

impl FakeTopics {
    pub fn new(bounds: &[(i32, i64, i64)]) -> Self {
        Self {
            bounds: bounds.iter().map(|&(p, o, n)| (p, (o, n))).collect(),
            requested: Mutex::new(Vec::new()),
            offsets_down: Mutex::new(false),
        }
    }
}

#[async_trait]
impl TopicMetadata for FakeTopics {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        self.requested.lock().unwrap().push(topic.to_string());
        Ok(self.bounds.keys().copied().collect())
    }

    async fn offset_at(&self, _topic: &str, partition: i32, marker: OffsetMarker) -> Result<i64> {
        if *self.offsets_down.lock().unwrap() {
            return Err(unavailable("watermarks"));
        }
        let (oldest, newest) = self.bounds[&partition];
        Ok(match marker {
            OffsetMarker::Oldest => oldest,
            OffsetMarker::Newest => newest,
        })
    }
}

#[derive(Default)]
pub struct FakeInfra {
    pub provisioned: Mutex<Vec<String>>,
    /// Probes that fail before the preview database answers
    pub probe_failures: Mutex<u32>,
    pub probes: Mutex<u32>,
    /// (db, retention policy) per bootstrap call
    pub bootstrapped: Mutex<Vec<(String, String)>>,
    pub stale: Mutex<usize>,
    pub sweeps: Mutex<Vec<(Duration, DateTime<Utc>)>>,
}

#[async_trait]
impl InfraProvisioner for FakeInfra {
    async fn provision_preview(&self, query: &DownsamplingQuery) -> Result<PreviewEndpoints> {
        let stack_name = format!("downsamplr-preview-{}", query.query_id);
        self.provisioned.lock().unwrap().push(stack_name.clone());
        Ok(PreviewEndpoints {
            influxdb_url: format!("http://{}", stack_name),
            stack_name,
        })
    }

    async fn probe(&self, _endpoints: &PreviewEndpoints) -> Result<()> {
        *self.probes.lock().unwrap() += 1;
        let mut failures = self.probe_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(unavailable("influxdb"));
        }
        Ok(())
    }

    async fn bootstrap_database(
        &self,
        _endpoints: &PreviewEndpoints,
        db: &str,
        retention_policy: &str,
    ) -> Result<()> {
        self.bootstrapped
            .lock()
            .unwrap()
            .push((db.to_string(), retention_policy.to_string()));
        Ok(())
    }

    async fn remove_stale(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        self.sweeps.lock().unwrap().push((max_age, now));
        Ok(std::mem::take(&mut *self.stale.lock().unwrap()))
    }
}

#[derive(Default)]
pub struct FakeRunner {
    pub existing: Mutex<HashSet<String>>,
    pub requests: Mutex<Vec<WorkerJobSpec>>,
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn create_job(&self, spec: &WorkerJobSpec) -> Result<bool> {
        self.requests.lock().unwrap().push(spec.clone());
        Ok(self.existing.lock().unwrap().insert(spec.name.clone()))
    }
}

pub struct Harness {
    pub store: InMemoryQueryStore,
    pub directory: Arc<FakeDirectory>,
    pub topics: Arc<FakeTopics>,
    pub infra: Arc<FakeInfra>,
    pub runner: Arc<FakeRunner>,
    pub ctx: FlowContext,
}

impl Harness {
    pub fn new(queries: Vec<DownsamplingQuery>) -> Self {
        Self::with_directory(queries, FakeDirectory::new())
    }

    pub fn with_directory(queries: Vec<DownsamplingQuery>, directory: FakeDirectory) -> Self {
        Self::build(
            queries,
            directory,
            FakeTopics::new(&[(0, 0, 1000), (1, 200, 2000)]),
        )
    }

    pub fn with_topics(queries: Vec<DownsamplingQuery>, topics: FakeTopics) -> Self {
        Self::build(queries, FakeDirectory::new(), topics)
    }

    fn build(
        queries: Vec<DownsamplingQuery>,
        directory: FakeDirectory,
        topics: FakeTopics,
    ) -> Self {
        let config = config();
        let store = InMemoryQueryStore::with_queries(queries);
        let directory = Arc::new(directory);
        let topics = Arc::new(topics);
        let infra = Arc::new(FakeInfra::default());
        let runner = Arc::new(FakeRunner::default());

        let ctx = FlowContext {
            config: Arc::clone(&config),
            store: QueryLifecycleStore::new(Arc::new(store.clone())),
            jobs: Arc::new(StreamJobCoordinator::new(directory.clone(), config)),
            topics: topics.clone(),
            infra: infra.clone(),
            runner: runner.clone(),
        };

        Self {
            store,
            directory,
            topics,
            infra,
            runner,
            ctx,
        }
    }
}
