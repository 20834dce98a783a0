/*
 * downsampler-controller <mode> <operation> [queryId]
 *
 * Runs exactly one flow and exits. Scheduling and retries come from
 * re-invoking the process.
 */

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use downsampler_controller::stream_job::ClusterJobDirectory;
use downsampler_controller::{
    execute, wait_until_reachable, ControllerConfig, ControllerError, FlinkRestClient,
    FlowContext, FlowOutcome, JobRequest, KafkaTopicMetadata, KubernetesApi, Operation,
    QueryLifecycleStore, RunMode, StreamJobCoordinator,
};
use downsampler_storage::SqliteQueryStore;

#[derive(Parser, Debug)]
#[command(name = "downsampler-controller")]
#[command(about = "Drive downsampling queries through their lifecycle", long_about = None)]
struct Cli {
    /// Where the controller runs
    #[arg(value_enum)]
    mode: RunMode,

    /// Flow to run
    #[arg(value_enum)]
    operation: Operation,

    /// Target query, required for simulate, deploy and delete
    query_id: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let span = info_span!(
        "controller",
        operation = %cli.operation,
        query_id = cli.query_id.as_deref().unwrap_or(""),
        run_id = %Uuid::new_v4(),
    );

    match run(cli).instrument(span.clone()).await {
        Ok(outcome) => {
            let _entered = span.enter();
            info!(outcome = ?outcome, "Controller run complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _entered = span.enter();
            let category = e
                .downcast_ref::<ControllerError>()
                .map(|ce| ce.category().as_str())
                .unwrap_or("dependency");
            let message = format!("{:#}", e);
            error!(category, error = %message, "Controller run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<FlowOutcome> {
    let request = JobRequest::new(cli.operation, cli.query_id);
    if request.operation.requires_query_id() {
        request.require_query_id()?;
    }

    let config = Arc::new(ControllerConfig::from_env(cli.mode)?);
    config.require(&config.required_settings(request.operation))?;
    info!(
        environment = %config.environment,
        namespace = %config.namespace,
        mode = %config.run_mode,
        "Configuration loaded"
    );

    let sqlite = SqliteQueryStore::open(&config.store_path, &config.db_table_prefix)
        .with_context(|| format!("opening query store {}", config.store_path.display()))?;
    let store = QueryLifecycleStore::new(Arc::new(sqlite));
    wait_until_reachable("query store", config.liveness_interval, || store.ping()).await;

    let flink = Arc::new(FlinkRestClient::new(&config.flink, config.http_timeout)?);
    if request.operation.uses_processing_cluster() {
        wait_until_reachable("processing cluster", config.liveness_interval, || {
            let flink = Arc::clone(&flink);
            async move { flink.list_running_jobs().await.map(|_| ()) }
        })
        .await;
    }

    let kube = Arc::new(KubernetesApi::new(&config).context("building orchestrator client")?);
    let topics = Arc::new(KafkaTopicMetadata::new(
        &config.kafka.source,
        config.http_timeout,
    )?);

    let ctx = FlowContext {
        jobs: Arc::new(StreamJobCoordinator::new(flink, Arc::clone(&config))),
        config,
        store,
        topics,
        infra: kube.clone(),
        runner: kube,
    };

    Ok(execute(&request, &ctx).await?)
}
