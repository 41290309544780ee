//! Deploys an operator into a fresh namespace, stands up an indexer and a search head cluster,
//! then tears everything down again in reverse order.
use anyhow::{Context, Result};
use clap::Parser;
use lifecycle::{
    core::{ManagedResource, ResourceKind, Selector},
    runtime::{
        environment::{random_dns_name, Deployment},
        Config, Environment, EnvironmentConfig, FinalizerProtocol,
    },
    ControlPlane, InMemory, KubeControlPlane,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Run the indexer cluster lifecycle scenario")]
struct App {
    /// Operator image to deploy
    #[arg(long, default_value = lifecycle::runtime::environment::DEFAULT_OPERATOR_IMAGE)]
    operator: String,
    /// Splunk enterprise image used by the custom resources
    #[arg(long, default_value = lifecycle::runtime::environment::DEFAULT_SPLUNK_IMAGE)]
    splunk: String,
    /// Spark image handed to the operator
    #[arg(long, default_value = lifecycle::runtime::environment::DEFAULT_SPARK_IMAGE)]
    spark: String,
    /// Leave every created resource in place
    #[arg(long)]
    skip_teardown: bool,
    /// Enterprise license, enables the license master
    #[arg(long)]
    license_file: Option<PathBuf>,
    /// Seconds between two checks of a condition
    #[arg(long, default_value_t = 1)]
    poll_interval: u64,
    /// Seconds to wait for a condition before giving up
    #[arg(long, default_value_t = 300)]
    timeout: u64,
    /// Run against a simulated control plane instead of the current kube context
    #[arg(long)]
    in_memory: bool,
    /// Seconds the ready search head cluster must stay unchanged
    #[arg(long, default_value_t = 10)]
    stable_for: u64,
    /// Number of indexers
    #[arg(long, default_value_t = 3)]
    replicas: u32,
}

impl App {
    fn environment_config(&self) -> EnvironmentConfig {
        EnvironmentConfig {
            operator_image: self.operator.clone(),
            splunk_image: self.splunk.clone(),
            spark_image: self.spark.clone(),
            license_file_path: self.license_file.clone(),
            runtime: Config::default()
                .poll_interval(Duration::from_secs(self.poll_interval))
                .timeout(Duration::from_secs(self.timeout))
                .skip_teardown(self.skip_teardown),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let app = App::parse();

    if app.in_memory {
        let client = Arc::new(InMemory::new().with_simulated_controllers().with_lag(1));
        run(client, &app, true).await
    } else {
        let client = Arc::new(KubeControlPlane::try_default().await?);
        run(client, &app, false).await
    }
}

async fn run<C>(client: Arc<C>, app: &App, finalize_locally: bool) -> Result<()>
where
    C: ControlPlane + ?Sized + 'static,
{
    let mut env = Environment::new(client.clone(), &random_dns_name(5), app.environment_config());
    info!(namespace = env.namespace(), "initializing environment");
    let outcome = match env.initialize().await {
        Ok(()) => {
            // nothing runs the operator's finalizers without a cluster
            let operator = finalize_locally.then(|| spawn_finalizers(client, env.namespace().to_string()));
            let mut deployment = env.new_deployment(&random_dns_name(5));
            let outcome = scenario(&mut deployment, app).await;
            let teardown = deployment.teardown().await.context("deployment teardown");
            if let Some(operator) = operator {
                operator.abort();
            }
            outcome.and(teardown)
        }
        Err(err) => Err(err).context("environment initialization"),
    };
    env.destroy().await.context("environment teardown")?;
    outcome
}

async fn scenario<C>(deployment: &mut Deployment<C>, app: &App) -> Result<()>
where
    C: ControlPlane + ?Sized + 'static,
{
    let license_master = if app.license_file.is_some() {
        deployment.deploy_license_master("lm").await?;
        deployment.wait_ready(ResourceKind::LicenseMaster, "lm").await?;
        Some("lm")
    } else {
        None
    };

    info!(deployment = deployment.name(), replicas = app.replicas, "deploying indexer cluster");
    deployment
        .deploy_indexer_cluster("idx", license_master, app.replicas)
        .await?;
    deployment
        .deploy_search_head_cluster("shc", "idx", license_master)
        .await?;
    let idx = deployment.wait_ready(ResourceKind::IndexerCluster, "idx").await?;
    let shc = deployment.wait_ready(ResourceKind::SearchHeadCluster, "shc").await?;
    info!(idx = %idx.object_ref(), shc = %shc.object_ref(), "clusters ready");
    deployment
        .ensure_stable(ResourceKind::SearchHeadCluster, "shc", Duration::from_secs(app.stable_for))
        .await?;
    Ok(())
}

fn spawn_finalizers<C>(client: Arc<C>, namespace: String) -> JoinHandle<()>
where
    C: ControlPlane + ?Sized + 'static,
{
    tokio::spawn(async move {
        let protocol = FinalizerProtocol::with_defaults(client.clone());
        let kinds = [
            ResourceKind::Standalone,
            ResourceKind::LicenseMaster,
            ResourceKind::SearchHeadCluster,
            ResourceKind::IndexerCluster,
        ];
        loop {
            for kind in &kinds {
                let found = match client.list(kind, Some(&namespace), &Selector::default()).await {
                    Ok(found) => found,
                    Err(err) => {
                        warn!(%err, %kind, "listing failed");
                        continue;
                    }
                };
                for mut resource in found.into_iter().filter(ManagedResource::deletion_requested) {
                    if let Err(err) = protocol.check_deletion(&mut resource).await {
                        warn!(%err, "finalization failed, retrying");
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
}
