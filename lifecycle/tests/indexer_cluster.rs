//! End-to-end lifecycle of custom resources against the in-memory control plane
use lifecycle::{
    core::{ManagedResource, ObjectRef, ResourceKind, Selector},
    runtime::{
        environment::random_dns_name, reaper::PART_OF_LABEL, Config, Environment, EnvironmentConfig,
        FinalizerProtocol, Orchestrator, DELETE_PVC_FINALIZER,
    },
    ControlPlane, InMemory,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

fn claim(name: &str, namespace: &str, part_of: &str) -> ManagedResource {
    ManagedResource::new(ResourceKind::PersistentVolumeClaim, name)
        .within(namespace)
        .with_labels([(PART_OF_LABEL, part_of)])
}

/// Releases finalizers of every terminating custom resource in `namespace`, like the operator would
fn spawn_operator(client: Arc<InMemory>, namespace: String) -> JoinHandle<()> {
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
                let Ok(found) = client.list(kind, Some(&namespace), &Selector::default()).await else {
                    continue;
                };
                for mut resource in found.into_iter().filter(ManagedResource::deletion_requested) {
                    if let Err(err) = protocol.check_deletion(&mut resource).await {
                        tracing::warn!(%err, "finalization failed, retrying");
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
}

#[tokio::test(start_paused = true)]
async fn indexer_cluster_is_finalized_and_torn_down() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = Arc::new(InMemory::new());
    let mut orchestrator = Orchestrator::new(client.clone(), Config::default());

    let idx = ManagedResource::new(ResourceKind::IndexerCluster, "idx")
        .within("ns-e2e")
        .finalizer(DELETE_PVC_FINALIZER);
    let created = orchestrator.create(&idx).await?;
    assert_eq!(orchestrator.cleanup_len(), 1);
    client.insert(claim("pvc-etc-splunk-idx-indexer-0", "ns-e2e", "splunk-idx-indexer"));
    client.insert(claim("pvc-var-splunk-idx-indexer-0", "ns-e2e", "splunk-idx-indexer"));

    client.delete(&created.object_ref()).await?;
    let mut terminating = client.get(&created.object_ref()).await?;
    assert!(terminating.deletion_requested());
    assert!(terminating.finalizers().contains(DELETE_PVC_FINALIZER));

    let protocol = FinalizerProtocol::with_defaults(client.clone());
    assert!(protocol.check_deletion(&mut terminating).await?);
    assert!(terminating.finalizers().is_empty());
    assert_eq!(client.count(&ResourceKind::PersistentVolumeClaim), 0);
    let claims_deleted = client
        .deletions()
        .iter()
        .filter(|o| o.kind == ResourceKind::PersistentVolumeClaim)
        .count();
    assert_eq!(claims_deleted, 2);

    orchestrator.teardown_all().await?;
    assert_eq!(orchestrator.cleanup_len(), 0);
    assert!(!client.contains(&created.object_ref()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn environment_deployment_round_trip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = Arc::new(InMemory::new().with_simulated_controllers().with_lag(2));
    let config = EnvironmentConfig {
        runtime: Config::default().timeout(Duration::from_secs(60)),
        ..EnvironmentConfig::default()
    };
    let mut env = Environment::new(client.clone(), &random_dns_name(5), config);
    env.initialize().await?;
    let namespace = env.namespace().to_string();
    let operator = spawn_operator(client.clone(), namespace.clone());

    let mut deployment = env.new_deployment(&random_dns_name(5));
    deployment.deploy_indexer_cluster("idx", None, 3).await?;
    deployment.deploy_search_head_cluster("shc", "idx", None).await?;
    deployment.wait_ready(ResourceKind::SearchHeadCluster, "shc").await?;
    for ordinal in 0..3 {
        client.insert(claim(&format!("pvc-var-idx-{ordinal}"), &namespace, "splunk-idx-indexer"));
    }
    client.insert(claim("pvc-var-shc-0", &namespace, "splunk-shc-search-head"));

    deployment.teardown().await?;
    operator.abort();
    let idx = ObjectRef::new(ResourceKind::IndexerCluster, "idx").within(&namespace);
    assert!(client.get(&idx).await.unwrap_err().is_not_found());
    let deleted = client.deletions();
    let custom: Vec<_> = deleted
        .iter()
        .filter(|o| o.kind.is_enterprise())
        .map(|o| o.name.as_str())
        .collect();
    assert_eq!(custom, ["shc", "idx"]);
    let claims = deleted
        .iter()
        .filter(|o| o.kind == ResourceKind::PersistentVolumeClaim)
        .count();
    assert_eq!(claims, 4);

    env.destroy().await?;
    let ns = ObjectRef::new(ResourceKind::Namespace, &namespace);
    assert_eq!(client.deletions().last(), Some(&ns));
    Ok(())
}
