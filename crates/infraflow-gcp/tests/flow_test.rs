//! End-to-end runs of the GCP task graph against the in-memory project

use async_trait::async_trait;
use infraflow_cloud::{
    BoxError, CloudError, Executor, FlowState, FlowStatePersister, ResourceKey, ResourceStatus,
    RetryConfig,
};
use infraflow_gcp::fake::InMemoryCompute;
use infraflow_gcp::{GcpContext, InfrastructureConfig, build_task_graph};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CountingPersister(Mutex<usize>);

#[async_trait]
impl FlowStatePersister for CountingPersister {
    async fn persist(&self, _state: &FlowState) -> Result<(), BoxError> {
        *self.0.lock().unwrap() += 1;
        Ok(())
    }
}

fn context(compute: Arc<InMemoryCompute>) -> GcpContext {
    let config: InfrastructureConfig = serde_json::from_value(serde_json::json!({
        "networks": {
            "workers": "10.250.0.0/16",
            "internal": "10.251.0.0/16",
            "cloudNAT": {"minPortsPerVM": 1024}
        }
    }))
    .unwrap();
    GcpContext::new(compute, "europe-west1", "shoot--dev--app", config)
        .with_pods_cidr(Some("100.96.0.0/11".to_string()))
        .with_retry(RetryConfig::none())
}

#[tokio::test]
async fn test_fresh_cluster_apply_then_idempotent_rerun() {
    let compute = Arc::new(InMemoryCompute::default());
    let ctx = context(compute.clone());
    let graph = build_task_graph(&ctx).unwrap();
    let persister = CountingPersister::default();
    let mut state = FlowState::new();
    let executor = Executor::new(&ctx, &persister);

    let report = executor.apply(&graph, &mut state).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.changed.len(), 8);
    assert_eq!(
        compute.mutations().await,
        vec![
            "insert network shoot--dev--app",
            "insert subnetwork shoot--dev--app-nodes",
            "insert subnetwork shoot--dev--app-internal",
            "insert router shoot--dev--app-cloud-router",
            "patch router shoot--dev--app-cloud-router",
            "insert firewall shoot--dev--app-allow-internal-access",
            "insert firewall shoot--dev--app-allow-external-access",
            "insert firewall shoot--dev--app-allow-health-checks",
        ]
    );
    let keys: Vec<ResourceKey> = graph.keys().cloned().collect();
    assert!(state.all_in(&keys, ResourceStatus::Created));

    let mutations = compute.mutation_count().await;
    let report = executor.apply(&graph, &mut state).await.unwrap();
    assert!(!report.has_changes());
    assert_eq!(compute.mutation_count().await, mutations);
}

#[tokio::test]
async fn test_lost_state_rerun_adopts_existing_objects() {
    let compute = Arc::new(InMemoryCompute::default());
    let ctx = context(compute.clone());
    let graph = build_task_graph(&ctx).unwrap();
    let persister = CountingPersister::default();

    Executor::new(&ctx, &persister)
        .apply(&graph, &mut FlowState::new())
        .await
        .unwrap();
    let mutations = compute.mutation_count().await;

    // every object exists already; a run from empty state must not insert again
    let mut state = FlowState::new();
    let report = Executor::new(&ctx, &persister)
        .apply(&graph, &mut state)
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(compute.mutation_count().await, mutations);
}

#[tokio::test]
async fn test_failed_subnet_resumes_on_next_pass() {
    let compute = Arc::new(InMemoryCompute::default());
    compute
        .fail_next(
            "insert subnetwork shoot--dev--app-nodes",
            CloudError::Unavailable("backend error".into()),
        )
        .await;
    let ctx = context(compute.clone());
    let graph = build_task_graph(&ctx).unwrap();
    let persister = CountingPersister::default();
    let mut state = FlowState::new();
    let executor = Executor::new(&ctx, &persister);

    let report = executor.apply(&graph, &mut state).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.blocked.len(), 1);
    assert_eq!(
        state.status(&ResourceKey::new("subnet", "nodes")),
        Some(ResourceStatus::Error)
    );
    assert_eq!(
        state.status(&ResourceKey::new("firewall", "allow-health-checks")),
        Some(ResourceStatus::Created)
    );

    let report = executor.apply(&graph, &mut state).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.changed,
        vec![
            ResourceKey::new("subnet", "nodes"),
            ResourceKey::new("nat", "cloud-nat")
        ]
    );
}

#[tokio::test]
async fn test_teardown_removes_everything() {
    let compute = Arc::new(InMemoryCompute::default());
    let ctx = context(compute.clone());
    let graph = build_task_graph(&ctx).unwrap();
    let persister = CountingPersister::default();
    let mut state = FlowState::new();
    let executor = Executor::new(&ctx, &persister);

    executor.apply(&graph, &mut state).await.unwrap();
    let report = executor.teardown(&graph, &mut state).await.unwrap();

    assert!(report.is_success());
    assert!(compute.network_names().await.is_empty());
    assert!(compute.subnetwork_names().await.is_empty());
    assert!(compute.router_names().await.is_empty());
    assert!(compute.firewall_names().await.is_empty());
}
