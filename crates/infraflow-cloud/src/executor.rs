//! Resumable task graph executor
//!
//! Runs a [`TaskGraph`] against a [`FlowState`]. Every record transition is
//! persisted before the executor moves on, so an interrupted run resumes from
//! the last persisted transition. Failed steps are left in `Error` and retried
//! on the next run; the executor itself never retries a step.
//!
//! Records the graph no longer contains are removed through tasks rebuilt
//! from the record itself, dependents before their dependencies.

use crate::error::{BoxError, CloudError, FlowError};
use crate::graph::TaskGraph;
use crate::report::{Blocked, ExecutionMode, ExecutionReport, StepFailure};
use crate::state::{FlowState, ResourceKey, ResourceRecord, ResourceStatus};
use async_trait::async_trait;
use petgraph::graphmap::DiGraphMap;
use std::collections::BTreeSet;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// One idempotent provisioning step.
#[async_trait]
pub trait Task<C: ?Sized + Sync>: Send + Sync {
    /// Make the resource exist with the desired spec and return its cloud
    /// identifier. An existing object with a matching spec is a success.
    async fn ensure(&self, ctx: &C, state: &FlowState) -> Result<String, CloudError>;

    /// Remove the resource. An object that is already gone is a success.
    async fn remove(&self, ctx: &C, record: &ResourceRecord) -> Result<(), CloudError>;
}

/// Boxed task as stored in a task graph
pub type BoxTask<C> = Box<dyn Task<C>>;

/// Rebuilds the removal step of a record that is no longer in the task graph.
/// `None` leaves the record alone.
pub type StaleTaskFn<C> = fn(&ResourceKey, &ResourceRecord) -> Option<BoxTask<C>>;

/// Writes the flow state somewhere durable.
#[async_trait]
pub trait FlowStatePersister: Send + Sync {
    async fn persist(&self, state: &FlowState) -> Result<(), BoxError>;
}

/// Drives a task graph towards `Created` (apply) or `Deleted` (teardown)
pub struct Executor<'a, C: ?Sized, P: ?Sized> {
    ctx: &'a C,
    persister: &'a P,
    cancel: CancellationToken,
    stale_task: Option<StaleTaskFn<C>>,
}

impl<'a, C, P> Executor<'a, C, P>
where
    C: ?Sized + Sync,
    P: FlowStatePersister + ?Sized,
{
    pub fn new(ctx: &'a C, persister: &'a P) -> Self {
        Self {
            ctx,
            persister,
            cancel: CancellationToken::new(),
            stale_task: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Remove records missing from the graph with tasks built by `factory`.
    /// Without one they are only reported.
    pub fn with_stale_tasks(mut self, factory: StaleTaskFn<C>) -> Self {
        self.stale_task = Some(factory);
        self
    }

    async fn persist(&self, state: &FlowState) -> Result<(), FlowError> {
        self.persister.persist(state).await.map_err(FlowError::Persist)
    }

    fn check_cancelled(&self) -> Result<(), FlowError> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        Ok(())
    }

    /// Provision every record in dependency order.
    pub async fn apply(
        &self,
        graph: &TaskGraph<BoxTask<C>>,
        state: &mut FlowState,
    ) -> Result<ExecutionReport, FlowError> {
        let start = Instant::now();
        let mut report = ExecutionReport::new(ExecutionMode::Apply);

        for idx in graph.apply_order() {
            let node = graph.node(idx);
            let key = &node.key;

            if state.status(key) == Some(ResourceStatus::Deleted) {
                tracing::info!("{} was deleted earlier, starting a new record", key);
                state.resources.remove(key);
            }
            state.ensure_record(key, &node.depends_on);

            let status = state.status(key);
            if status == Some(ResourceStatus::Created) {
                report.unchanged.push(key.clone());
                continue;
            }

            let waiting_on = unfinished(state, &node.depends_on, ResourceStatus::Created);
            if !waiting_on.is_empty() {
                tracing::debug!("{} blocked on {:?}", key, waiting_on);
                report.blocked.push(Blocked {
                    key: key.clone(),
                    waiting_on,
                });
                continue;
            }

            self.check_cancelled()?;

            if status == Some(ResourceStatus::Deleting) {
                tracing::info!("{} was left mid-deletion, creating it again", key);
                state.fail(key, "deletion was interrupted")?;
            }
            if status != Some(ResourceStatus::Creating) {
                state.transition(key, ResourceStatus::Creating)?;
                self.persist(state).await?;
            } else {
                tracing::info!("Resuming interrupted creation of {}", key);
            }

            tracing::info!("Creating {}", key);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FlowError::Cancelled),
                result = node.task.ensure(self.ctx, state) => result,
            };

            match result {
                Ok(cloud_id) => {
                    state.set_cloud_id(key, cloud_id);
                    state.transition(key, ResourceStatus::Created)?;
                    self.persist(state).await?;
                    report.changed.push(key.clone());
                }
                Err(error) => {
                    tracing::warn!("Creating {} failed: {}", key, error);
                    state.fail(key, error.to_string())?;
                    self.persist(state).await?;
                    report.failed.push(StepFailure {
                        key: key.clone(),
                        error,
                    });
                }
            }
        }

        self.remove_stale(graph, state, &mut report).await?;
        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Remove every record in reverse dependency order.
    ///
    /// Records missing from the state are still removed by name, which covers
    /// objects created before the flow state existed.
    pub async fn teardown(
        &self,
        graph: &TaskGraph<BoxTask<C>>,
        state: &mut FlowState,
    ) -> Result<ExecutionReport, FlowError> {
        let start = Instant::now();
        let mut report = ExecutionReport::new(ExecutionMode::Teardown);

        self.remove_stale(graph, state, &mut report).await?;

        for idx in graph.teardown_order() {
            let node = graph.node(idx);
            let key = &node.key;

            if state.record(key).is_none() {
                state.ensure_record(key, &node.depends_on);
            }

            let status = state.status(key);
            if status == Some(ResourceStatus::Deleted) {
                report.unchanged.push(key.clone());
                continue;
            }

            let mut dependents: BTreeSet<ResourceKey> = graph.dependents(key).into_iter().collect();
            dependents.extend(recorded_dependents(state, key));
            let dependents: Vec<ResourceKey> = dependents.into_iter().collect();

            let waiting_on = unfinished(state, &dependents, ResourceStatus::Deleted);
            if !waiting_on.is_empty() {
                tracing::debug!("{} blocked on dependents {:?}", key, waiting_on);
                report.blocked.push(Blocked {
                    key: key.clone(),
                    waiting_on,
                });
                continue;
            }

            self.remove_one(key, node.task.as_ref(), state, &mut report).await?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Delete one record whose dependents are all gone.
    async fn remove_one(
        &self,
        key: &ResourceKey,
        task: &dyn Task<C>,
        state: &mut FlowState,
        report: &mut ExecutionReport,
    ) -> Result<(), FlowError> {
        self.check_cancelled()?;

        if state.status(key) != Some(ResourceStatus::Deleting) {
            state.transition(key, ResourceStatus::Deleting)?;
            self.persist(state).await?;
        } else {
            tracing::info!("Resuming interrupted deletion of {}", key);
        }

        let Some(record) = state.record(key).cloned() else {
            return Err(FlowError::InvalidKey(key.to_string()));
        };

        tracing::info!("Deleting {}", key);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FlowError::Cancelled),
            result = task.remove(self.ctx, &record) => result,
        };

        match result {
            Ok(()) => {
                state.transition(key, ResourceStatus::Deleted)?;
                self.persist(state).await?;
                report.changed.push(key.clone());
            }
            Err(error) => {
                tracing::warn!("Deleting {} failed: {}", key, error);
                state.fail(key, error.to_string())?;
                self.persist(state).await?;
                report.failed.push(StepFailure {
                    key: key.clone(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// Remove the records the graph no longer contains.
    async fn remove_stale(
        &self,
        graph: &TaskGraph<BoxTask<C>>,
        state: &mut FlowState,
        report: &mut ExecutionReport,
    ) -> Result<(), FlowError> {
        let stale = stale_records(graph, state);
        if stale.is_empty() {
            return Ok(());
        }
        let Some(factory) = self.stale_task else {
            for key in &stale {
                tracing::warn!("Record {} is no longer part of the desired graph", key);
            }
            return Ok(());
        };

        for key in stale_teardown_order(state, &stale) {
            let dependents = recorded_dependents(state, &key);
            let waiting_on = unfinished(state, &dependents, ResourceStatus::Deleted);
            if !waiting_on.is_empty() {
                tracing::debug!("{} blocked on dependents {:?}", key, waiting_on);
                report.blocked.push(Blocked { key, waiting_on });
                continue;
            }

            let Some(record) = state.record(&key) else {
                continue;
            };
            let Some(task) = factory(&key, record) else {
                tracing::warn!("Record {} is no longer desired and cannot be removed", key);
                continue;
            };

            tracing::info!("{} is no longer desired", key);
            self.remove_one(&key, task.as_ref(), state, report).await?;
        }
        Ok(())
    }
}

fn unfinished(state: &FlowState, keys: &[ResourceKey], target: ResourceStatus) -> Vec<ResourceKey> {
    keys.iter()
        .filter(|k| state.status(k) != Some(target))
        .cloned()
        .collect()
}

/// Records that depend on `key` according to the state
fn recorded_dependents(state: &FlowState, key: &ResourceKey) -> Vec<ResourceKey> {
    state
        .resources
        .iter()
        .filter(|(_, record)| record.depends_on.contains(key))
        .map(|(k, _)| k.clone())
        .collect()
}

/// Live records the graph does not contain
fn stale_records<T>(graph: &TaskGraph<T>, state: &FlowState) -> Vec<ResourceKey> {
    state
        .resources
        .iter()
        .filter(|(key, record)| !graph.contains(key) && record.status != ResourceStatus::Deleted)
        .map(|(key, _)| key.clone())
        .collect()
}

/// Order `stale` so every record comes before the records it depends on.
fn stale_teardown_order(state: &FlowState, stale: &[ResourceKey]) -> Vec<ResourceKey> {
    let mut order: DiGraphMap<&ResourceKey, ()> = DiGraphMap::new();
    for key in stale {
        order.add_node(key);
        if let Some(record) = state.record(key) {
            for dep in record.depends_on.iter().filter(|d| stale.contains(d)) {
                order.add_edge(key, dep, ());
            }
        }
    }
    match petgraph::algo::toposort(&order, None) {
        Ok(sorted) => sorted.into_iter().cloned().collect(),
        Err(_) => stale.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskGraphBuilder;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fake cloud: remembers which objects exist and every mutating call.
    #[derive(Default)]
    struct FakeCloud {
        objects: Mutex<HashSet<String>>,
        calls: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
    }

    impl FakeCloud {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn fail(&self, name: &str) {
            self.failing.lock().unwrap().insert(name.to_string());
        }

        fn heal(&self, name: &str) {
            self.failing.lock().unwrap().remove(name);
        }
    }

    struct NamedTask(&'static str);

    #[async_trait]
    impl Task<FakeCloud> for NamedTask {
        async fn ensure(&self, ctx: &FakeCloud, _state: &FlowState) -> Result<String, CloudError> {
            if ctx.failing.lock().unwrap().contains(self.0) {
                return Err(CloudError::Unavailable(self.0.to_string()));
            }
            if ctx.objects.lock().unwrap().insert(self.0.to_string()) {
                ctx.calls.lock().unwrap().push(format!("insert {}", self.0));
            }
            Ok(format!("id-{}", self.0))
        }

        async fn remove(&self, ctx: &FakeCloud, _record: &ResourceRecord) -> Result<(), CloudError> {
            if ctx.failing.lock().unwrap().contains(self.0) {
                return Err(CloudError::Unavailable(self.0.to_string()));
            }
            if ctx.objects.lock().unwrap().remove(self.0) {
                ctx.calls.lock().unwrap().push(format!("delete {}", self.0));
            }
            Ok(())
        }
    }

    /// Keeps every persisted snapshot.
    #[derive(Default)]
    struct Snapshots(Mutex<Vec<FlowState>>);

    #[async_trait]
    impl FlowStatePersister for Snapshots {
        async fn persist(&self, state: &FlowState) -> Result<(), BoxError> {
            self.0.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    impl Snapshots {
        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new("res", name)
    }

    fn graph() -> TaskGraph<BoxTask<FakeCloud>> {
        let mut builder: TaskGraphBuilder<BoxTask<FakeCloud>> = TaskGraph::builder();
        builder
            .add(key("network"), vec![], Box::new(NamedTask("network")))
            .add(key("subnet"), vec![key("network")], Box::new(NamedTask("subnet")))
            .add(key("router"), vec![key("network")], Box::new(NamedTask("router")))
            .add(
                key("nat"),
                vec![key("router"), key("subnet")],
                Box::new(NamedTask("nat")),
            );
        builder.build().unwrap()
    }

    /// The graph with an extra subnet hanging off the network
    fn graph_with_extra() -> TaskGraph<BoxTask<FakeCloud>> {
        let mut builder: TaskGraphBuilder<BoxTask<FakeCloud>> = TaskGraph::builder();
        builder
            .add(key("network"), vec![], Box::new(NamedTask("network")))
            .add(key("subnet"), vec![key("network")], Box::new(NamedTask("subnet")))
            .add(key("extra"), vec![key("network")], Box::new(NamedTask("extra")))
            .add(key("router"), vec![key("network")], Box::new(NamedTask("router")))
            .add(
                key("nat"),
                vec![key("router"), key("subnet")],
                Box::new(NamedTask("nat")),
            );
        builder.build().unwrap()
    }

    fn stale_task(key: &ResourceKey, _record: &ResourceRecord) -> Option<BoxTask<FakeCloud>> {
        match key.name() {
            "extra" => Some(Box::new(NamedTask("extra"))),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_fresh_apply_creates_in_dependency_order() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();

        let report = Executor::new(&cloud, &persister)
            .apply(&graph(), &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.changed.len(), 4);
        assert_eq!(
            cloud.calls(),
            vec!["insert network", "insert subnet", "insert router", "insert nat"]
        );
        assert!(state.all_in(
            &[key("network"), key("subnet"), key("router"), key("nat")],
            ResourceStatus::Created
        ));
        assert_eq!(state.cloud_id(&key("nat")), Some("id-nat"));
        // Creating + Created per record
        assert_eq!(persister.count(), 8);
    }

    #[tokio::test]
    async fn test_second_apply_is_a_no_op() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister);

        executor.apply(&graph(), &mut state).await.unwrap();
        let calls_after_first = cloud.calls().len();
        let persists_after_first = persister.count();

        let report = executor.apply(&graph(), &mut state).await.unwrap();
        assert!(!report.has_changes());
        assert_eq!(report.unchanged.len(), 4);
        assert_eq!(cloud.calls().len(), calls_after_first);
        assert_eq!(persister.count(), persists_after_first);
    }

    #[tokio::test]
    async fn test_failed_step_blocks_dependents_only() {
        let cloud = FakeCloud::default();
        cloud.fail("subnet");
        let persister = Snapshots::default();
        let mut state = FlowState::new();

        let report = Executor::new(&cloud, &persister)
            .apply(&graph(), &mut state)
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, key("subnet"));
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].key, key("nat"));
        assert_eq!(state.status(&key("subnet")), Some(ResourceStatus::Error));
        assert_eq!(state.status(&key("router")), Some(ResourceStatus::Created));
        assert_eq!(state.status(&key("nat")), Some(ResourceStatus::Pending));
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_rerun_resumes_only_unfinished_records() {
        let cloud = FakeCloud::default();
        cloud.fail("subnet");
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister);

        executor.apply(&graph(), &mut state).await.unwrap();
        cloud.heal("subnet");
        let before = cloud.calls().len();

        let report = executor.apply(&graph(), &mut state).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.changed, vec![key("subnet"), key("nat")]);
        assert_eq!(&cloud.calls()[before..], ["insert subnet", "insert nat"]);
    }

    #[tokio::test]
    async fn test_interrupted_creation_is_retried() {
        let cloud = FakeCloud::default();
        // the object exists but the crash happened before `Created` was persisted
        cloud.objects.lock().unwrap().insert("network".to_string());
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        state.ensure_record(&key("network"), &[]);
        state
            .transition(&key("network"), ResourceStatus::Creating)
            .unwrap();

        let report = Executor::new(&cloud, &persister)
            .apply(&graph(), &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(!cloud.calls().contains(&"insert network".to_string()));
        assert_eq!(state.status(&key("network")), Some(ResourceStatus::Created));
    }

    #[tokio::test]
    async fn test_every_transition_is_persisted_in_order() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();

        Executor::new(&cloud, &persister)
            .apply(&graph(), &mut state)
            .await
            .unwrap();

        let snapshots = persister.0.lock().unwrap();
        assert_eq!(
            snapshots[0].status(&key("network")),
            Some(ResourceStatus::Creating)
        );
        assert_eq!(
            snapshots[1].status(&key("network")),
            Some(ResourceStatus::Created)
        );
        assert!(snapshots[1].record(&key("subnet")).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_last_persisted_state() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Executor::new(&cloud, &persister)
            .with_cancellation(cancel)
            .apply(&graph(), &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Cancelled));
        assert!(cloud.calls().is_empty());
        assert_eq!(persister.count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_in_reverse_order() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister);

        executor.apply(&graph(), &mut state).await.unwrap();
        let before = cloud.calls().len();

        let report = executor.teardown(&graph(), &mut state).await.unwrap();
        assert!(report.is_success());
        assert_eq!(
            &cloud.calls()[before..],
            ["delete nat", "delete router", "delete subnet", "delete network"]
        );
        assert!(state.all_in(
            &[key("network"), key("subnet"), key("router"), key("nat")],
            ResourceStatus::Deleted
        ));
    }

    #[tokio::test]
    async fn test_teardown_failure_keeps_dependencies() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister);

        executor.apply(&graph(), &mut state).await.unwrap();
        cloud.fail("subnet");

        let report = executor.teardown(&graph(), &mut state).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].key, key("network"));
        assert!(cloud.objects.lock().unwrap().contains("network"));
        assert_eq!(state.status(&key("subnet")), Some(ResourceStatus::Error));
    }

    #[tokio::test]
    async fn test_teardown_without_state_deletes_by_name() {
        let cloud = FakeCloud::default();
        for name in ["network", "subnet"] {
            cloud.objects.lock().unwrap().insert(name.to_string());
        }
        let persister = Snapshots::default();
        let mut state = FlowState::new();

        let report = Executor::new(&cloud, &persister)
            .teardown(&graph(), &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(cloud.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_recreates_record_left_mid_deletion() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister);

        executor.apply(&graph(), &mut state).await.unwrap();
        // teardown stopped after the NAT was removed but before it was recorded
        state
            .transition(&key("nat"), ResourceStatus::Deleting)
            .unwrap();
        cloud.objects.lock().unwrap().remove("nat");

        let report = executor.apply(&graph(), &mut state).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.changed, vec![key("nat")]);
        assert_eq!(state.status(&key("nat")), Some(ResourceStatus::Created));
        assert!(state.record(&key("nat")).unwrap().last_error.is_none());
        assert!(cloud.objects.lock().unwrap().contains("nat"));
    }

    #[tokio::test]
    async fn test_apply_removes_records_dropped_from_graph() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister).with_stale_tasks(stale_task);

        executor.apply(&graph_with_extra(), &mut state).await.unwrap();
        assert!(cloud.objects.lock().unwrap().contains("extra"));

        let report = executor.apply(&graph(), &mut state).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.changed, vec![key("extra")]);
        assert!(!cloud.objects.lock().unwrap().contains("extra"));
        assert_eq!(state.status(&key("extra")), Some(ResourceStatus::Deleted));
    }

    #[tokio::test]
    async fn test_stale_records_are_only_reported_without_factory() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister);

        executor.apply(&graph_with_extra(), &mut state).await.unwrap();
        let report = executor.apply(&graph(), &mut state).await.unwrap();

        assert!(!report.has_changes());
        assert_eq!(state.status(&key("extra")), Some(ResourceStatus::Created));
    }

    #[tokio::test]
    async fn test_teardown_removes_stale_record_before_its_dependency() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();

        Executor::new(&cloud, &persister)
            .apply(&graph_with_extra(), &mut state)
            .await
            .unwrap();
        let before = cloud.calls().len();

        let report = Executor::new(&cloud, &persister)
            .with_stale_tasks(stale_task)
            .teardown(&graph(), &mut state)
            .await
            .unwrap();

        assert!(report.is_success());
        let calls = &cloud.calls()[before..];
        assert_eq!(calls.first().map(String::as_str), Some("delete extra"));
        assert_eq!(calls.last().map(String::as_str), Some("delete network"));
        assert!(cloud.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stale_removal_blocks_its_dependency() {
        let cloud = FakeCloud::default();
        let persister = Snapshots::default();
        let mut state = FlowState::new();
        let executor = Executor::new(&cloud, &persister).with_stale_tasks(stale_task);

        executor.apply(&graph_with_extra(), &mut state).await.unwrap();
        cloud.fail("extra");

        let report = executor.teardown(&graph(), &mut state).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, key("extra"));
        assert!(report.blocked.iter().any(|b| b.key == key("network")));
        assert!(cloud.objects.lock().unwrap().contains("network"));
    }
}
