//! Reconcile and delete entry points
//!
//! Each call is one pass: classify the persisted state, pick the backend, and
//! on the flow path drive the task graph to completion. Anything that fails is
//! returned to the caller, which schedules the next pass; the flow state
//! persisted after every step makes that pass resume where this one stopped.

use crate::codec::StoredState;
use crate::error::{ReconcileError, Result};
use crate::legacy::{LegacyTool, release_legacy_tool};
use crate::model::{Cluster, ClusterIdentity, Infrastructure, StatusPatch};
use crate::selector::{Decision, SelectorKeys, select_backend};
use crate::status::{InfrastructureClient, StatusPersister};
use infraflow_cloud::{ExecutionReport, Executor, FlowError, FlowState, RetryConfig};
use infraflow_config::ControllerConfig;
use infraflow_gcp::{
    ComputeClient, GcpContext, InfrastructureConfig, ProviderStatus, PrunePolicy,
    build_task_graph, managed_rule_names, prune_firewall_rules, prune_routes, stale_removal_task,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings of the reconciliation entry points, built from the controller
/// configuration and handed to the [`Actuator`] explicitly.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub selector: SelectorKeys,
    pub prune_policy: PrunePolicy,
    pub retry: RetryConfig,
    pub persist_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            selector: SelectorKeys::default(),
            prune_policy: PrunePolicy::default(),
            retry: RetryConfig::default(),
            persist_attempts: 5,
        }
    }
}

impl ReconcileConfig {
    pub fn from_controller_config(config: &ControllerConfig) -> Result<Self> {
        let prune_policy: PrunePolicy = serde_json::from_value(serde_json::Value::String(
            config.firewall.prune_policy.clone(),
        ))
        .map_err(|_| {
            ReconcileError::InvalidConfig(format!(
                "unknown firewall prune policy '{}'",
                config.firewall.prune_policy
            ))
        })?;

        let retry = &config.retry;
        Ok(Self {
            selector: SelectorKeys::from(&config.selector),
            prune_policy,
            retry: RetryConfig {
                max_attempts: retry.max_attempts,
                initial_delay: Duration::from_millis(retry.initial_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
                backoff_multiplier: retry.backoff_multiplier,
            },
            persist_attempts: config.persist_retry_attempts.0,
        })
    }
}

/// Result of a pass
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// The flow engine ran
    Flow(ExecutionReport),

    /// The legacy tool owns this object; nothing was touched
    Legacy(Decision),
}

impl ReconcileOutcome {
    pub fn is_flow(&self) -> bool {
        matches!(self, ReconcileOutcome::Flow(_))
    }
}

pub struct Actuator {
    client: Arc<dyn InfrastructureClient>,
    compute: Arc<dyn ComputeClient>,
    legacy: Arc<dyn LegacyTool>,
    config: ReconcileConfig,
    cancel: CancellationToken,
}

/// Everything one pass derives from the objects before touching the cloud
struct Pass {
    identity: ClusterIdentity,
    stored: StoredState,
    decision: Decision,
}

impl Actuator {
    pub fn new(
        client: Arc<dyn InfrastructureClient>,
        compute: Arc<dyn ComputeClient>,
        legacy: Arc<dyn LegacyTool>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            client,
            compute,
            legacy,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn begin(&self, infra: &Infrastructure, cluster: &Cluster) -> Result<Pass> {
        let stored = StoredState::decode(infra.status.state.as_ref()).into_result()?;
        let identity = ClusterIdentity::new(infra, cluster, self.compute.project());
        let decision = select_backend(&identity, &stored, &self.config.selector);

        tracing::info!(
            cluster = %identity.name,
            state = stored.describe(),
            "Backend {} selected by {}",
            decision.backend,
            decision.reason
        );
        Ok(Pass {
            identity,
            stored,
            decision,
        })
    }

    fn context(&self, infra: &Infrastructure, cluster: &Cluster, identity: &ClusterIdentity) -> Result<GcpContext> {
        let raw = infra.spec.provider_config.as_ref().ok_or_else(|| {
            ReconcileError::InvalidConfig("spec.providerConfig is missing".to_string())
        })?;
        let config = InfrastructureConfig::from_value(raw)?;

        Ok(
            GcpContext::new(self.compute.clone(), identity.region.clone(), &identity.name, config)
                .with_pods_cidr(cluster.pods_cidr().map(str::to_string))
                .with_retry(self.config.retry.clone())
                .with_prune_policy(self.config.prune_policy),
        )
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled.into());
        }
        Ok(())
    }

    /// Bring the cluster network to its desired state.
    pub async fn reconcile(&self, infra: &Infrastructure, cluster: &Cluster) -> Result<ReconcileOutcome> {
        let pass = self.begin(infra, cluster)?;
        if !pass.decision.is_flow() {
            return Ok(ReconcileOutcome::Legacy(pass.decision));
        }

        let ctx = self.context(infra, cluster, &pass.identity)?;
        let graph = build_task_graph(&ctx)?;
        let mut state = match pass.stored {
            StoredState::Flow(state) => state,
            StoredState::Legacy(_) => {
                tracing::info!("Migrating {} from the legacy tool", pass.identity.name);
                FlowState::new()
            }
            StoredState::Unset | StoredState::Unrecognized(_) => FlowState::new(),
        };

        let persister =
            StatusPersister::new(self.client.as_ref(), infra.clone(), self.config.persist_attempts);
        let report = Executor::new(&ctx, &persister)
            .with_cancellation(self.cancel.clone())
            .with_stale_tasks(stale_removal_task)
            .apply(&graph, &mut state)
            .await?
            .into_result()?;

        self.check_cancelled()?;
        // load balancer rules of a live cluster are never stale
        let pruned = prune_firewall_rules(
            ctx.compute.as_ref(),
            &ctx.retry,
            &pass.identity.name,
            &ctx.names.vpc,
            &managed_rule_names(&ctx.names),
            PrunePolicy::ClusterPrefix,
        )
        .await?;
        if !pruned.is_empty() {
            tracing::info!("Pruned {} stale firewall rules", pruned.len());
        }

        release_legacy_tool(self.legacy.as_ref(), &persister.current().await).await?;

        let provider_status = ProviderStatus::from_state(&state, &ctx.names).to_value()?;
        let state_value = state
            .to_value()
            .map_err(|e| ReconcileError::StateFormat(e.to_string()))?;
        persister
            .write(&StatusPatch {
                provider_status: Some(provider_status),
                state: Some(Some(state_value)),
            })
            .await?;

        Ok(ReconcileOutcome::Flow(report))
    }

    /// Tear the cluster network down and clear the persisted state.
    pub async fn delete(&self, infra: &Infrastructure, cluster: &Cluster) -> Result<ReconcileOutcome> {
        let pass = self.begin(infra, cluster)?;
        if !pass.decision.is_flow() {
            return Ok(ReconcileOutcome::Legacy(pass.decision));
        }

        let ctx = self.context(infra, cluster, &pass.identity)?;
        let graph = build_task_graph(&ctx)?;
        let mut state = match pass.stored {
            StoredState::Flow(state) => state,
            _ => FlowState::new(),
        };

        // out-of-band objects in the VPC block its deletion; an adopted VPC
        // may carry other tenants' load balancer rules
        let teardown_policy = if ctx.config.uses_existing_vpc() {
            PrunePolicy::ClusterPrefix
        } else {
            ctx.prune_policy
        };
        let rules = prune_firewall_rules(
            ctx.compute.as_ref(),
            &ctx.retry,
            &pass.identity.name,
            &ctx.names.vpc,
            &HashSet::new(),
            teardown_policy,
        )
        .await?;
        let routes =
            prune_routes(ctx.compute.as_ref(), &ctx.retry, &pass.identity.name, &ctx.names.vpc)
                .await?;
        tracing::debug!(
            "Removed {} firewall rules and {} routes before teardown",
            rules.len(),
            routes.len()
        );
        self.check_cancelled()?;

        let persister =
            StatusPersister::new(self.client.as_ref(), infra.clone(), self.config.persist_attempts);
        let report = Executor::new(&ctx, &persister)
            .with_cancellation(self.cancel.clone())
            .with_stale_tasks(stale_removal_task)
            .teardown(&graph, &mut state)
            .await?
            .into_result()?;

        release_legacy_tool(self.legacy.as_ref(), &persister.current().await).await?;

        persister
            .write(&StatusPatch {
                provider_status: None,
                state: Some(None),
            })
            .await?;

        tracing::info!("Infrastructure of {} deleted", pass.identity.name);
        Ok(ReconcileOutcome::Flow(report))
    }
}
