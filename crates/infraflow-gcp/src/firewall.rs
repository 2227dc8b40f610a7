//! Firewall rules and route cleanup of a cluster
//!
//! A cluster owns three ingress rules in its VPC. Any other rule in the same
//! VPC that carries the cluster's name prefix is stale and pruned after a
//! successful apply; on teardown every owned rule and route goes.

use crate::compute::{ComputeClient, Firewall, FirewallAllowed};
use crate::config::ResourceNames;
use infraflow_cloud::{
    CloudError, OwnershipRule, Result, RetryConfig, resources_to_delete, retry_with_backoff,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Source ranges of Google Cloud load balancer health checks
pub const HEALTH_CHECK_SOURCE_RANGES: [&str; 4] = [
    "35.191.0.0/16",
    "130.211.0.0/22",
    "209.85.152.0/22",
    "209.85.204.0/22",
];

pub const NODE_PORT_RANGE: &str = "30000-32767";

/// Prefix of rules the Kubernetes cloud controller manager creates for
/// load balancer services
pub const KUBERNETES_MANAGED_PREFIX: &str = "k8s-";

/// Which rules in the cluster VPC count as owned by the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrunePolicy {
    /// Only rules named `<cluster>-…`
    #[default]
    ClusterPrefix,

    /// Rules named `<cluster>-…` plus `k8s-…` load balancer rules
    IncludeKubernetesManaged,
}

impl PrunePolicy {
    pub fn ownership(self, cluster: &str) -> OwnershipRule {
        let rule = OwnershipRule::cluster_prefixed(cluster);
        match self {
            PrunePolicy::ClusterPrefix => rule,
            PrunePolicy::IncludeKubernetesManaged => rule.with_prefix(KUBERNETES_MANAGED_PREFIX),
        }
    }
}

impl std::fmt::Display for PrunePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrunePolicy::ClusterPrefix => write!(f, "clusterPrefix"),
            PrunePolicy::IncludeKubernetesManaged => write!(f, "includeKubernetesManaged"),
        }
    }
}

/// The managed rules of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirewallRuleKind {
    InternalAccess,
    ExternalAccess,
    HealthChecks,
}

impl FirewallRuleKind {
    pub const ALL: [FirewallRuleKind; 3] = [
        FirewallRuleKind::InternalAccess,
        FirewallRuleKind::ExternalAccess,
        FirewallRuleKind::HealthChecks,
    ];

    /// Logical name used in resource keys
    pub fn logical_name(self) -> &'static str {
        match self {
            FirewallRuleKind::InternalAccess => "allow-internal-access",
            FirewallRuleKind::ExternalAccess => "allow-external-access",
            FirewallRuleKind::HealthChecks => "allow-health-checks",
        }
    }

    pub fn rule_name(self, names: &ResourceNames) -> &str {
        match self {
            FirewallRuleKind::InternalAccess => &names.firewall_internal,
            FirewallRuleKind::ExternalAccess => &names.firewall_external,
            FirewallRuleKind::HealthChecks => &names.firewall_health_checks,
        }
    }
}

/// Desired spec of one managed rule.
///
/// `internal_sources` are the CIDRs allowed to reach the nodes on every
/// protocol: workers, pods, and the internal subnet when configured.
pub fn desired_rule(
    kind: FirewallRuleKind,
    names: &ResourceNames,
    network: &str,
    internal_sources: &[String],
) -> Firewall {
    let (source_ranges, allowed) = match kind {
        FirewallRuleKind::InternalAccess => (
            internal_sources.to_vec(),
            vec![
                FirewallAllowed::protocol("icmp"),
                FirewallAllowed::protocol("ipip"),
                FirewallAllowed::protocol("tcp"),
                FirewallAllowed::protocol("udp"),
            ],
        ),
        FirewallRuleKind::ExternalAccess => (
            vec!["0.0.0.0/0".to_string()],
            vec![FirewallAllowed::ports("tcp", &["80", "443"])],
        ),
        FirewallRuleKind::HealthChecks => (
            HEALTH_CHECK_SOURCE_RANGES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            vec![FirewallAllowed::ports("tcp", &[NODE_PORT_RANGE])],
        ),
    };

    Firewall {
        name: kind.rule_name(names).to_string(),
        network: network.to_string(),
        direction: Some("INGRESS".to_string()),
        source_ranges,
        allowed,
        target_tags: vec![names.cluster.clone()],
        self_link: None,
    }
}

/// Names of all managed rules of a cluster
pub fn managed_rule_names(names: &ResourceNames) -> HashSet<String> {
    FirewallRuleKind::ALL
        .iter()
        .map(|k| k.rule_name(names).to_string())
        .collect()
}

/// Rules from `live` that are owned by `cluster` under `policy`, sit in
/// `network`, and are not in `desired`.
pub fn firewall_rules_to_delete<'a>(
    live: &'a [Firewall],
    cluster: &str,
    network: &str,
    desired: &HashSet<String>,
    policy: PrunePolicy,
) -> Vec<&'a Firewall> {
    resources_to_delete(live, &policy.ownership(cluster), network, desired)
}

async fn delete_ignoring_missing<F, Fut>(retry: &RetryConfig, op: &str, call: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    match retry_with_backoff(retry, op, CloudError::is_transient, call).await {
        Err(CloudError::NotFound(_)) | Ok(()) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Delete stale firewall rules in the cluster VPC. Returns the deleted names.
pub async fn prune_firewall_rules(
    compute: &dyn ComputeClient,
    retry: &RetryConfig,
    cluster: &str,
    network: &str,
    desired: &HashSet<String>,
    policy: PrunePolicy,
) -> Result<Vec<String>> {
    let live = retry_with_backoff(retry, "list firewalls", CloudError::is_transient, || {
        compute.list_firewalls()
    })
    .await?;

    let stale: Vec<String> = firewall_rules_to_delete(&live, cluster, network, desired, policy)
        .into_iter()
        .map(|f| f.name.clone())
        .collect();

    for name in &stale {
        tracing::info!("Deleting stale firewall rule {} in {}", name, network);
        delete_ignoring_missing(retry, "delete firewall", || compute.delete_firewall(name)).await?;
    }
    Ok(stale)
}

/// Delete routes in the cluster VPC that carry the cluster prefix. These are
/// created out-of-band by the cloud controller manager and block VPC
/// deletion.
pub async fn prune_routes(
    compute: &dyn ComputeClient,
    retry: &RetryConfig,
    cluster: &str,
    network: &str,
) -> Result<Vec<String>> {
    let live = retry_with_backoff(retry, "list routes", CloudError::is_transient, || {
        compute.list_routes()
    })
    .await?;

    let owned: Vec<String> = resources_to_delete(
        &live,
        &OwnershipRule::cluster_prefixed(cluster),
        network,
        &HashSet::new(),
    )
    .into_iter()
    .map(|r| r.name.clone())
    .collect();

    for name in &owned {
        tracing::info!("Deleting route {} in {}", name, network);
        delete_ignoring_missing(retry, "delete route", || compute.delete_route(name)).await?;
    }
    Ok(owned)
}
