//! Provisioning tasks of a GCP cluster network
//!
//! Each task looks its object up by name first and only inserts when it is
//! missing, so a step re-entered after a crash finds its own work and succeeds.

use crate::compute::{
    ComputeClient, Firewall, Network, Router, RouterNat, RouterNatSubnetwork, SubnetLogConfig,
    Subnetwork, network_url, subnetwork_url,
};
use crate::config::{InfrastructureConfig, ResourceNames};
use crate::firewall::{FirewallRuleKind, PrunePolicy, desired_rule};
use async_trait::async_trait;
use infraflow_cloud::{
    BoxTask, CloudError, FlowError, FlowState, OwnershipRule, ResourceKey, ResourceRecord, Result,
    RetryConfig, Task, TaskGraph, TaskGraphBuilder, network_name, retry_with_backoff,
    same_network,
};
use std::future::Future;
use std::sync::Arc;

/// Everything the tasks need to talk to one cluster's project
pub struct GcpContext {
    pub compute: Arc<dyn ComputeClient>,
    pub region: String,
    pub names: ResourceNames,
    pub config: InfrastructureConfig,

    /// Pod CIDR of the cluster, allowed by the internal firewall rule
    pub pods_cidr: Option<String>,

    pub retry: RetryConfig,
    pub prune_policy: PrunePolicy,
}

impl GcpContext {
    pub fn new(
        compute: Arc<dyn ComputeClient>,
        region: impl Into<String>,
        cluster_name: &str,
        config: InfrastructureConfig,
    ) -> Self {
        Self {
            compute,
            region: region.into(),
            names: ResourceNames::new(cluster_name, &config),
            config,
            pods_cidr: None,
            retry: RetryConfig::default(),
            prune_policy: PrunePolicy::default(),
        }
    }

    pub fn with_pods_cidr(mut self, pods_cidr: Option<String>) -> Self {
        self.pods_cidr = pods_cidr;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_prune_policy(mut self, policy: PrunePolicy) -> Self {
        self.prune_policy = policy;
        self
    }

    /// Run one cloud call with bounded retries on transient errors.
    pub async fn call<T, F, Fut>(&self, op: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(&self.retry, op, CloudError::is_transient, call).await
    }

    pub fn network_ref(&self) -> String {
        network_url(self.compute.project(), &self.names.vpc)
    }

    /// CIDRs allowed by the internal-access rule
    pub fn internal_sources(&self) -> Vec<String> {
        let mut sources = vec![self.config.networks.workers.clone()];
        sources.extend(self.pods_cidr.clone());
        sources.extend(self.config.networks.internal.clone());
        sources
    }
}

/// Treat a missing object as already deleted.
fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(CloudError::NotFound(_)) => Ok(()),
        other => other,
    }
}

pub const NETWORK_KEY: (&str, &str) = ("network", "vpc");
pub const NODES_SUBNET_KEY: (&str, &str) = ("subnet", "nodes");
pub const INTERNAL_SUBNET_KEY: (&str, &str) = ("subnet", "internal");
pub const ROUTER_KEY: (&str, &str) = ("router", "cloud-router");
pub const NAT_KEY: (&str, &str) = ("nat", "cloud-nat");

pub fn key((kind, name): (&str, &str)) -> ResourceKey {
    ResourceKey::new(kind, name)
}

pub fn firewall_key(kind: FirewallRuleKind) -> ResourceKey {
    ResourceKey::new("firewall", kind.logical_name())
}

/// The cluster VPC. Adopted when the config names an existing one.
pub struct NetworkTask;

#[async_trait]
impl Task<GcpContext> for NetworkTask {
    async fn ensure(&self, ctx: &GcpContext, _state: &FlowState) -> Result<String> {
        let name = &ctx.names.vpc;
        let existing = ctx
            .call("get network", || ctx.compute.get_network(name))
            .await?;

        if ctx.config.uses_existing_vpc() {
            return match existing {
                Some(_) => {
                    tracing::debug!("Using existing VPC {}", name);
                    Ok(name.clone())
                }
                None => Err(CloudError::NotFound(format!(
                    "configured VPC {} does not exist",
                    name
                ))),
            };
        }

        match existing {
            Some(network) if network.auto_create_subnetworks => Err(CloudError::InvalidSpec(
                format!("VPC {} is in auto subnet mode", name),
            )),
            Some(_) => Ok(name.clone()),
            None => {
                let desired = Network {
                    name: name.clone(),
                    auto_create_subnetworks: false,
                    description: Some(format!("VPC of cluster {}", ctx.names.cluster)),
                    self_link: None,
                };
                match ctx
                    .call("insert network", || ctx.compute.insert_network(&desired))
                    .await
                {
                    Ok(_) | Err(CloudError::AlreadyExists(_)) => Ok(name.clone()),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn remove(&self, ctx: &GcpContext, _record: &ResourceRecord) -> Result<()> {
        if ctx.config.uses_existing_vpc() {
            tracing::info!("Keeping existing VPC {}", ctx.names.vpc);
            return Ok(());
        }
        let name = &ctx.names.vpc;
        ignore_not_found(
            ctx.call("delete network", || ctx.compute.delete_network(name))
                .await,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetPurpose {
    Nodes,
    Internal,
}

impl SubnetPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            SubnetPurpose::Nodes => "nodes",
            SubnetPurpose::Internal => "internal",
        }
    }
}

/// A regional subnet of the cluster VPC
pub struct SubnetTask {
    pub purpose: SubnetPurpose,
}

impl SubnetTask {
    fn name<'a>(&self, ctx: &'a GcpContext) -> &'a str {
        match self.purpose {
            SubnetPurpose::Nodes => &ctx.names.nodes_subnet,
            SubnetPurpose::Internal => &ctx.names.internal_subnet,
        }
    }

    fn desired(&self, ctx: &GcpContext) -> Result<Subnetwork> {
        let networks = &ctx.config.networks;
        let (cidr, log_config) = match self.purpose {
            SubnetPurpose::Nodes => (
                networks.workers.clone(),
                networks.flow_logs.as_ref().map(|f| SubnetLogConfig {
                    enable: true,
                    aggregation_interval: f.aggregation_interval.clone(),
                    flow_sampling: f.flow_sampling,
                    metadata: f.metadata.clone(),
                }),
            ),
            SubnetPurpose::Internal => {
                let cidr = networks.internal.clone().ok_or_else(|| {
                    CloudError::InvalidSpec("no internal CIDR configured".to_string())
                })?;
                (cidr, None)
            }
        };

        Ok(Subnetwork {
            name: self.name(ctx).to_string(),
            network: ctx.network_ref(),
            ip_cidr_range: cidr,
            region: Some(ctx.region.clone()),
            log_config,
            fingerprint: None,
            self_link: None,
        })
    }
}

/// Log settings that are actually in effect
fn effective_log_config(config: &Option<SubnetLogConfig>) -> Option<&SubnetLogConfig> {
    config.as_ref().filter(|c| c.enable)
}

#[async_trait]
impl Task<GcpContext> for SubnetTask {
    async fn ensure(&self, ctx: &GcpContext, _state: &FlowState) -> Result<String> {
        let desired = self.desired(ctx)?;
        let region = ctx.region.as_str();
        let name = desired.name.as_str();

        let current = ctx
            .call("get subnetwork", || ctx.compute.get_subnetwork(region, name))
            .await?;

        let Some(current) = current else {
            match ctx
                .call("insert subnetwork", || {
                    ctx.compute.insert_subnetwork(region, &desired)
                })
                .await
            {
                Ok(_) | Err(CloudError::AlreadyExists(_)) => return Ok(name.to_string()),
                Err(e) => return Err(e),
            }
        };

        if current.ip_cidr_range != desired.ip_cidr_range {
            return Err(CloudError::InvalidSpec(format!(
                "subnet {} has CIDR {}, want {}",
                name, current.ip_cidr_range, desired.ip_cidr_range
            )));
        }
        if !same_network(&current.network, &desired.network) {
            return Err(CloudError::InvalidSpec(format!(
                "subnet {} belongs to network {}, want {}",
                name,
                network_name(&current.network),
                ctx.names.vpc
            )));
        }

        if effective_log_config(&current.log_config) != effective_log_config(&desired.log_config) {
            tracing::info!("Updating flow logs of subnet {}", name);
            let patch = Subnetwork {
                log_config: Some(desired.log_config.clone().unwrap_or_default()),
                ..current
            };
            ctx.call("patch subnetwork", || {
                ctx.compute.patch_subnetwork(region, &patch)
            })
            .await?;
        }

        Ok(name.to_string())
    }

    async fn remove(&self, ctx: &GcpContext, _record: &ResourceRecord) -> Result<()> {
        let name = self.name(ctx);
        let region = ctx.region.as_str();
        ignore_not_found(
            ctx.call("delete subnetwork", || {
                ctx.compute.delete_subnetwork(region, name)
            })
            .await,
        )
    }
}

/// Cloud router carrying the NAT. Adopted when the config names one.
pub struct RouterTask;

impl RouterTask {
    fn adopted(ctx: &GcpContext) -> bool {
        ctx.config
            .networks
            .vpc
            .as_ref()
            .is_some_and(|v| v.cloud_router.is_some())
    }
}

#[async_trait]
impl Task<GcpContext> for RouterTask {
    async fn ensure(&self, ctx: &GcpContext, _state: &FlowState) -> Result<String> {
        let name = ctx.names.router.as_str();
        let region = ctx.region.as_str();
        let current = ctx
            .call("get router", || ctx.compute.get_router(region, name))
            .await?;

        match current {
            Some(router) if !same_network(&router.network, &ctx.names.vpc) => {
                Err(CloudError::InvalidSpec(format!(
                    "router {} belongs to network {}, want {}",
                    name,
                    network_name(&router.network),
                    ctx.names.vpc
                )))
            }
            Some(_) => Ok(name.to_string()),
            None if Self::adopted(ctx) => Err(CloudError::NotFound(format!(
                "configured cloud router {} does not exist",
                name
            ))),
            None => {
                let desired = Router {
                    name: name.to_string(),
                    network: ctx.network_ref(),
                    region: Some(ctx.region.clone()),
                    ..Default::default()
                };
                match ctx
                    .call("insert router", || ctx.compute.insert_router(region, &desired))
                    .await
                {
                    Ok(_) | Err(CloudError::AlreadyExists(_)) => Ok(name.to_string()),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn remove(&self, ctx: &GcpContext, _record: &ResourceRecord) -> Result<()> {
        if Self::adopted(ctx) {
            tracing::info!("Keeping existing cloud router {}", ctx.names.router);
            return Ok(());
        }
        let name = ctx.names.router.as_str();
        let region = ctx.region.as_str();
        ignore_not_found(
            ctx.call("delete router", || ctx.compute.delete_router(region, name))
                .await,
        )
    }
}

/// Cloud NAT configured on the cluster router, covering the nodes subnet
pub struct NatTask;

impl NatTask {
    fn desired(ctx: &GcpContext) -> RouterNat {
        RouterNat {
            name: ctx.names.nat.clone(),
            nat_ip_allocate_option: "AUTO_ONLY".to_string(),
            source_subnetwork_ip_ranges_to_nat: "LIST_OF_SUBNETWORKS".to_string(),
            subnetworks: vec![RouterNatSubnetwork {
                name: subnetwork_url(
                    ctx.compute.project(),
                    &ctx.region,
                    &ctx.names.nodes_subnet,
                ),
                source_ip_ranges_to_nat: vec!["ALL_IP_RANGES".to_string()],
            }],
            min_ports_per_vm: ctx
                .config
                .networks
                .cloud_nat
                .as_ref()
                .and_then(|n| n.min_ports_per_vm),
        }
    }
}

/// Compare NAT settings; subnetwork references may be names or URLs.
fn nat_matches(current: &RouterNat, desired: &RouterNat) -> bool {
    let subnets = |nat: &RouterNat| -> Vec<(String, Vec<String>)> {
        let mut v: Vec<_> = nat
            .subnetworks
            .iter()
            .map(|s| {
                (
                    network_name(&s.name).to_string(),
                    s.source_ip_ranges_to_nat.clone(),
                )
            })
            .collect();
        v.sort();
        v
    };
    current.nat_ip_allocate_option == desired.nat_ip_allocate_option
        && current.source_subnetwork_ip_ranges_to_nat == desired.source_subnetwork_ip_ranges_to_nat
        && current.min_ports_per_vm == desired.min_ports_per_vm
        && subnets(current) == subnets(desired)
}

#[async_trait]
impl Task<GcpContext> for NatTask {
    async fn ensure(&self, ctx: &GcpContext, _state: &FlowState) -> Result<String> {
        let router_name = ctx.names.router.as_str();
        let region = ctx.region.as_str();
        let desired = Self::desired(ctx);

        let Some(mut router) = ctx
            .call("get router", || ctx.compute.get_router(region, router_name))
            .await?
        else {
            return Err(CloudError::NotFound(format!("router {}", router_name)));
        };

        match router.nats.iter_mut().find(|n| n.name == desired.name) {
            Some(current) if nat_matches(current, &desired) => return Ok(desired.name),
            Some(current) => {
                tracing::info!("Updating NAT {} on router {}", desired.name, router_name);
                *current = desired.clone();
            }
            None => router.nats.push(desired.clone()),
        }

        ctx.call("patch router", || ctx.compute.patch_router(region, &router))
            .await?;
        Ok(desired.name)
    }

    async fn remove(&self, ctx: &GcpContext, _record: &ResourceRecord) -> Result<()> {
        remove_nat(ctx, &ctx.names.router, &ctx.names.nat).await
    }
}

/// Take NAT `nat_name` off router `router_name`, keeping any other NAT.
async fn remove_nat(ctx: &GcpContext, router_name: &str, nat_name: &str) -> Result<()> {
    let region = ctx.region.as_str();
    let Some(mut router) = ctx
        .call("get router", || ctx.compute.get_router(region, router_name))
        .await?
    else {
        return Ok(());
    };

    let before = router.nats.len();
    router.nats.retain(|n| n.name != nat_name);
    if router.nats.len() == before {
        return Ok(());
    }
    ignore_not_found(
        ctx.call("patch router", || ctx.compute.patch_router(region, &router))
            .await
            .map(|_| ()),
    )
}

/// One managed ingress rule
pub struct FirewallTask {
    pub kind: FirewallRuleKind,
}

#[async_trait]
impl Task<GcpContext> for FirewallTask {
    async fn ensure(&self, ctx: &GcpContext, _state: &FlowState) -> Result<String> {
        let desired = desired_rule(
            self.kind,
            &ctx.names,
            &ctx.network_ref(),
            &ctx.internal_sources(),
        );
        let name = desired.name.as_str();

        let current = ctx
            .call("get firewall", || ctx.compute.get_firewall(name))
            .await?;

        let Some(current) = current else {
            return match ctx
                .call("insert firewall", || ctx.compute.insert_firewall(&desired))
                .await
            {
                Ok(_) | Err(CloudError::AlreadyExists(_)) => Ok(name.to_string()),
                Err(e) => Err(e),
            };
        };

        if !same_network(&current.network, &desired.network) {
            return Err(CloudError::InvalidSpec(format!(
                "firewall rule {} belongs to network {}, want {}",
                name,
                network_name(&current.network),
                ctx.names.vpc
            )));
        }
        if !current.same_rules(&desired) {
            tracing::info!("Updating drifted firewall rule {}", name);
            let patch = Firewall {
                self_link: current.self_link.clone(),
                ..desired.clone()
            };
            ctx.call("patch firewall", || ctx.compute.patch_firewall(&patch))
                .await?;
        }
        Ok(name.to_string())
    }

    async fn remove(&self, ctx: &GcpContext, _record: &ResourceRecord) -> Result<()> {
        let name = self.kind.rule_name(&ctx.names);
        ignore_not_found(
            ctx.call("delete firewall", || ctx.compute.delete_firewall(name))
                .await,
        )
    }
}

/// An object whose record the current graph no longer contains, such as the
/// internal subnet after `networks.internal` was dropped. It is removed by the
/// name in its record, and only when that name carries the cluster prefix.
pub struct StaleObjectTask {
    key: ResourceKey,
}

impl StaleObjectTask {
    fn recorded_name(&self, ctx: &GcpContext, record: &ResourceRecord) -> Option<String> {
        if let Some(cloud_id) = &record.cloud_id {
            return Some(cloud_id.clone());
        }
        // interrupted before the cloud name was recorded
        match self.key.kind() {
            "subnet" | "firewall" => Some(format!("{}-{}", ctx.names.cluster, self.key.name())),
            "router" => Some(ctx.names.router.clone()),
            "nat" => Some(ctx.names.nat.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl Task<GcpContext> for StaleObjectTask {
    async fn ensure(&self, _ctx: &GcpContext, _state: &FlowState) -> Result<String> {
        Err(CloudError::InvalidSpec(format!(
            "{} is no longer part of the cluster network",
            self.key
        )))
    }

    async fn remove(&self, ctx: &GcpContext, record: &ResourceRecord) -> Result<()> {
        let Some(name) = self.recorded_name(ctx, record) else {
            return Ok(());
        };
        if !OwnershipRule::cluster_prefixed(&ctx.names.cluster).owns(&name) {
            tracing::info!("Keeping {} of {}, not named after the cluster", name, self.key);
            return Ok(());
        }

        let name = name.as_str();
        let region = ctx.region.as_str();
        match self.key.kind() {
            "subnet" => ignore_not_found(
                ctx.call("delete subnetwork", || {
                    ctx.compute.delete_subnetwork(region, name)
                })
                .await,
            ),
            "router" => ignore_not_found(
                ctx.call("delete router", || ctx.compute.delete_router(region, name))
                    .await,
            ),
            "nat" => remove_nat(ctx, &ctx.names.router, name).await,
            "firewall" => ignore_not_found(
                ctx.call("delete firewall", || ctx.compute.delete_firewall(name))
                    .await,
            ),
            _ => Ok(()),
        }
    }
}

/// Removal task of a record the graph no longer contains. The VPC is always
/// part of the graph and never rebuilt here.
pub fn stale_removal_task(
    key: &ResourceKey,
    _record: &ResourceRecord,
) -> Option<BoxTask<GcpContext>> {
    match key.kind() {
        "subnet" | "router" | "nat" | "firewall" => {
            Some(Box::new(StaleObjectTask { key: key.clone() }))
        }
        _ => None,
    }
}

/// Build the task graph of a cluster network in declaration order.
pub fn build_task_graph(ctx: &GcpContext) -> std::result::Result<TaskGraph<BoxTask<GcpContext>>, FlowError> {
    let network = key(NETWORK_KEY);
    let nodes = key(NODES_SUBNET_KEY);
    let router = key(ROUTER_KEY);

    let mut builder: TaskGraphBuilder<BoxTask<GcpContext>> = TaskGraph::builder();
    builder.add(network.clone(), vec![], Box::new(NetworkTask));
    builder.add(
        nodes.clone(),
        vec![network.clone()],
        Box::new(SubnetTask {
            purpose: SubnetPurpose::Nodes,
        }),
    );
    if ctx.config.networks.internal.is_some() {
        builder.add(
            key(INTERNAL_SUBNET_KEY),
            vec![network.clone()],
            Box::new(SubnetTask {
                purpose: SubnetPurpose::Internal,
            }),
        );
    }
    if ctx.config.wants_nat() {
        builder.add(router.clone(), vec![network.clone()], Box::new(RouterTask));
        builder.add(
            key(NAT_KEY),
            vec![router, nodes],
            Box::new(NatTask),
        );
    }
    for kind in FirewallRuleKind::ALL {
        builder.add(
            firewall_key(kind),
            vec![network.clone()],
            Box::new(FirewallTask { kind }),
        );
    }

    builder.build()
}
