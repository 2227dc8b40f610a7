//! Compute Engine resource types and the client trait
//!
//! Field names follow the Compute Engine v1 JSON representation so the same
//! types serve the REST client and the in-memory fake.

use async_trait::async_trait;
use infraflow_cloud::{NetworkScoped, Result};
use serde::{Deserialize, Serialize};

/// Relative resource path of a global network, as accepted by every
/// network-scoped insert.
pub fn network_url(project: &str, network: &str) -> String {
    format!("projects/{}/global/networks/{}", project, network)
}

/// Relative resource path of a regional subnetwork.
pub fn subnetwork_url(project: &str, region: &str, subnet: &str) -> String {
    format!("projects/{}/regions/{}/subnetworks/{}", project, region, subnet)
}

/// VPC network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,

    #[serde(default)]
    pub auto_create_subnetworks: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// Subnet flow log settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetLogConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_sampling: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Regional subnetwork
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnetwork {
    pub name: String,

    /// Network name or URL
    pub network: String,

    pub ip_cidr_range: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_config: Option<SubnetLogConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// Protocol/ports pair of a firewall rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirewallAllowed {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

impl FirewallAllowed {
    pub fn protocol(protocol: impl Into<String>) -> Self {
        Self {
            ip_protocol: protocol.into(),
            ports: Vec::new(),
        }
    }

    pub fn ports(protocol: impl Into<String>, ports: &[&str]) -> Self {
        Self {
            ip_protocol: protocol.into(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Ingress firewall rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Firewall {
    pub name: String,

    /// Network name or URL
    pub network: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,

    #[serde(default)]
    pub source_ranges: Vec<String>,

    #[serde(default)]
    pub allowed: Vec<FirewallAllowed>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

impl Firewall {
    /// Whether the parts this system manages match `other`, ignoring order.
    pub fn same_rules(&self, other: &Firewall) -> bool {
        fn sorted<T: Clone + Ord>(v: &[T]) -> Vec<T> {
            let mut v = v.to_vec();
            v.sort();
            v
        }
        sorted(&self.source_ranges) == sorted(&other.source_ranges)
            && sorted(&self.allowed) == sorted(&other.allowed)
            && sorted(&self.target_tags) == sorted(&other.target_tags)
    }
}

impl NetworkScoped for Firewall {
    fn name(&self) -> &str {
        &self.name
    }

    fn network(&self) -> &str {
        &self.network
    }
}

/// Network route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,

    /// Network name or URL
    pub network: String,

    #[serde(default)]
    pub dest_range: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_instance: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

impl NetworkScoped for Route {
    fn name(&self) -> &str {
        &self.name
    }

    fn network(&self) -> &str {
        &self.network
    }
}

/// Subnetwork covered by a Cloud NAT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterNatSubnetwork {
    /// Subnetwork name or URL
    pub name: String,

    #[serde(default)]
    pub source_ip_ranges_to_nat: Vec<String>,
}

/// Cloud NAT configured on a router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterNat {
    pub name: String,

    #[serde(default)]
    pub nat_ip_allocate_option: String,

    #[serde(default)]
    pub source_subnetwork_ip_ranges_to_nat: String,

    #[serde(default)]
    pub subnetworks: Vec<RouterNatSubnetwork>,

    #[serde(
        default,
        rename = "minPortsPerVm",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_ports_per_vm: Option<i32>,
}

/// Cloud router
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub name: String,

    /// Network name or URL
    pub network: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default)]
    pub nats: Vec<RouterNat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// Compute Engine operations used by the flow engine.
///
/// `get_*` returns `Ok(None)` for a missing object; `delete_*` on a missing
/// object returns `CloudError::NotFound`. Every call is safe to repeat.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Project the client operates in
    fn project(&self) -> &str;

    async fn get_network(&self, name: &str) -> Result<Option<Network>>;
    async fn insert_network(&self, network: &Network) -> Result<Network>;
    async fn delete_network(&self, name: &str) -> Result<()>;

    async fn get_subnetwork(&self, region: &str, name: &str) -> Result<Option<Subnetwork>>;
    async fn insert_subnetwork(&self, region: &str, subnet: &Subnetwork) -> Result<Subnetwork>;
    async fn patch_subnetwork(&self, region: &str, subnet: &Subnetwork) -> Result<Subnetwork>;
    async fn delete_subnetwork(&self, region: &str, name: &str) -> Result<()>;

    async fn get_router(&self, region: &str, name: &str) -> Result<Option<Router>>;
    async fn insert_router(&self, region: &str, router: &Router) -> Result<Router>;
    async fn patch_router(&self, region: &str, router: &Router) -> Result<Router>;
    async fn delete_router(&self, region: &str, name: &str) -> Result<()>;

    async fn list_firewalls(&self) -> Result<Vec<Firewall>>;
    async fn get_firewall(&self, name: &str) -> Result<Option<Firewall>>;
    async fn insert_firewall(&self, firewall: &Firewall) -> Result<Firewall>;
    async fn patch_firewall(&self, firewall: &Firewall) -> Result<Firewall>;
    async fn delete_firewall(&self, name: &str) -> Result<()>;

    async fn list_routes(&self) -> Result<Vec<Route>>;
    async fn delete_route(&self, name: &str) -> Result<()>;
}
