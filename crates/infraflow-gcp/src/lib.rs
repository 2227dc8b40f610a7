//! infraflow GCP provider
//!
//! Compute Engine collaborator for the flow engine: resource types, the
//! `ComputeClient` trait with its REST implementation, the provisioning tasks
//! of a cluster network, and the firewall/route naming conventions.
//!
//! ## Environment variables
//!
//! - `GOOGLE_OAUTH_ACCESS_TOKEN`: bearer token for the Compute Engine API

pub mod api;
pub mod compute;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod firewall;
pub mod status;
pub mod tasks;

pub use api::{COMPUTE_API_BASE, GcpApiConfig, GcpComputeApi};
pub use compute::{
    ComputeClient, Firewall, FirewallAllowed, Network, Route, Router, RouterNat,
    RouterNatSubnetwork, SubnetLogConfig, Subnetwork, network_url, subnetwork_url,
};
pub use config::{InfrastructureConfig, ResourceNames};
pub use error::{GcpError, Result};
pub use firewall::{
    FirewallRuleKind, PrunePolicy, firewall_rules_to_delete, managed_rule_names,
    prune_firewall_rules, prune_routes,
};
pub use status::ProviderStatus;
pub use tasks::{GcpContext, build_task_graph, stale_removal_task};
