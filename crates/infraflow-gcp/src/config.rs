//! Provider configuration of an infrastructure object
//!
//! This is the `providerConfig` section of the Infrastructure resource. It
//! decides which networking objects exist and what they are called.

use crate::error::{GcpError, Result};
use serde::{Deserialize, Serialize};

/// Provider-specific infrastructure configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureConfig {
    pub networks: NetworkConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Existing VPC to adopt instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<VpcConfig>,

    /// CIDR of the nodes subnet
    #[serde(alias = "worker")]
    pub workers: String,

    /// CIDR of the optional internal subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<String>,

    #[serde(default, rename = "cloudNAT", skip_serializing_if = "Option::is_none")]
    pub cloud_nat: Option<CloudNatConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_logs: Option<FlowLogsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_router: Option<CloudRouterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudRouterConfig {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudNatConfig {
    #[serde(
        default,
        rename = "minPortsPerVM",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_ports_per_vm: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowLogsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_sampling: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl InfrastructureConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: InfrastructureConfig = serde_json::from_value(value.clone())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let networks = &self.networks;
        validate_cidr("networks.workers", &networks.workers)?;
        if let Some(internal) = &networks.internal {
            validate_cidr("networks.internal", internal)?;
        }
        if let Some(vpc) = &networks.vpc {
            if vpc.name.is_empty() {
                return Err(GcpError::InvalidConfig(
                    "networks.vpc.name must not be empty".to_string(),
                ));
            }
            if let Some(router) = &vpc.cloud_router
                && router.name.is_empty()
            {
                return Err(GcpError::InvalidConfig(
                    "networks.vpc.cloudRouter.name must not be empty".to_string(),
                ));
            }
        }
        if let Some(flow_logs) = &networks.flow_logs
            && let Some(sampling) = flow_logs.flow_sampling
            && !(0.0..=1.0).contains(&sampling)
        {
            return Err(GcpError::InvalidConfig(format!(
                "networks.flowLogs.flowSampling must be within [0, 1], got {}",
                sampling
            )));
        }
        Ok(())
    }

    /// Whether the VPC was created outside of this system
    pub fn uses_existing_vpc(&self) -> bool {
        self.networks.vpc.is_some()
    }

    /// Whether a NAT is configured on the cloud router. Clusters with a managed
    /// VPC always get one; adopted VPCs only with an existing cloud router.
    pub fn wants_nat(&self) -> bool {
        match &self.networks.vpc {
            None => true,
            Some(vpc) => vpc.cloud_router.is_some(),
        }
    }
}

fn validate_cidr(field: &str, cidr: &str) -> Result<()> {
    let invalid = || GcpError::InvalidConfig(format!("{} is not a valid IPv4 CIDR: '{}'", field, cidr));

    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    addr.parse::<std::net::Ipv4Addr>().map_err(|_| invalid())?;
    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        _ => Err(invalid()),
    }
}

/// Cloud-side names of everything a cluster owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub cluster: String,
    pub vpc: String,
    pub nodes_subnet: String,
    pub internal_subnet: String,
    pub router: String,
    pub nat: String,
    pub firewall_internal: String,
    pub firewall_external: String,
    pub firewall_health_checks: String,
}

impl ResourceNames {
    pub fn new(cluster: &str, config: &InfrastructureConfig) -> Self {
        let vpc = config
            .networks
            .vpc
            .as_ref()
            .map(|v| v.name.clone())
            .unwrap_or_else(|| cluster.to_string());
        let router = config
            .networks
            .vpc
            .as_ref()
            .and_then(|v| v.cloud_router.as_ref())
            .map(|r| r.name.clone())
            .unwrap_or_else(|| format!("{}-cloud-router", cluster));

        Self {
            cluster: cluster.to_string(),
            vpc,
            nodes_subnet: format!("{}-nodes", cluster),
            internal_subnet: format!("{}-internal", cluster),
            router,
            nat: format!("{}-cloud-nat", cluster),
            firewall_internal: format!("{}-allow-internal-access", cluster),
            firewall_external: format!("{}-allow-external-access", cluster),
            firewall_health_checks: format!("{}-allow-health-checks", cluster),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal() {
        let config = InfrastructureConfig::from_value(&json!({
            "networks": {"workers": "10.250.0.0/16"}
        }))
        .unwrap();
        assert_eq!(config.networks.workers, "10.250.0.0/16");
        assert!(!config.uses_existing_vpc());
        assert!(config.wants_nat());
    }

    #[test]
    fn test_parse_existing_vpc() {
        let config = InfrastructureConfig::from_value(&json!({
            "networks": {
                "vpc": {"name": "shared", "cloudRouter": {"name": "shared-router"}},
                "worker": "10.250.0.0/16",
                "internal": "10.251.0.0/16",
                "cloudNAT": {"minPortsPerVM": 2048},
                "flowLogs": {"aggregationInterval": "INTERVAL_5_SEC", "flowSampling": 0.5}
            }
        }))
        .unwrap();

        let names = ResourceNames::new("shoot--dev--app", &config);
        assert_eq!(names.vpc, "shared");
        assert_eq!(names.router, "shared-router");
        assert_eq!(names.nodes_subnet, "shoot--dev--app-nodes");
        assert_eq!(
            config.networks.cloud_nat.as_ref().unwrap().min_ports_per_vm,
            Some(2048)
        );
    }

    #[test]
    fn test_existing_vpc_without_router_has_no_nat() {
        let config = InfrastructureConfig::from_value(&json!({
            "networks": {"vpc": {"name": "shared"}, "workers": "10.250.0.0/16"}
        }))
        .unwrap();
        assert!(!config.wants_nat());
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        for cidr in ["10.250.0.0", "10.250.0.0/33", "banana/16", ""] {
            let result = InfrastructureConfig::from_value(&json!({
                "networks": {"workers": cidr}
            }));
            assert!(
                matches!(result, Err(GcpError::InvalidConfig(_))),
                "{} should be rejected",
                cidr
            );
        }
    }

    #[test]
    fn test_flow_sampling_range() {
        let result = InfrastructureConfig::from_value(&json!({
            "networks": {"workers": "10.250.0.0/16", "flowLogs": {"flowSampling": 1.5}}
        }));
        assert!(result.is_err());
    }
}
