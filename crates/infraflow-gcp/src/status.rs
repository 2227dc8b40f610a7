//! Provider status written next to the flow state

use crate::config::ResourceNames;
use crate::tasks::{INTERNAL_SUBNET_KEY, NAT_KEY, NETWORK_KEY, NODES_SUBNET_KEY, ROUTER_KEY, key};
use infraflow_cloud::{FlowState, ResourceKey, ResourceStatus};
use serde::{Deserialize, Serialize};

pub const STATUS_API_VERSION: &str = "gcp.provider.extensions.gardener.cloud/v1alpha1";
pub const STATUS_KIND: &str = "InfrastructureStatus";

/// What the rest of the cluster lifecycle needs to know about the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub api_version: String,
    pub kind: String,
    pub networks: NetworkStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub vpc: VpcStatus,

    #[serde(default)]
    pub subnets: Vec<SubnetStatus>,

    #[serde(default, rename = "cloudNAT", skip_serializing_if = "Option::is_none")]
    pub cloud_nat: Option<NamedStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcStatus {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_router: Option<NamedStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedStatus {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetStatus {
    pub name: String,
    pub purpose: String,
}

impl ProviderStatus {
    /// Build the status from the records that reached `Created`.
    pub fn from_state(state: &FlowState, names: &ResourceNames) -> Self {
        let created = |k: (&str, &str)| -> Option<String> {
            let k: ResourceKey = key(k);
            (state.status(&k) == Some(ResourceStatus::Created))
                .then(|| state.cloud_id(&k).map(str::to_string))
                .flatten()
        };

        let mut subnets = Vec::new();
        if let Some(name) = created(NODES_SUBNET_KEY) {
            subnets.push(SubnetStatus {
                name,
                purpose: "nodes".to_string(),
            });
        }
        if let Some(name) = created(INTERNAL_SUBNET_KEY) {
            subnets.push(SubnetStatus {
                name,
                purpose: "internal".to_string(),
            });
        }

        Self {
            api_version: STATUS_API_VERSION.to_string(),
            kind: STATUS_KIND.to_string(),
            networks: NetworkStatus {
                vpc: VpcStatus {
                    name: created(NETWORK_KEY).unwrap_or_else(|| names.vpc.clone()),
                    cloud_router: created(ROUTER_KEY).map(|name| NamedStatus { name }),
                },
                subnets,
                cloud_nat: created(NAT_KEY).map(|name| NamedStatus { name }),
            },
        }
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
