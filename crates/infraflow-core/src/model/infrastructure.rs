use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const INFRASTRUCTURE_API_VERSION: &str = "extensions.gardener.cloud/v1alpha1";
pub const INFRASTRUCTURE_KIND: &str = "Infrastructure";

fn default_api_version() -> String {
    INFRASTRUCTURE_API_VERSION.to_string()
}

fn default_kind() -> String {
    INFRASTRUCTURE_KIND.to_string()
}

/// Object metadata, limited to the fields reconciliation reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Optimistic concurrency token; bumped on every write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    /// Whether `key` is set to "true", ignoring case.
    pub fn annotation_is_true(&self, key: &str) -> bool {
        is_true(self.annotations.get(key))
    }

    pub fn label_is_true(&self, key: &str) -> bool {
        is_true(self.labels.get(key))
    }
}

fn is_true(value: Option<&String>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// The infrastructure object of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Infrastructure {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: InfrastructureSpec,

    #[serde(default)]
    pub status: InfrastructureStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    pub region: String,

    /// Provider-specific config, decoded by the GCP crate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,

    /// Opaque persisted state: a flow state or a legacy document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

/// Merge patch of the status subresource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub provider_status: Option<serde_json::Value>,

    /// `Some(None)` clears the persisted state
    pub state: Option<Option<serde_json::Value>>,
}

impl StatusPatch {
    pub fn apply(&self, status: &mut InfrastructureStatus) {
        if let Some(provider_status) = &self.provider_status {
            status.provider_status = Some(provider_status.clone());
        }
        if let Some(state) = &self.state {
            status.state = state.clone();
        }
    }
}

impl Infrastructure {
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}
