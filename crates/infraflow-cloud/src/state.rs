//! Flow state document
//!
//! The flow state is the versioned record of per-resource provisioning progress.
//! It is persisted on the infrastructure object's status after every transition
//! and is the only source of truth for resuming an interrupted reconciliation.

use crate::error::{FlowError, StateError};
use chrono::{DateTime, Utc};
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// API group/version identifying a flow-native state document.
pub const FLOW_STATE_API_VERSION: &str = "gcp.provider.extensions.gardener.cloud/v1alpha1";
pub const FLOW_STATE_KIND: &str = "FlowState";
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    1
}

/// Type discriminator shared by all persisted documents.
///
/// Decoding only this part is cheap and does not depend on the payload schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

impl TypeMeta {
    pub fn peek(raw: &[u8]) -> Result<Self, StateError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Only the group/version is compared; the kind is informational.
    pub fn is_flow_state(&self) -> bool {
        self.api_version.as_deref() == Some(FLOW_STATE_API_VERSION)
    }
}

/// Identifies a resource record: resource type plus logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    kind: String,
    name: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ResourceKey {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => {
                Ok(ResourceKey::new(kind, name))
            }
            _ => Err(FlowError::InvalidKey(s.to_string())),
        }
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Provisioning status of a single resource record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Pending,
    Creating,
    Created,
    Deleting,
    Deleted,
    Error,
}

impl ResourceStatus {
    /// Whether `self -> to` is a legal move.
    ///
    /// Re-entering `Creating` or `Deleting` is allowed so a step interrupted by
    /// a crash can be resumed.
    pub fn can_transition_to(self, to: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, to),
            (Pending, Creating)
                | (Creating, Creating)
                | (Error, Creating)
                | (Creating, Created)
                | (Pending | Creating | Created | Error, Deleting)
                | (Deleting, Deleting)
                | (Deleting, Deleted)
                | (Pending | Creating | Deleting, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ResourceStatus::Deleted
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Pending => "Pending",
            ResourceStatus::Creating => "Creating",
            ResourceStatus::Created => "Created",
            ResourceStatus::Deleting => "Deleting",
            ResourceStatus::Deleted => "Deleted",
            ResourceStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Progress record of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// Cloud-side identifier once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,

    pub status: ResourceStatus,

    #[serde(default)]
    pub depends_on: BTreeSet<ResourceKey>,

    /// Message of the failure that put the record into `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ResourceRecord {
    pub fn pending(depends_on: impl IntoIterator<Item = ResourceKey>) -> Self {
        Self {
            cloud_id: None,
            status: ResourceStatus::Pending,
            depends_on: depends_on.into_iter().collect(),
            last_error: None,
        }
    }
}

/// The flow-native persisted state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub api_version: String,

    pub kind: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub resources: BTreeMap<ResourceKey, ResourceRecord>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            api_version: FLOW_STATE_API_VERSION.to_string(),
            kind: FLOW_STATE_KIND.to_string(),
            schema_version: SCHEMA_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and validate a flow state document.
    pub fn from_json(raw: &[u8]) -> Result<Self, StateError> {
        let state: FlowState = serde_json::from_slice(raw)?;

        if state.api_version != FLOW_STATE_API_VERSION {
            return Err(StateError::WrongType {
                api_version: state.api_version,
            });
        }

        if state.schema_version > SCHEMA_VERSION {
            return Err(StateError::UnsupportedSchemaVersion {
                found: state.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        state.validate()?;
        tracing::debug!("Decoded flow state with {} records", state.resources.len());
        Ok(state)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, StateError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Check that every dependency refers to a known record and that the
    /// dependency relation is acyclic.
    pub fn validate(&self) -> Result<(), StateError> {
        let mut graph: DiGraphMap<&ResourceKey, ()> = DiGraphMap::new();
        for (key, record) in &self.resources {
            graph.add_node(key);
            for dep in &record.depends_on {
                if !self.resources.contains_key(dep) {
                    return Err(StateError::Invalid(format!(
                        "{} depends on unknown record {}",
                        key, dep
                    )));
                }
                graph.add_edge(dep, key, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(StateError::Invalid(
                "dependency relation contains a cycle".to_string(),
            ));
        }
        Ok(())
    }

    pub fn record(&self, key: &ResourceKey) -> Option<&ResourceRecord> {
        self.resources.get(key)
    }

    pub fn status(&self, key: &ResourceKey) -> Option<ResourceStatus> {
        self.resources.get(key).map(|r| r.status)
    }

    pub fn cloud_id(&self, key: &ResourceKey) -> Option<&str> {
        self.resources.get(key).and_then(|r| r.cloud_id.as_deref())
    }

    /// Insert a pending record for `key` unless one exists. The dependency set is
    /// refreshed from the current task graph either way.
    pub fn ensure_record(&mut self, key: &ResourceKey, depends_on: &[ResourceKey]) {
        let record = self
            .resources
            .entry(key.clone())
            .or_insert_with(|| ResourceRecord::pending(Vec::new()));
        record.depends_on = depends_on.iter().cloned().collect();
    }

    /// Move a record to `to`, enforcing the allowed transitions.
    pub fn transition(&mut self, key: &ResourceKey, to: ResourceStatus) -> Result<(), FlowError> {
        let record = self
            .resources
            .get_mut(key)
            .ok_or_else(|| FlowError::InvalidKey(key.to_string()))?;

        if !record.status.can_transition_to(to) {
            return Err(FlowError::InvalidTransition {
                key: key.clone(),
                from: record.status,
                to,
            });
        }

        if record.status != to {
            tracing::debug!("{}: {} -> {}", key, record.status, to);
        }
        record.status = to;
        if to != ResourceStatus::Error {
            record.last_error = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move a record to `Error`, remembering the failure message.
    pub fn fail(&mut self, key: &ResourceKey, message: impl Into<String>) -> Result<(), FlowError> {
        self.transition(key, ResourceStatus::Error)?;
        if let Some(record) = self.resources.get_mut(key) {
            record.last_error = Some(message.into());
        }
        Ok(())
    }

    pub fn set_cloud_id(&mut self, key: &ResourceKey, cloud_id: impl Into<String>) {
        if let Some(record) = self.resources.get_mut(key) {
            record.cloud_id = Some(cloud_id.into());
            self.updated_at = Utc::now();
        }
    }

    /// Whether every key in `keys` has reached `status`.
    pub fn all_in(&self, keys: &[ResourceKey], status: ResourceStatus) -> bool {
        keys.iter().all(|k| self.status(k) == Some(status))
    }

    /// Number of records per status, in status order.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.resources.values() {
            *counts.entry(record.status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}
