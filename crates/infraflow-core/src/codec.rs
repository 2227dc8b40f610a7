//! Classification of the persisted state blob
//!
//! The type discriminator is read first. A flow-native document is decoded in
//! full; anything else must be a legacy document with a populated
//! `terraformState` section. The result is decoded once into [`StoredState`].

use crate::error::{ReconcileError, Result};
use infraflow_cloud::{FlowState, TypeMeta};
use serde::{Deserialize, Serialize};

/// Legacy tool state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyState {
    #[serde(default)]
    pub terraform_state: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LegacyState {
    /// Whether the embedded legacy tool state carries anything.
    pub fn is_populated(&self) -> bool {
        match &self.terraform_state {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

/// Persisted state, classified
#[derive(Debug, Clone, PartialEq)]
pub enum StoredState {
    /// No state yet: a fresh cluster
    Unset,
    Flow(FlowState),
    Legacy(LegacyState),
    /// Neither format; carries the reason
    Unrecognized(String),
}

impl StoredState {
    pub fn decode(raw: Option<&serde_json::Value>) -> Self {
        match raw {
            None | Some(serde_json::Value::Null) => StoredState::Unset,
            Some(value) => match serde_json::to_vec(value) {
                Ok(bytes) => Self::decode_bytes(&bytes),
                Err(e) => StoredState::Unrecognized(e.to_string()),
            },
        }
    }

    pub fn decode_bytes(raw: &[u8]) -> Self {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return StoredState::Unset;
        }

        let meta = match TypeMeta::peek(raw) {
            Ok(meta) => meta,
            Err(e) => return StoredState::Unrecognized(e.to_string()),
        };

        if meta.is_flow_state() {
            return match FlowState::from_json(raw) {
                Ok(state) => StoredState::Flow(state),
                Err(e) => StoredState::Unrecognized(e.to_string()),
            };
        }

        match serde_json::from_slice::<LegacyState>(raw) {
            Ok(legacy) if legacy.is_populated() => StoredState::Legacy(legacy),
            Ok(_) => StoredState::Unrecognized(format!(
                "no flow state type (apiVersion {:?}) and no legacy tool state",
                meta.api_version.unwrap_or_default()
            )),
            Err(e) => StoredState::Unrecognized(e.to_string()),
        }
    }

    /// Fail on an unrecognized document.
    pub fn into_result(self) -> Result<Self> {
        match self {
            StoredState::Unrecognized(reason) => Err(ReconcileError::StateFormat(reason)),
            other => Ok(other),
        }
    }

    pub fn is_flow(&self) -> bool {
        matches!(self, StoredState::Flow(_))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, StoredState::Legacy(_))
    }

    pub fn flow_state(&self) -> Option<&FlowState> {
        match self {
            StoredState::Flow(state) => Some(state),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            StoredState::Unset => "unset",
            StoredState::Flow(_) => "flow",
            StoredState::Legacy(_) => "legacy",
            StoredState::Unrecognized(_) => "unrecognized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infraflow_cloud::{FLOW_STATE_API_VERSION, ResourceKey};
    use serde_json::json;

    #[test]
    fn test_absent_state_is_unset() {
        assert_eq!(StoredState::decode(None), StoredState::Unset);
        assert_eq!(
            StoredState::decode(Some(&serde_json::Value::Null)),
            StoredState::Unset
        );
        assert_eq!(StoredState::decode_bytes(b"  "), StoredState::Unset);
    }

    #[test]
    fn test_flow_state_decoded() {
        let mut flow = FlowState::new();
        flow.ensure_record(&ResourceKey::new("network", "vpc"), &[]);
        let value = flow.to_value().unwrap();

        let stored = StoredState::decode(Some(&value)).into_result().unwrap();
        assert!(stored.is_flow());
        assert_eq!(stored.flow_state().unwrap().resources.len(), 1);
    }

    #[test]
    fn test_legacy_state_classified_as_legacy() {
        let value = json!({
            "terraformState": {"version": 4, "resources": []},
            "routes": []
        });
        let stored = StoredState::decode(Some(&value)).into_result().unwrap();
        assert!(stored.is_legacy());
    }

    #[test]
    fn test_empty_legacy_section_is_not_legacy() {
        for value in [
            json!({"terraformState": null}),
            json!({"terraformState": {}}),
            json!({"terraformState": ""}),
            json!({}),
        ] {
            let stored = StoredState::decode(Some(&value));
            assert!(
                matches!(stored, StoredState::Unrecognized(_)),
                "{} classified as {}",
                value,
                stored.describe()
            );
        }
    }

    #[test]
    fn test_unknown_document_is_state_format_error() {
        let value = json!({"apiVersion": "example.com/v1", "kind": "Something", "spec": {}});
        let err = StoredState::decode(Some(&value)).into_result().unwrap_err();
        assert!(matches!(err, ReconcileError::StateFormat(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_non_object_is_unrecognized() {
        let value = json!([1, 2, 3]);
        assert!(matches!(
            StoredState::decode(Some(&value)),
            StoredState::Unrecognized(_)
        ));
    }

    #[test]
    fn test_newer_flow_schema_is_unrecognized() {
        let value = json!({
            "apiVersion": FLOW_STATE_API_VERSION,
            "kind": "FlowState",
            "schemaVersion": 99
        });
        assert!(matches!(
            StoredState::decode(Some(&value)),
            StoredState::Unrecognized(_)
        ));
    }
}
