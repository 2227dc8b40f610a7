//! Backend selection
//!
//! Decides per pass whether the flow engine or the legacy tool owns a
//! cluster's infrastructure. The decision is recomputed every time and never
//! persisted.

use crate::codec::StoredState;
use crate::model::ClusterIdentity;
use infraflow_config::SelectorConfig;
use std::fmt;

/// Reconciliation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Flow,
    Legacy,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Flow => write!(f, "flow"),
            Backend::Legacy => write!(f, "legacy"),
        }
    }
}

/// Signal that decided the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    ForceLegacyMarker,
    ExistingFlowState,
    UseFlowMarker,
    SeedDefault,
    Default,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::ForceLegacyMarker => "force-legacy annotation",
            Reason::ExistingFlowState => "existing flow state",
            Reason::UseFlowMarker => "use-flow annotation",
            Reason::SeedDefault => "seed use-flow label",
            Reason::Default => "default",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub backend: Backend,
    pub reason: Reason,
}

impl Decision {
    fn new(backend: Backend, reason: Reason) -> Self {
        Self { backend, reason }
    }

    pub fn is_flow(&self) -> bool {
        self.backend == Backend::Flow
    }
}

/// Annotation and label keys the selector reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorKeys {
    pub force_legacy_annotation: String,
    pub use_flow_annotation: String,
    pub seed_use_flow_label: String,
}

impl From<&SelectorConfig> for SelectorKeys {
    fn from(config: &SelectorConfig) -> Self {
        Self {
            force_legacy_annotation: config.force_legacy_annotation.clone(),
            use_flow_annotation: config.use_flow_annotation.clone(),
            seed_use_flow_label: config.seed_use_flow_label.clone(),
        }
    }
}

impl Default for SelectorKeys {
    fn default() -> Self {
        Self::from(&SelectorConfig::default())
    }
}

/// Pick the backend. Precedence, highest first:
///
/// 1. force-legacy marker on the infrastructure object or shoot
/// 2. an existing flow state (migration is sticky)
/// 3. use-flow marker on the infrastructure object or shoot
/// 4. use-flow label on the seed
/// 5. legacy
pub fn select_backend(
    identity: &ClusterIdentity,
    state: &StoredState,
    keys: &SelectorKeys,
) -> Decision {
    if identity.has_object_marker(&keys.force_legacy_annotation) {
        return Decision::new(Backend::Legacy, Reason::ForceLegacyMarker);
    }
    if state.is_flow() {
        return Decision::new(Backend::Flow, Reason::ExistingFlowState);
    }
    if identity.has_object_marker(&keys.use_flow_annotation) {
        return Decision::new(Backend::Flow, Reason::UseFlowMarker);
    }
    if identity.seed_has_label(&keys.seed_use_flow_label) {
        return Decision::new(Backend::Flow, Reason::SeedDefault);
    }
    Decision::new(Backend::Legacy, Reason::Default)
}
