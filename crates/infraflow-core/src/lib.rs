//! infraflow core
//!
//! Per-cluster reconciliation logic on top of the flow engine:
//!
//! - [`codec`]: classify the persisted state blob (flow, legacy, unset)
//! - [`selector`]: pick the flow engine or the legacy tool for a pass
//! - [`legacy`]: release the legacy tool once the flow engine owns an object
//! - [`status`]: status writes with optimistic concurrency
//! - [`store`]: a file-backed infrastructure object store
//! - [`actuator`]: the reconcile and delete entry points

pub mod actuator;
pub mod codec;
pub mod error;
pub mod legacy;
pub mod model;
pub mod selector;
pub mod status;
pub mod store;

pub use actuator::{Actuator, ReconcileConfig, ReconcileOutcome};
pub use codec::{LegacyState, StoredState};
pub use error::{ClientError, LegacyStage, ReconcileError, Result};
pub use legacy::{LegacyTool, NoopLegacyTool, release_legacy_tool};
pub use model::{
    Cluster, ClusterIdentity, Infrastructure, InfrastructureSpec, InfrastructureStatus,
    Networking, ObjectMeta, Seed, Shoot, ShootSpec, StatusPatch,
};
pub use selector::{Backend, Decision, Reason, SelectorKeys, select_backend};
pub use status::{InfrastructureClient, StatusPersister};
pub use store::FileInfrastructureStore;
