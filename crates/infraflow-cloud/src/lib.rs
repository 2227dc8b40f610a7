//! infraflow cloud engine
//!
//! Cloud-agnostic pieces of the flow-based infrastructure reconciler:
//! the persisted flow state, the dependency-ordered task graph, its resumable
//! executor, and the pruning rule for cloud-side collections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 infraflow-core                  │
//! │        (backend selection, actuator)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               infraflow-cloud                   │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │  TaskGraph   │  │  FlowState   │             │
//! │  └──────┬───────┘  └──────▲───────┘             │
//! │         │   ┌──────────┐  │ persist after every │
//! │         └──►│ Executor ├──┘ transition          │
//! │             └────┬─────┘                        │
//! └──────────────────┼──────────────────────────────┘
//!                    │ trait Task
//! ┌──────────────────▼──────────────────────────────┐
//! │   infraflow-gcp (network, subnets, NAT, ...)    │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod executor;
pub mod graph;
pub mod report;
pub mod retry;
pub mod state;
pub mod sync;

// Re-exports
pub use error::{BoxError, CloudError, FlowError, Result, StateError};
pub use executor::{BoxTask, Executor, FlowStatePersister, Task};
pub use graph::{TaskGraph, TaskGraphBuilder, TaskNode};
pub use report::{Blocked, ExecutionMode, ExecutionReport, ReportSummary, StepFailure};
pub use retry::{RetryConfig, retry_with_backoff};
pub use state::{
    FLOW_STATE_API_VERSION, FLOW_STATE_KIND, FlowState, ResourceKey, ResourceRecord,
    ResourceStatus, SCHEMA_VERSION, TypeMeta,
};
pub use sync::{NetworkScoped, OwnershipRule, network_name, resources_to_delete, same_network};
