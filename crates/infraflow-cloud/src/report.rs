//! Outcome of one executor run

use crate::error::{CloudError, FlowError};
use crate::state::ResourceKey;

/// Direction of an executor run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Apply,
    Teardown,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Apply => write!(f, "apply"),
            ExecutionMode::Teardown => write!(f, "teardown"),
        }
    }
}

/// A record that could not run because prerequisites are not done yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub key: ResourceKey,
    pub waiting_on: Vec<ResourceKey>,
}

/// A step whose cloud call failed during this run
#[derive(Debug)]
pub struct StepFailure {
    pub key: ResourceKey,
    pub error: CloudError,
}

/// Result of running the task graph once
#[derive(Debug)]
pub struct ExecutionReport {
    pub mode: ExecutionMode,

    /// Records that reached their target status in this run
    pub changed: Vec<ResourceKey>,

    /// Records already at their target status; no cloud call was made
    pub unchanged: Vec<ResourceKey>,

    /// Records not yet eligible to run
    pub blocked: Vec<Blocked>,

    /// Records whose step failed; they are left in `Error`
    pub failed: Vec<StepFailure>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            changed: Vec::new(),
            unchanged: Vec::new(),
            blocked: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Turn the first failure into an error; a run that only reports blocked
    /// records is not an error by itself.
    pub fn into_result(mut self) -> Result<Self, FlowError> {
        if self.failed.is_empty() {
            return Ok(self);
        }
        let first = self.failed.remove(0);
        Err(FlowError::Step {
            key: first.key,
            source: first.error,
        })
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            mode: self.mode,
            changed: self.changed.len(),
            unchanged: self.unchanged.len(),
            blocked: self.blocked.len(),
            failed: self.failed.len(),
        }
    }
}

/// Counts of an execution report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub mode: ExecutionMode,
    pub changed: usize,
    pub unchanged: usize,
    pub blocked: usize,
    pub failed: usize,
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = match self.mode {
            ExecutionMode::Apply => "created",
            ExecutionMode::Teardown => "deleted",
        };
        write!(
            f,
            "{}: {} {}, {} unchanged, {} blocked, {} failed",
            self.mode, self.changed, verb, self.unchanged, self.blocked, self.failed
        )
    }
}
