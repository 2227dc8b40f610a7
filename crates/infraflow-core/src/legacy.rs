//! Release of the legacy infrastructure tool
//!
//! Once the flow engine owns an object, the legacy tool's configuration is
//! cleaned up and its finalizer removed. Both steps are idempotent and run
//! after every successful flow pass.

use crate::error::{LegacyStage, ReconcileError, Result};
use crate::model::Infrastructure;
use async_trait::async_trait;
use infraflow_cloud::BoxError;

/// The two operations of the legacy tool this system uses
#[async_trait]
pub trait LegacyTool: Send + Sync {
    /// Remove the tool's configuration and state objects for `infra`.
    async fn cleanup_configuration(&self, infra: &Infrastructure) -> std::result::Result<(), BoxError>;

    /// Remove the finalizer the tool put on its configuration.
    async fn remove_finalizer(&self, infra: &Infrastructure) -> std::result::Result<(), BoxError>;
}

/// Used when no legacy tool is configured; there is nothing to release.
pub struct NoopLegacyTool;

#[async_trait]
impl LegacyTool for NoopLegacyTool {
    async fn cleanup_configuration(&self, infra: &Infrastructure) -> std::result::Result<(), BoxError> {
        tracing::debug!("No legacy tool configured, skipping cleanup of {}", infra.name());
        Ok(())
    }

    async fn remove_finalizer(&self, _infra: &Infrastructure) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

/// Clean up, then remove the finalizer. A failed cleanup skips finalizer
/// removal; either failure is reported with its stage.
pub async fn release_legacy_tool(tool: &dyn LegacyTool, infra: &Infrastructure) -> Result<()> {
    tracing::info!("Releasing legacy tool resources of {}", infra.name());

    tool.cleanup_configuration(infra)
        .await
        .map_err(|e| ReconcileError::LegacyBridge {
            stage: LegacyStage::Cleanup,
            message: e.to_string(),
        })?;

    tool.remove_finalizer(infra)
        .await
        .map_err(|e| ReconcileError::LegacyBridge {
            stage: LegacyStage::RemoveFinalizer,
            message: e.to_string(),
        })?;

    tracing::debug!("Legacy tool released for {}", infra.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InfrastructureSpec, ObjectMeta};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTool {
        calls: Mutex<Vec<&'static str>>,
        fail_cleanup: bool,
        fail_finalizer: bool,
    }

    #[async_trait]
    impl LegacyTool for ScriptedTool {
        async fn cleanup_configuration(&self, _infra: &Infrastructure) -> std::result::Result<(), BoxError> {
            self.calls.lock().unwrap().push("cleanup");
            if self.fail_cleanup {
                return Err("configmap locked".into());
            }
            Ok(())
        }

        async fn remove_finalizer(&self, _infra: &Infrastructure) -> std::result::Result<(), BoxError> {
            self.calls.lock().unwrap().push("remove-finalizer");
            if self.fail_finalizer {
                return Err("patch rejected".into());
            }
            Ok(())
        }
    }

    fn infra() -> Infrastructure {
        Infrastructure {
            api_version: String::new(),
            kind: String::new(),
            metadata: ObjectMeta {
                name: "app".into(),
                namespace: "shoot--dev--app".into(),
                ..Default::default()
            },
            spec: InfrastructureSpec::default(),
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_cleanup_then_finalizer() {
        let tool = ScriptedTool::default();
        release_legacy_tool(&tool, &infra()).await.unwrap();
        assert_eq!(*tool.calls.lock().unwrap(), vec!["cleanup", "remove-finalizer"]);
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_finalizer() {
        let tool = ScriptedTool {
            fail_cleanup: true,
            ..Default::default()
        };
        let err = release_legacy_tool(&tool, &infra()).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::LegacyBridge {
                stage: LegacyStage::Cleanup,
                ..
            }
        ));
        assert_eq!(*tool.calls.lock().unwrap(), vec!["cleanup"]);
    }

    #[tokio::test]
    async fn test_finalizer_failure_is_surfaced() {
        let tool = ScriptedTool {
            fail_finalizer: true,
            ..Default::default()
        };
        let err = release_legacy_tool(&tool, &infra()).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::LegacyBridge {
                stage: LegacyStage::RemoveFinalizer,
                ..
            }
        ));
        assert!(err.is_retryable());
    }
}
