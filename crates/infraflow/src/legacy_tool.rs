//! Legacy tool driven through an external command
//!
//! Runs `<command> [args...] <operation> --namespace <ns> --name <name>` where
//! the operation is `cleanup` or `remove-finalizer`. A non-zero exit status is
//! a failure carrying the command's stderr.

use async_trait::async_trait;
use infraflow_cloud::BoxError;
use infraflow_core::{Infrastructure, LegacyTool};
use tokio::process::Command;

pub struct CommandLegacyTool {
    command: String,
    args: Vec<String>,
}

impl CommandLegacyTool {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    async fn run(&self, operation: &str, infra: &Infrastructure) -> Result<(), BoxError> {
        tracing::debug!(
            "Running {} {} for {}/{}",
            self.command,
            operation,
            infra.namespace(),
            infra.name()
        );

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(operation)
            .arg("--namespace")
            .arg(infra.namespace())
            .arg("--name")
            .arg(infra.name())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.command, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} {} exited with {}: {}",
                self.command,
                operation,
                output.status,
                stderr.trim()
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl LegacyTool for CommandLegacyTool {
    async fn cleanup_configuration(&self, infra: &Infrastructure) -> Result<(), BoxError> {
        self.run("cleanup", infra).await
    }

    async fn remove_finalizer(&self, infra: &Infrastructure) -> Result<(), BoxError> {
        self.run("remove-finalizer", infra).await
    }
}
