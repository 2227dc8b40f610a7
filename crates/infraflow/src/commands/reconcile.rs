use crate::utils::{compute_client, legacy_tool, load_cluster};
use colored::Colorize;
use infraflow_config::ControllerConfig;
use infraflow_core::{
    Actuator, FileInfrastructureStore, ReconcileConfig, ReconcileError, ReconcileOutcome,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum Operation {
    Reconcile,
    Delete,
}

pub async fn handle(
    config: &ControllerConfig,
    infra_path: &Path,
    cluster_path: &Path,
    project: &str,
) -> anyhow::Result<()> {
    run(config, infra_path, cluster_path, project, Operation::Reconcile).await
}

pub async fn handle_delete(
    config: &ControllerConfig,
    infra_path: &Path,
    cluster_path: &Path,
    project: &str,
) -> anyhow::Result<()> {
    run(config, infra_path, cluster_path, project, Operation::Delete).await
}

async fn run(
    config: &ControllerConfig,
    infra_path: &Path,
    cluster_path: &Path,
    project: &str,
    operation: Operation,
) -> anyhow::Result<()> {
    let store = Arc::new(FileInfrastructureStore::new(infra_path));
    let infra = store.load().await?;
    let cluster = load_cluster(Some(cluster_path))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current step");
            on_signal.cancel();
        }
    });

    let actuator = Actuator::new(
        store,
        compute_client(config, project)?,
        legacy_tool(config),
        ReconcileConfig::from_controller_config(config)?,
    )
    .with_cancellation(cancel);

    let (verb, result) = match operation {
        Operation::Reconcile => {
            println!("{}", format!("Reconciling {}...", infra_path.display()).blue());
            ("reconciled", actuator.reconcile(&infra, &cluster).await)
        }
        Operation::Delete => {
            println!("{}", format!("Deleting {}...", infra_path.display()).blue());
            ("deleted", actuator.delete(&infra, &cluster).await)
        }
    };

    match result {
        Ok(ReconcileOutcome::Flow(report)) => {
            println!("{}", report.summary());
            println!("{}", format!("✓ Infrastructure {}", verb).green().bold());
            Ok(())
        }
        Ok(ReconcileOutcome::Legacy(decision)) => {
            println!(
                "{} ({}); nothing to do",
                "Owned by the legacy tool".yellow().bold(),
                decision.reason
            );
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            Err(e.into())
        }
    }
}

fn report_failure(error: &ReconcileError) {
    if error.is_retryable() {
        eprintln!("{} {}", "✗ Pass failed, safe to retry:".yellow().bold(), error);
    } else {
        eprintln!("{} {}", "✗ Pass failed, needs attention:".red().bold(), error);
    }
}
