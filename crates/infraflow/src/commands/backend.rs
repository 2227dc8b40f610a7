use crate::utils::load_cluster;
use colored::Colorize;
use infraflow_config::ControllerConfig;
use infraflow_core::{
    Backend, ClusterIdentity, FileInfrastructureStore, SelectorKeys, StoredState, select_backend,
};
use std::path::Path;

pub async fn handle(
    config: &ControllerConfig,
    infra_path: &Path,
    cluster_path: Option<&Path>,
) -> anyhow::Result<()> {
    let infra = FileInfrastructureStore::new(infra_path).load().await?;
    let cluster = load_cluster(cluster_path)?;

    let stored = StoredState::decode(infra.status.state.as_ref()).into_result()?;
    // the project plays no part in the decision
    let identity = ClusterIdentity::new(&infra, &cluster, "");
    let decision = select_backend(&identity, &stored, &SelectorKeys::from(&config.selector));

    let backend = match decision.backend {
        Backend::Flow => decision.backend.to_string().green().bold(),
        Backend::Legacy => decision.backend.to_string().yellow().bold(),
    };
    println!("Cluster: {}", identity.name.cyan());
    println!("State: {}", stored.describe());
    println!("Backend: {} ({})", backend, decision.reason);
    Ok(())
}
