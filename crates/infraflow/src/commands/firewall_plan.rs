use crate::utils::compute_client;
use colored::Colorize;
use infraflow_config::ControllerConfig;
use infraflow_core::ReconcileConfig;
use infraflow_gcp::{
    InfrastructureConfig, ResourceNames, firewall_rules_to_delete, managed_rule_names,
};
use std::collections::HashSet;

/// Names the prune keeps: the given ones, or the cluster's managed rules.
fn desired_names(cluster_name: &str, keep: Vec<String>) -> HashSet<String> {
    if keep.is_empty() {
        managed_rule_names(&ResourceNames::new(
            cluster_name,
            &InfrastructureConfig::default(),
        ))
    } else {
        keep.into_iter().collect()
    }
}

pub async fn handle(
    config: &ControllerConfig,
    project: &str,
    cluster_name: &str,
    network: &str,
    keep: Vec<String>,
) -> anyhow::Result<()> {
    let policy = ReconcileConfig::from_controller_config(config)?.prune_policy;
    let compute = compute_client(config, project)?;
    let live = compute.list_firewalls().await?;
    let desired = desired_names(cluster_name, keep);

    let stale = firewall_rules_to_delete(&live, cluster_name, network, &desired, policy);

    println!(
        "Network {} ({} rules in project, policy {})",
        network.cyan(),
        live.len(),
        policy
    );
    if stale.is_empty() {
        println!("{}", "✓ Nothing to prune".green());
        return Ok(());
    }
    println!("Would delete {} rules:", stale.len());
    for rule in stale {
        println!("  - {}", rule.name.red());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keeps_managed_rules() {
        let desired = desired_names("shoot--dev--app", vec![]);
        assert_eq!(desired.len(), 3);
        assert!(desired.contains("shoot--dev--app-allow-internal-access"));
        assert!(desired.contains("shoot--dev--app-allow-health-checks"));
    }

    #[test]
    fn test_explicit_keep_replaces_default() {
        let desired = desired_names("shoot--dev--app", vec!["shoot--dev--app-custom".into()]);
        assert_eq!(
            desired,
            HashSet::from(["shoot--dev--app-custom".to_string()])
        );
    }
}
