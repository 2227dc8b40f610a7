use colored::Colorize;
use infraflow_cloud::ResourceStatus;
use infraflow_core::{FileInfrastructureStore, ReconcileError, StoredState};
use std::path::Path;

pub async fn handle(infra_path: &Path) -> anyhow::Result<()> {
    let infra = FileInfrastructureStore::new(infra_path).load().await?;
    println!(
        "Infrastructure: {}/{}",
        infra.namespace().cyan(),
        infra.name().cyan()
    );

    match StoredState::decode(infra.status.state.as_ref()) {
        StoredState::Unset => {
            println!("State: {}", "none (fresh cluster)".yellow());
        }
        StoredState::Legacy(_) => {
            println!("State: {}", "legacy".yellow().bold());
            println!("  The legacy tool owns this object's cloud resources.");
        }
        StoredState::Flow(state) => {
            println!("State: {}", "flow".green().bold());
            println!("  Updated: {}", state.updated_at.to_rfc3339());
            println!("  Resources: {}", state.resources.len());
            for (key, record) in &state.resources {
                let status = match record.status {
                    ResourceStatus::Created => record.status.to_string().green(),
                    ResourceStatus::Error => record.status.to_string().red(),
                    ResourceStatus::Deleted => record.status.to_string().dimmed(),
                    _ => record.status.to_string().yellow(),
                };
                println!(
                    "    {} {} {}",
                    key.to_string().cyan(),
                    status,
                    record.cloud_id.as_deref().unwrap_or("-")
                );
                if let Some(error) = &record.last_error {
                    println!("      {}", error.red());
                }
            }
        }
        StoredState::Unrecognized(reason) => {
            println!("State: {}", "unrecognized".red().bold());
            return Err(ReconcileError::StateFormat(reason).into());
        }
    }
    Ok(())
}
