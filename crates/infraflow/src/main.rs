mod commands;
mod legacy_tool;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infraflow")]
#[command(about = "Flow-based GCP infrastructure reconciler", long_about = None)]
struct Cli {
    /// Controller config file (default: discovered, see INFRAFLOW_CONFIG_PATH)
    #[arg(long, global = true, env = "INFRAFLOW_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the persisted state of an infrastructure object
    State {
        /// Infrastructure object (JSON)
        infra: PathBuf,
    },
    /// Show which backend would reconcile an infrastructure object
    Backend {
        /// Infrastructure object (JSON)
        infra: PathBuf,
        /// Shoot and seed of the object (JSON)
        #[arg(long)]
        cluster: Option<PathBuf>,
    },
    /// Reconcile the infrastructure of a cluster
    Reconcile {
        /// Infrastructure object (JSON); status is written back to it
        infra: PathBuf,
        /// Shoot and seed of the object (JSON)
        #[arg(long)]
        cluster: PathBuf,
        /// GCP project
        #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
        project: String,
    },
    /// Delete the infrastructure of a cluster
    Delete {
        /// Infrastructure object (JSON); status is written back to it
        infra: PathBuf,
        /// Shoot and seed of the object (JSON)
        #[arg(long)]
        cluster: PathBuf,
        /// GCP project
        #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
        project: String,
    },
    /// Show which firewall rules a prune would delete, without deleting
    #[command(name = "firewall-plan")]
    FirewallPlan {
        /// GCP project
        #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
        project: String,
        /// Technical cluster name (rule prefix)
        #[arg(long)]
        cluster_name: String,
        /// VPC the rules must belong to
        #[arg(long)]
        network: String,
        /// Rule names to keep (default: the cluster's managed rules)
        #[arg(long = "keep")]
        keep: Vec<String>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("infraflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => infraflow_config::ControllerConfig::load(path)?,
        None => infraflow_config::load_or_default()?,
    };

    match cli.command {
        Commands::State { infra } => {
            commands::state::handle(&infra).await?;
        }
        Commands::Backend { infra, cluster } => {
            commands::backend::handle(&config, &infra, cluster.as_deref()).await?;
        }
        Commands::Reconcile {
            infra,
            cluster,
            project,
        } => {
            commands::reconcile::handle(&config, &infra, &cluster, &project).await?;
        }
        Commands::Delete {
            infra,
            cluster,
            project,
        } => {
            commands::reconcile::handle_delete(&config, &infra, &cluster, &project).await?;
        }
        Commands::FirewallPlan {
            project,
            cluster_name,
            network,
            keep,
        } => {
            commands::firewall_plan::handle(&config, &project, &cluster_name, &network, keep)
                .await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
