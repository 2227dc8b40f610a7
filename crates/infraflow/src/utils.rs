use crate::legacy_tool::CommandLegacyTool;
use anyhow::Context;
use infraflow_config::ControllerConfig;
use infraflow_core::{Cluster, LegacyTool, NoopLegacyTool};
use infraflow_gcp::{ComputeClient, GcpApiConfig, GcpComputeApi};
use std::path::Path;
use std::sync::Arc;

/// Read the shoot and seed of a cluster; none given means no markers.
pub fn load_cluster(path: Option<&Path>) -> anyhow::Result<Cluster> {
    let Some(path) = path else {
        return Ok(Cluster::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Compute API client for `project`, honouring the configured endpoint.
pub fn compute_client(config: &ControllerConfig, project: &str) -> anyhow::Result<Arc<dyn ComputeClient>> {
    let mut api_config = GcpApiConfig::from_env(project)?;
    if let Some(endpoint) = &config.gcp.endpoint {
        api_config = api_config.with_endpoint(endpoint);
    }
    Ok(Arc::new(GcpComputeApi::new(api_config)?))
}

pub fn legacy_tool(config: &ControllerConfig) -> Arc<dyn LegacyTool> {
    match &config.legacy_tool {
        Some(tool) => Arc::new(CommandLegacyTool::new(&tool.command, tool.args.clone())),
        None => Arc::new(NoopLegacyTool),
    }
}
