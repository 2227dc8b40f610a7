pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "INFRAFLOW_CONFIG_PATH";

const DEFAULT_FORCE_LEGACY_ANNOTATION: &str = "gcp.provider.extensions.gardener.cloud/use-terraform";
const DEFAULT_USE_FLOW_ANNOTATION: &str = "gcp.provider.extensions.gardener.cloud/use-flow";
const DEFAULT_SEED_USE_FLOW_LABEL: &str = "gcp.provider.extensions.gardener.cloud/use-flow";

/// Controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    pub selector: SelectorConfig,
    pub firewall: FirewallConfig,
    pub retry: RetrySettings,

    /// Attempts for a status write that hits a version conflict
    pub persist_retry_attempts: PersistRetryAttempts,

    pub gcp: GcpSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_tool: Option<LegacyToolConfig>,
}

/// Annotation and label keys that pick the reconciliation backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorConfig {
    pub force_legacy_annotation: String,
    pub use_flow_annotation: String,
    pub seed_use_flow_label: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            force_legacy_annotation: DEFAULT_FORCE_LEGACY_ANNOTATION.to_string(),
            use_flow_annotation: DEFAULT_USE_FLOW_ANNOTATION.to_string(),
            seed_use_flow_label: DEFAULT_SEED_USE_FLOW_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FirewallConfig {
    /// `clusterPrefix` or `includeKubernetesManaged`
    pub prune_policy: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            prune_policy: "clusterPrefix".to_string(),
        }
    }
}

/// Local retries of transient cloud errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistRetryAttempts(pub u32);

impl Default for PersistRetryAttempts {
    fn default() -> Self {
        Self(5)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GcpSettings {
    /// Compute API base URL override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// External command implementing the legacy tool's cleanup contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyToolConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl ControllerConfig {
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self> {
        let config: ControllerConfig =
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw, path)
    }

    pub fn validate(&self) -> Result<()> {
        let selector = &self.selector;
        for (field, value) in [
            ("selector.forceLegacyAnnotation", &selector.force_legacy_annotation),
            ("selector.useFlowAnnotation", &selector.use_flow_annotation),
            ("selector.seedUseFlowLabel", &selector.seed_use_flow_label),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
        }

        if !matches!(
            self.firewall.prune_policy.as_str(),
            "clusterPrefix" | "includeKubernetesManaged"
        ) {
            return Err(ConfigError::Invalid(format!(
                "unknown firewall.prunePolicy '{}'",
                self.firewall.prune_policy
            )));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoffMultiplier must be at least 1.0".to_string(),
            ));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.initialDelayMs exceeds retry.maxDelayMs".to_string(),
            ));
        }
        if self.persist_retry_attempts.0 == 0 {
            return Err(ConfigError::Invalid(
                "persistRetryAttempts must be at least 1".to_string(),
            ));
        }
        if let Some(tool) = &self.legacy_tool
            && tool.command.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "legacyTool.command must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Find the controller config file.
///
/// Search order:
/// 1. `INFRAFLOW_CONFIG_PATH` environment variable
/// 2. current directory: `infraflow.yaml`, `.infraflow.yaml`
/// 3. `~/.config/infraflow/config.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to missing file {}", CONFIG_PATH_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    for filename in ["infraflow.yaml", ".infraflow.yaml"] {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("infraflow").join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load the config file if one exists, otherwise the built-in defaults.
pub fn load_or_default() -> Result<ControllerConfig> {
    match find_config_file() {
        Ok(path) => {
            tracing::debug!("Loading config from {}", path.display());
            ControllerConfig::load(&path)
        }
        Err(ConfigError::ConfigFileNotFound) => Ok(ControllerConfig::default()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.firewall.prune_policy, "clusterPrefix");
        assert_eq!(config.persist_retry_attempts.0, 5);
        assert_eq!(
            config.selector.use_flow_annotation,
            "gcp.provider.extensions.gardener.cloud/use-flow"
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let raw = "firewall:\n  prunePolicy: includeKubernetesManaged\nretry:\n  maxAttempts: 7\n";
        let config = ControllerConfig::from_yaml(raw, Path::new("test.yaml")).unwrap();
        assert_eq!(config.firewall.prune_policy, "includeKubernetesManaged");
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.selector, SelectorConfig::default());
    }

    #[test]
    fn test_legacy_tool_section() {
        let raw = "legacyTool:\n  command: terraformer-cleanup\n  args: [\"--kubeconfig\", \"/etc/kube\"]\n";
        let config = ControllerConfig::from_yaml(raw, Path::new("test.yaml")).unwrap();
        let tool = config.legacy_tool.unwrap();
        assert_eq!(tool.command, "terraformer-cleanup");
        assert_eq!(tool.args.len(), 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for raw in [
            "firewall:\n  prunePolicy: everything\n",
            "retry:\n  maxAttempts: 0\n",
            "retry:\n  initialDelayMs: 5000\n  maxDelayMs: 10\n",
            "persistRetryAttempts: 0\n",
            "selector:\n  useFlowAnnotation: \"\"\n",
        ] {
            let result = ControllerConfig::from_yaml(raw, Path::new("test.yaml"));
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "accepted: {}",
                raw
            );
        }
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = ControllerConfig::from_yaml("retry: [", Path::new("broken.yaml")).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("infraflow.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap();
        assert!(result.ends_with("infraflow.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_visible_file_before_hidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join(".infraflow.yaml"), "{}").unwrap();
        fs::write(temp_dir.path().join("infraflow.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap();
        assert!(result.ends_with("infraflow.yaml"));
        assert!(!result.ends_with(".infraflow.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "persistRetryAttempts: 2\n").unwrap();

        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        }

        let result = find_config_file().unwrap();
        assert_eq!(result, config_path);
        assert_eq!(load_or_default().unwrap().persist_retry_attempts.0, 2);

        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_load_or_default_without_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        let original_home = std::env::var_os("HOME");
        let original_xdg = std::env::var_os("XDG_CONFIG_HOME");

        std::env::set_current_dir(&temp_dir).unwrap();
        unsafe {
            std::env::set_var("HOME", temp_dir.path());
            std::env::set_var("XDG_CONFIG_HOME", temp_dir.path().join(".config"));
        }

        assert!(matches!(
            find_config_file(),
            Err(ConfigError::ConfigFileNotFound)
        ));
        assert_eq!(load_or_default().unwrap(), ControllerConfig::default());

        unsafe {
            match original_home {
                Some(home) => std::env::set_var("HOME", home),
                None => std::env::remove_var("HOME"),
            }
            match original_xdg {
                Some(xdg) => std::env::set_var("XDG_CONFIG_HOME", xdg),
                None => std::env::remove_var("XDG_CONFIG_HOME"),
            }
        }
        std::env::set_current_dir(original_dir).unwrap();
    }
}
