//! File-backed infrastructure object store
//!
//! Keeps one infrastructure object as JSON on disk. Every write bumps
//! `metadata.resourceVersion` and keeps the previous file as `<path>.backup`.

use crate::error::ClientError;
use crate::model::{Infrastructure, StatusPatch};
use crate::status::InfrastructureClient;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

type Result<T> = std::result::Result<T, ClientError>;

pub struct FileInfrastructureStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileInfrastructureStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// Load the stored object
    pub async fn load(&self) -> Result<Infrastructure> {
        if !self.path.exists() {
            return Err(ClientError::NotFound(self.path.display().to_string()));
        }

        let content = fs::read_to_string(&self.path).await?;
        let infra: Infrastructure = serde_json::from_str(&content)?;

        tracing::debug!(
            "Loaded {}/{} at resourceVersion {:?}",
            infra.namespace(),
            infra.name(),
            infra.resource_version()
        );
        Ok(infra)
    }

    /// Write `infra` as is
    pub async fn save(&self, infra: &Infrastructure) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            fs::create_dir_all(dir).await?;
        }

        let backup = self.backup_path();
        if self.path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&self.path, &backup).await?;
            tracing::debug!("Created backup {}", backup.display());
        }

        let content = serde_json::to_string_pretty(infra)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Store a new object at resourceVersion 1, replacing whatever was there
    pub async fn create(&self, mut infra: Infrastructure) -> Result<Infrastructure> {
        let _guard = self.write_lock.lock().await;
        infra.metadata.resource_version = Some("1".to_string());
        self.save(&infra).await?;
        Ok(infra)
    }

    async fn load_named(&self, namespace: &str, name: &str) -> Result<Infrastructure> {
        let infra = self.load().await?;
        if infra.namespace() != namespace || infra.name() != name {
            return Err(ClientError::NotFound(format!("{}/{}", namespace, name)));
        }
        Ok(infra)
    }
}

fn next_version(current: Option<&str>) -> String {
    let n = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (n + 1).to_string()
}

#[async_trait]
impl InfrastructureClient for FileInfrastructureStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Infrastructure> {
        self.load_named(namespace, name).await
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: Option<&str>,
        patch: &StatusPatch,
    ) -> Result<Infrastructure> {
        let _guard = self.write_lock.lock().await;
        let mut infra = self.load_named(namespace, name).await?;

        if let Some(expected) = expected_version
            && infra.resource_version() != Some(expected)
        {
            return Err(ClientError::Conflict {
                expected: expected.to_string(),
                actual: infra.resource_version().unwrap_or_default().to_string(),
            });
        }

        patch.apply(&mut infra.status);
        infra.metadata.resource_version = Some(next_version(infra.resource_version()));
        self.save(&infra).await?;

        tracing::debug!(
            "Patched status of {}/{}, now at resourceVersion {:?}",
            namespace,
            name,
            infra.resource_version()
        );
        Ok(infra)
    }
}
