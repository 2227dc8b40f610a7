//! Status writes with optimistic concurrency
//!
//! Every write carries the resourceVersion last seen. On a conflict the object
//! is re-fetched and the same patch is applied again, a bounded number of
//! times.

use crate::error::{ClientError, ReconcileError, Result};
use crate::model::{Infrastructure, StatusPatch};
use async_trait::async_trait;
use infraflow_cloud::{BoxError, FlowState, FlowStatePersister};
use tokio::sync::Mutex;

/// Access to infrastructure objects and their status subresource
#[async_trait]
pub trait InfrastructureClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> std::result::Result<Infrastructure, ClientError>;

    /// Merge `patch` into the status. Fails with `ClientError::Conflict` when
    /// `expected_version` is set and no longer current.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        expected_version: Option<&str>,
        patch: &StatusPatch,
    ) -> std::result::Result<Infrastructure, ClientError>;
}

/// Persists status patches for one infrastructure object
pub struct StatusPersister<'a> {
    client: &'a dyn InfrastructureClient,
    current: Mutex<Infrastructure>,
    attempts: u32,
}

impl<'a> StatusPersister<'a> {
    pub fn new(client: &'a dyn InfrastructureClient, infra: Infrastructure, attempts: u32) -> Self {
        Self {
            client,
            current: Mutex::new(infra),
            attempts: attempts.max(1),
        }
    }

    /// Latest version of the object this persister has seen
    pub async fn current(&self) -> Infrastructure {
        self.current.lock().await.clone()
    }

    pub async fn write(&self, patch: &StatusPatch) -> Result<Infrastructure> {
        // held across the whole retry loop so writes never interleave
        let mut current = self.current.lock().await;
        let namespace = current.metadata.namespace.clone();
        let name = current.metadata.name.clone();

        for attempt in 1..=self.attempts {
            match self
                .client
                .patch_status(&namespace, &name, current.resource_version(), patch)
                .await
            {
                Ok(updated) => {
                    *current = updated.clone();
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => {
                    tracing::warn!(
                        attempt,
                        "Status update of {}/{} conflicted, re-fetching: {}",
                        namespace,
                        name,
                        e
                    );
                    *current = self.client.get(&namespace, &name).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReconcileError::PersistConflict {
            attempts: self.attempts,
        })
    }

    pub async fn write_state(&self, state: &FlowState) -> Result<Infrastructure> {
        let value = state.to_value().map_err(|e| ReconcileError::StateFormat(e.to_string()))?;
        self.write(&StatusPatch {
            provider_status: None,
            state: Some(Some(value)),
        })
        .await
    }
}

#[async_trait]
impl FlowStatePersister for StatusPersister<'_> {
    async fn persist(&self, state: &FlowState) -> std::result::Result<(), BoxError> {
        self.write_state(state).await.map(|_| ()).map_err(BoxError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InfrastructureSpec, ObjectMeta};
    use infraflow_cloud::FlowError;
    use std::sync::Mutex as StdMutex;

    /// Object store that raises a conflict for the first `conflicts` patches
    struct ConflictingClient {
        object: StdMutex<Infrastructure>,
        conflicts: StdMutex<u32>,
        gets: StdMutex<u32>,
    }

    impl ConflictingClient {
        fn new(conflicts: u32) -> Self {
            Self {
                object: StdMutex::new(infra("1")),
                conflicts: StdMutex::new(conflicts),
                gets: StdMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl InfrastructureClient for ConflictingClient {
        async fn get(&self, _ns: &str, _name: &str) -> std::result::Result<Infrastructure, ClientError> {
            *self.gets.lock().unwrap() += 1;
            Ok(self.object.lock().unwrap().clone())
        }

        async fn patch_status(
            &self,
            _ns: &str,
            _name: &str,
            expected_version: Option<&str>,
            patch: &StatusPatch,
        ) -> std::result::Result<Infrastructure, ClientError> {
            let mut conflicts = self.conflicts.lock().unwrap();
            let mut object = self.object.lock().unwrap();
            if *conflicts > 0 {
                *conflicts -= 1;
                // someone else wrote in between
                let bumped = object.resource_version().unwrap_or("0").parse::<u64>().unwrap() + 1;
                object.metadata.resource_version = Some(bumped.to_string());
                return Err(ClientError::Conflict {
                    expected: expected_version.unwrap_or_default().to_string(),
                    actual: bumped.to_string(),
                });
            }
            assert_eq!(expected_version, object.resource_version());
            patch.apply(&mut object.status);
            Ok(object.clone())
        }
    }

    fn infra(version: &str) -> Infrastructure {
        Infrastructure {
            api_version: String::new(),
            kind: String::new(),
            metadata: ObjectMeta {
                name: "app".into(),
                namespace: "shoot--dev--app".into(),
                resource_version: Some(version.into()),
                ..Default::default()
            },
            spec: InfrastructureSpec::default(),
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_after_refetch() {
        let client = ConflictingClient::new(2);
        let persister = StatusPersister::new(&client, infra("1"), 5);

        persister.persist(&FlowState::new()).await.unwrap();

        assert_eq!(*client.gets.lock().unwrap(), 2);
        assert!(client.object.lock().unwrap().status.state.is_some());
        assert_eq!(persister.current().await.resource_version(), Some("3"));
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_attempts() {
        let client = ConflictingClient::new(10);
        let persister = StatusPersister::new(&client, infra("1"), 3);

        let err = persister
            .write(&StatusPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::PersistConflict { attempts: 3 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_conflicts_during_flow_surface_as_persist_conflict() {
        let client = ConflictingClient::new(10);
        let persister = StatusPersister::new(&client, infra("1"), 2);

        // the executor wraps persister failures like this
        let flow_error = persister
            .persist(&FlowState::new())
            .await
            .map_err(FlowError::Persist)
            .unwrap_err();

        let err = ReconcileError::from(flow_error);
        assert!(matches!(err, ReconcileError::PersistConflict { attempts: 2 }));
        assert!(err.is_retryable());
    }
}
