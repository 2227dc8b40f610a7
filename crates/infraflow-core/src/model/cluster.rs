use super::infrastructure::{Infrastructure, ObjectMeta};
use serde::{Deserialize, Serialize};

/// The shoot and seed objects surrounding an infrastructure object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<Shoot>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<Seed>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shoot {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ShootSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShootSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<Networking>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Networking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<String>,
}

/// Management cluster hosting the shoot's control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub metadata: ObjectMeta,
}

impl Cluster {
    pub fn pods_cidr(&self) -> Option<&str> {
        self.shoot
            .as_ref()
            .and_then(|s| s.spec.networking.as_ref())
            .and_then(|n| n.pods.as_deref())
    }
}

/// Who a cluster is and which markers it carries. Built once per pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterIdentity {
    /// Technical cluster name; prefix of every owned cloud object
    pub name: String,
    pub project: String,
    pub region: String,
    pub infra: ObjectMeta,
    pub shoot: Option<ObjectMeta>,
    pub seed: Option<ObjectMeta>,
}

impl ClusterIdentity {
    /// The cluster name is the infrastructure object's namespace, falling back
    /// to its name when the object is not namespaced.
    pub fn new(infra: &Infrastructure, cluster: &Cluster, project: impl Into<String>) -> Self {
        let name = if infra.metadata.namespace.is_empty() {
            infra.metadata.name.clone()
        } else {
            infra.metadata.namespace.clone()
        };

        Self {
            name,
            project: project.into(),
            region: infra.spec.region.clone(),
            infra: infra.metadata.clone(),
            shoot: cluster.shoot.as_ref().map(|s| s.metadata.clone()),
            seed: cluster.seed.as_ref().map(|s| s.metadata.clone()),
        }
    }

    /// Marker set on the infrastructure object or on the shoot
    pub fn has_object_marker(&self, annotation: &str) -> bool {
        self.infra.annotation_is_true(annotation)
            || self
                .shoot
                .as_ref()
                .is_some_and(|s| s.annotation_is_true(annotation))
    }

    pub fn seed_has_label(&self, label: &str) -> bool {
        self.seed.as_ref().is_some_and(|s| s.label_is_true(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InfrastructureSpec;

    #[test]
    fn test_identity_from_objects() {
        let infra = Infrastructure {
            api_version: String::new(),
            kind: String::new(),
            metadata: ObjectMeta {
                name: "app".into(),
                namespace: "shoot--dev--app".into(),
                ..Default::default()
            },
            spec: InfrastructureSpec {
                region: "europe-west1".into(),
                provider_config: None,
            },
            status: Default::default(),
        };
        let mut shoot = Shoot::default();
        shoot
            .metadata
            .annotations
            .insert("use-flow".into(), "True".into());
        let cluster = Cluster {
            shoot: Some(shoot),
            seed: None,
        };

        let identity = ClusterIdentity::new(&infra, &cluster, "my-project");
        assert_eq!(identity.name, "shoot--dev--app");
        assert_eq!(identity.region, "europe-west1");
        assert!(identity.has_object_marker("use-flow"));
        assert!(!identity.seed_has_label("use-flow"));
    }
}
