//! In-memory `ComputeClient` for tests
//!
//! Every mutating call is appended to a log so tests can assert idempotence by
//! counting operations. Failures can be injected one call at a time.

use crate::compute::{ComputeClient, Firewall, Network, Route, Router, Subnetwork};
use async_trait::async_trait;
use infraflow_cloud::{CloudError, Result};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    networks: BTreeMap<String, Network>,
    subnetworks: BTreeMap<(String, String), Subnetwork>,
    routers: BTreeMap<(String, String), Router>,
    firewalls: BTreeMap<String, Firewall>,
    routes: BTreeMap<String, Route>,
    mutations: Vec<String>,
    failures: VecDeque<(String, CloudError)>,
    fingerprint: u64,
}

impl Inner {
    /// Pop an injected failure whose prefix matches `call`.
    fn take_failure(&mut self, call: &str) -> Result<()> {
        if let Some(pos) = self
            .failures
            .iter()
            .position(|(prefix, _)| call.starts_with(prefix.as_str()))
            && let Some((_, error)) = self.failures.remove(pos)
        {
            return Err(error);
        }
        Ok(())
    }

    fn mutate(&mut self, call: String) -> Result<()> {
        self.take_failure(&call)?;
        self.mutations.push(call);
        Ok(())
    }

    fn next_fingerprint(&mut self) -> String {
        self.fingerprint += 1;
        format!("fp-{}", self.fingerprint)
    }
}

/// In-memory compute project
pub struct InMemoryCompute {
    project: String,
    inner: Mutex<Inner>,
}

impl Default for InMemoryCompute {
    fn default() -> Self {
        Self::new("test-project")
    }
}

impl InMemoryCompute {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Mutating calls made so far, e.g. `insert firewall shoot--a--b-allow-...`.
    pub async fn mutations(&self) -> Vec<String> {
        self.inner.lock().await.mutations.clone()
    }

    pub async fn mutation_count(&self) -> usize {
        self.inner.lock().await.mutations.len()
    }

    /// Fail the next call whose description starts with `call_prefix`
    /// (`"insert subnetwork"`, `"get router"`, ...).
    pub async fn fail_next(&self, call_prefix: impl Into<String>, error: CloudError) {
        self.inner
            .lock()
            .await
            .failures
            .push_back((call_prefix.into(), error));
    }

    /// Add a network without logging a mutation.
    pub async fn seed_network(&self, network: Network) {
        self.inner
            .lock()
            .await
            .networks
            .insert(network.name.clone(), network);
    }

    pub async fn seed_subnetwork(&self, region: &str, subnet: Subnetwork) {
        self.inner
            .lock()
            .await
            .subnetworks
            .insert((region.to_string(), subnet.name.clone()), subnet);
    }

    pub async fn seed_router(&self, region: &str, router: Router) {
        self.inner
            .lock()
            .await
            .routers
            .insert((region.to_string(), router.name.clone()), router);
    }

    pub async fn seed_firewall(&self, firewall: Firewall) {
        self.inner
            .lock()
            .await
            .firewalls
            .insert(firewall.name.clone(), firewall);
    }

    pub async fn seed_route(&self, route: Route) {
        self.inner.lock().await.routes.insert(route.name.clone(), route);
    }

    pub async fn network_names(&self) -> Vec<String> {
        self.inner.lock().await.networks.keys().cloned().collect()
    }

    pub async fn subnetwork_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .subnetworks
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn router_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .routers
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn firewall_names(&self) -> Vec<String> {
        self.inner.lock().await.firewalls.keys().cloned().collect()
    }

    pub async fn route_names(&self) -> Vec<String> {
        self.inner.lock().await.routes.keys().cloned().collect()
    }

    pub async fn router(&self, region: &str, name: &str) -> Option<Router> {
        self.inner
            .lock()
            .await
            .routers
            .get(&(region.to_string(), name.to_string()))
            .cloned()
    }
}

fn already_exists(kind: &str, name: &str) -> CloudError {
    CloudError::AlreadyExists(format!("{} {}", kind, name))
}

fn not_found(kind: &str, name: &str) -> CloudError {
    CloudError::NotFound(format!("{} {}", kind, name))
}

#[async_trait]
impl ComputeClient for InMemoryCompute {
    fn project(&self) -> &str {
        &self.project
    }

    async fn get_network(&self, name: &str) -> Result<Option<Network>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(&format!("get network {}", name))?;
        Ok(inner.networks.get(name).cloned())
    }

    async fn insert_network(&self, network: &Network) -> Result<Network> {
        let mut inner = self.inner.lock().await;
        if inner.networks.contains_key(&network.name) {
            return Err(already_exists("network", &network.name));
        }
        inner.mutate(format!("insert network {}", network.name))?;
        let mut stored = network.clone();
        stored.self_link = Some(format!(
            "projects/{}/global/networks/{}",
            self.project, network.name
        ));
        inner.networks.insert(network.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_network(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.networks.contains_key(name) {
            return Err(not_found("network", name));
        }
        let in_use = inner
            .subnetworks
            .values()
            .any(|s| infraflow_cloud::same_network(&s.network, name))
            || inner
                .firewalls
                .values()
                .any(|f| infraflow_cloud::same_network(&f.network, name));
        if in_use {
            return Err(CloudError::InvalidSpec(format!(
                "network {} is still in use",
                name
            )));
        }
        inner.mutate(format!("delete network {}", name))?;
        inner.networks.remove(name);
        Ok(())
    }

    async fn get_subnetwork(&self, region: &str, name: &str) -> Result<Option<Subnetwork>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(&format!("get subnetwork {}", name))?;
        Ok(inner
            .subnetworks
            .get(&(region.to_string(), name.to_string()))
            .cloned())
    }

    async fn insert_subnetwork(&self, region: &str, subnet: &Subnetwork) -> Result<Subnetwork> {
        let mut inner = self.inner.lock().await;
        let id = (region.to_string(), subnet.name.clone());
        if inner.subnetworks.contains_key(&id) {
            return Err(already_exists("subnetwork", &subnet.name));
        }
        if !inner
            .networks
            .keys()
            .any(|n| infraflow_cloud::same_network(&subnet.network, n))
        {
            return Err(not_found("network", &subnet.network));
        }
        inner.mutate(format!("insert subnetwork {}", subnet.name))?;
        let mut stored = subnet.clone();
        stored.region = Some(region.to_string());
        stored.fingerprint = Some(inner.next_fingerprint());
        inner.subnetworks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn patch_subnetwork(&self, region: &str, subnet: &Subnetwork) -> Result<Subnetwork> {
        let mut inner = self.inner.lock().await;
        let id = (region.to_string(), subnet.name.clone());
        let Some(current) = inner.subnetworks.get(&id).cloned() else {
            return Err(not_found("subnetwork", &subnet.name));
        };
        if current.fingerprint != subnet.fingerprint {
            return Err(CloudError::Api {
                status: 412,
                message: format!("fingerprint mismatch for subnetwork {}", subnet.name),
            });
        }
        inner.mutate(format!("patch subnetwork {}", subnet.name))?;
        let mut stored = current;
        stored.log_config = subnet.log_config.clone();
        stored.fingerprint = Some(inner.next_fingerprint());
        inner.subnetworks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn delete_subnetwork(&self, region: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = (region.to_string(), name.to_string());
        if !inner.subnetworks.contains_key(&id) {
            return Err(not_found("subnetwork", name));
        }
        inner.mutate(format!("delete subnetwork {}", name))?;
        inner.subnetworks.remove(&id);
        Ok(())
    }

    async fn get_router(&self, region: &str, name: &str) -> Result<Option<Router>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(&format!("get router {}", name))?;
        Ok(inner
            .routers
            .get(&(region.to_string(), name.to_string()))
            .cloned())
    }

    async fn insert_router(&self, region: &str, router: &Router) -> Result<Router> {
        let mut inner = self.inner.lock().await;
        let id = (region.to_string(), router.name.clone());
        if inner.routers.contains_key(&id) {
            return Err(already_exists("router", &router.name));
        }
        inner.mutate(format!("insert router {}", router.name))?;
        let mut stored = router.clone();
        stored.region = Some(region.to_string());
        stored.fingerprint = Some(inner.next_fingerprint());
        inner.routers.insert(id, stored.clone());
        Ok(stored)
    }

    async fn patch_router(&self, region: &str, router: &Router) -> Result<Router> {
        let mut inner = self.inner.lock().await;
        let id = (region.to_string(), router.name.clone());
        let Some(current) = inner.routers.get(&id).cloned() else {
            return Err(not_found("router", &router.name));
        };
        if current.fingerprint != router.fingerprint {
            return Err(CloudError::Api {
                status: 412,
                message: format!("fingerprint mismatch for router {}", router.name),
            });
        }
        inner.mutate(format!("patch router {}", router.name))?;
        let mut stored = current;
        stored.nats = router.nats.clone();
        stored.fingerprint = Some(inner.next_fingerprint());
        inner.routers.insert(id, stored.clone());
        Ok(stored)
    }

    async fn delete_router(&self, region: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let id = (region.to_string(), name.to_string());
        if !inner.routers.contains_key(&id) {
            return Err(not_found("router", name));
        }
        inner.mutate(format!("delete router {}", name))?;
        inner.routers.remove(&id);
        Ok(())
    }

    async fn list_firewalls(&self) -> Result<Vec<Firewall>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("list firewalls")?;
        Ok(inner.firewalls.values().cloned().collect())
    }

    async fn get_firewall(&self, name: &str) -> Result<Option<Firewall>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure(&format!("get firewall {}", name))?;
        Ok(inner.firewalls.get(name).cloned())
    }

    async fn insert_firewall(&self, firewall: &Firewall) -> Result<Firewall> {
        let mut inner = self.inner.lock().await;
        if inner.firewalls.contains_key(&firewall.name) {
            return Err(already_exists("firewall", &firewall.name));
        }
        inner.mutate(format!("insert firewall {}", firewall.name))?;
        inner
            .firewalls
            .insert(firewall.name.clone(), firewall.clone());
        Ok(firewall.clone())
    }

    async fn patch_firewall(&self, firewall: &Firewall) -> Result<Firewall> {
        let mut inner = self.inner.lock().await;
        if !inner.firewalls.contains_key(&firewall.name) {
            return Err(not_found("firewall", &firewall.name));
        }
        inner.mutate(format!("patch firewall {}", firewall.name))?;
        inner
            .firewalls
            .insert(firewall.name.clone(), firewall.clone());
        Ok(firewall.clone())
    }

    async fn delete_firewall(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.firewalls.contains_key(name) {
            return Err(not_found("firewall", name));
        }
        inner.mutate(format!("delete firewall {}", name))?;
        inner.firewalls.remove(name);
        Ok(())
    }

    async fn list_routes(&self) -> Result<Vec<Route>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("list routes")?;
        Ok(inner.routes.values().cloned().collect())
    }

    async fn delete_route(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.routes.contains_key(name) {
            return Err(not_found("route", name));
        }
        inner.mutate(format!("delete route {}", name))?;
        inner.routes.remove(name);
        Ok(())
    }
}
