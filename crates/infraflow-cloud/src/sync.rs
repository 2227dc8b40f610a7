//! Pruning of cloud-side collections
//!
//! Collections such as firewall rules or routes are fetched live on every run
//! and compared with the desired managed-name set. Only objects that sit in the
//! target network *and* follow the cluster's naming convention are ever
//! proposed for deletion; networks may be shared with other tenants.

use std::collections::HashSet;

/// A live cloud object that belongs to a network.
pub trait NetworkScoped {
    fn name(&self) -> &str;

    /// Network name or URL the object is attached to.
    fn network(&self) -> &str;
}

/// Final path segment of a network reference, so that
/// `https://…/projects/p/global/networks/my-vpc`, `global/networks/my-vpc`
/// and `my-vpc` all compare equal.
pub fn network_name(network: &str) -> &str {
    network
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(network)
}

/// Whether two network references point at the same network.
pub fn same_network(a: &str, b: &str) -> bool {
    let a = network_name(a);
    !a.is_empty() && a == network_name(b)
}

/// Naming convention marking an object as owned by one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRule {
    prefixes: Vec<String>,
}

impl OwnershipRule {
    /// Names starting with `<cluster>-` belong to the cluster. The separator is
    /// part of the prefix so `shoot--a--b` does not claim `shoot--a--bc-…`.
    pub fn cluster_prefixed(cluster_name: &str) -> Self {
        Self {
            prefixes: vec![format!("{}-", cluster_name)],
        }
    }

    /// Add another owned name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn owns(&self, name: &str) -> bool {
        self.prefixes
            .iter()
            .any(|p| !p.is_empty() && name.starts_with(p.as_str()) && name.len() > p.len())
    }
}

/// Objects from `live` that must be deleted: same network as `network`, owned
/// per `rule`, and absent from `desired`.
pub fn resources_to_delete<'a, R: NetworkScoped>(
    live: &'a [R],
    rule: &OwnershipRule,
    network: &str,
    desired: &HashSet<String>,
) -> Vec<&'a R> {
    live.iter()
        .filter(|r| same_network(r.network(), network))
        .filter(|r| rule.owns(r.name()))
        .filter(|r| !desired.contains(r.name()))
        .collect()
}
