//! Dependency graph of provisioning tasks
//!
//! Nodes live in a petgraph arena indexed in declaration order; edges point from
//! a dependency to its dependent. Cycles and unknown dependencies are rejected
//! when the graph is built.

use crate::error::FlowError;
use crate::state::ResourceKey;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// A task together with its resource key and prerequisites
#[derive(Debug)]
pub struct TaskNode<T> {
    pub key: ResourceKey,
    pub depends_on: Vec<ResourceKey>,
    pub task: T,
}

/// Collects tasks in declaration order before validation
#[derive(Debug)]
pub struct TaskGraphBuilder<T> {
    nodes: Vec<TaskNode<T>>,
}

impl<T> Default for TaskGraphBuilder<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T> TaskGraphBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: ResourceKey, depends_on: Vec<ResourceKey>, task: T) -> &mut Self {
        self.nodes.push(TaskNode {
            key,
            depends_on,
            task,
        });
        self
    }

    pub fn build(self) -> Result<TaskGraph<T>, FlowError> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len());
        let mut index = HashMap::with_capacity(self.nodes.len());

        for node in self.nodes {
            if index.contains_key(&node.key) {
                return Err(FlowError::DuplicateKey(node.key));
            }
            let key = node.key.clone();
            let idx = graph.add_node(node);
            index.insert(key, idx);
        }

        let mut edges = Vec::new();
        for idx in graph.node_indices() {
            let node = &graph[idx];
            for dep in &node.depends_on {
                let dep_idx = index.get(dep).ok_or_else(|| FlowError::UnknownDependency {
                    key: node.key.clone(),
                    dependency: dep.clone(),
                })?;
                edges.push((*dep_idx, idx));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(FlowError::Cycle(graph[cycle.node_id()].key.clone()));
        }

        Ok(TaskGraph { graph, index })
    }
}

/// Validated, acyclic task graph
#[derive(Debug)]
pub struct TaskGraph<T> {
    graph: DiGraph<TaskNode<T>, ()>,
    index: HashMap<ResourceKey, NodeIndex>,
}

impl<T> TaskGraph<T> {
    pub fn builder() -> TaskGraphBuilder<T> {
        TaskGraphBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, idx: NodeIndex) -> &TaskNode<T> {
        &self.graph[idx]
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&TaskNode<T>> {
        self.index.get(key).map(|idx| &self.graph[*idx])
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.graph.node_indices().map(move |idx| &self.graph[idx].key)
    }

    /// Keys of the tasks that depend directly on `key`, in declaration order.
    pub fn dependents(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        let Some(idx) = self.index.get(key) else {
            return Vec::new();
        };
        let mut dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*idx, Direction::Outgoing)
            .collect();
        dependents.sort();
        dependents
            .into_iter()
            .map(|i| self.graph[i].key.clone())
            .collect()
    }

    /// Topological order for provisioning. Among tasks whose dependencies are
    /// all scheduled, the one declared first runs first.
    pub fn apply_order(&self) -> Vec<NodeIndex> {
        self.ordered(Direction::Incoming, |idx| Reverse(idx.index()))
    }

    /// Reverse dependency order for teardown. Dependents always precede their
    /// dependencies; among ready tasks the one declared last goes first.
    pub fn teardown_order(&self) -> Vec<NodeIndex> {
        self.ordered(Direction::Outgoing, |idx| Reverse(usize::MAX - idx.index()))
    }

    fn ordered<F>(&self, blockers: Direction, priority: F) -> Vec<NodeIndex>
    where
        F: Fn(NodeIndex) -> Reverse<usize>,
    {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.neighbors_directed(idx, blockers).count()))
            .collect();

        let mut ready: BinaryHeap<(Reverse<usize>, NodeIndex)> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| (priority(*idx), *idx))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some((_, idx)) = ready.pop() {
            order.push(idx);
            for next in self.graph.neighbors_directed(idx, blockers.opposite()) {
                if let Some(count) = remaining.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push((priority(next), next));
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new("task", name)
    }

    fn names<T>(graph: &TaskGraph<T>, order: &[NodeIndex]) -> Vec<String> {
        order
            .iter()
            .map(|idx| graph.node(*idx).key.name().to_string())
            .collect()
    }

    fn diamond() -> TaskGraph<()> {
        let mut builder = TaskGraph::builder();
        builder
            .add(key("network"), vec![], ())
            .add(key("firewall"), vec![key("network")], ())
            .add(key("subnet"), vec![key("network")], ())
            .add(key("router"), vec![key("network")], ())
            .add(key("nat"), vec![key("router"), key("subnet")], ());
        builder.build().unwrap()
    }

    #[test]
    fn test_apply_order_respects_dependencies_and_declaration() {
        let graph = diamond();
        let order = graph.apply_order();
        assert_eq!(
            names(&graph, &order),
            vec!["network", "firewall", "subnet", "router", "nat"]
        );
    }

    #[test]
    fn test_teardown_order_is_reverse_dependency() {
        let graph = diamond();
        let order = graph.teardown_order();
        assert_eq!(
            names(&graph, &order),
            vec!["nat", "router", "subnet", "firewall", "network"]
        );
    }

    #[test]
    fn test_order_is_stable_across_builds() {
        let first = diamond();
        let second = diamond();
        assert_eq!(
            names(&first, &first.apply_order()),
            names(&second, &second.apply_order())
        );
    }

    #[test]
    fn test_late_declared_dependency_still_runs_first() {
        let mut builder = TaskGraph::builder();
        builder
            .add(key("subnet"), vec![key("network")], ())
            .add(key("network"), vec![], ());
        let graph = builder.build().unwrap();
        assert_eq!(names(&graph, &graph.apply_order()), vec!["network", "subnet"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut builder = TaskGraph::builder();
        builder
            .add(key("a"), vec![key("c")], ())
            .add(key("b"), vec![key("a")], ())
            .add(key("c"), vec![key("b")], ());
        assert!(matches!(builder.build(), Err(FlowError::Cycle(_))));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut builder = TaskGraph::builder();
        builder.add(key("a"), vec![], ()).add(key("a"), vec![], ());
        assert!(matches!(builder.build(), Err(FlowError::DuplicateKey(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut builder = TaskGraph::builder();
        builder.add(key("a"), vec![key("ghost")], ());
        assert!(matches!(
            builder.build(),
            Err(FlowError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_dependents() {
        let graph = diamond();
        assert_eq!(
            graph.dependents(&key("network")),
            vec![key("firewall"), key("subnet"), key("router")]
        );
        assert!(graph.dependents(&key("nat")).is_empty());
    }
}
