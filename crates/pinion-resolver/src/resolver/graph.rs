use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

/// The dependency graph of a finished resolution.
///
/// Nodes are identifiers, with `None` standing for the root that the user's requirements hang
/// off. An edge `a -> b` means that `a` depends on `b`.
#[derive(Debug, Clone)]
pub struct ResolutionGraph<I> {
    graph: DiGraph<Option<I>, ()>,
    nodes: FxHashMap<Option<I>, NodeIndex>,
}

impl<I: Clone + Eq + Hash> Default for ResolutionGraph<I> {
    fn default() -> Self {
        let mut graph = DiGraph::new();
        let root = graph.add_node(None);
        let mut nodes = FxHashMap::default();
        nodes.insert(None, root);
        Self { graph, nodes }
    }
}

impl<I: Clone + Eq + Hash + Ord> ResolutionGraph<I> {
    /// Add a node, returning its index. Adding an existing node is a no-op.
    pub fn add(&mut self, key: Option<I>) -> NodeIndex {
        if let Some(index) = self.nodes.get(&key) {
            return *index;
        }
        let index = self.graph.add_node(key.clone());
        self.nodes.insert(key, index);
        index
    }

    /// Add the edge `parent -> child`, adding missing nodes along the way.
    pub fn connect(&mut self, parent: Option<I>, child: Option<I>) {
        let parent = self.add(parent);
        let child = self.add(child);
        self.graph.update_edge(parent, child, ());
    }

    pub fn contains(&self, key: &Option<I>) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every node, the root included, in key order.
    pub fn keys(&self) -> Vec<&Option<I>> {
        let mut keys = self.graph.node_weights().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// The direct dependencies of `key`, in key order.
    pub fn children(&self, key: &Option<I>) -> Vec<&Option<I>> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// The direct dependents of `key`, in key order.
    pub fn parents(&self, key: &Option<I>) -> Vec<&Option<I>> {
        self.neighbors(key, Direction::Incoming)
    }

    fn neighbors(&self, key: &Option<I>, direction: Direction) -> Vec<&Option<I>> {
        let Some(index) = self.nodes.get(key) else {
            return Vec::new();
        };
        let mut neighbors = self
            .graph
            .neighbors_directed(*index, direction)
            .map(|neighbor| &self.graph[neighbor])
            .collect::<Vec<_>>();
        neighbors.sort();
        neighbors
    }

    pub(crate) fn index(&self, key: &Option<I>) -> Option<NodeIndex> {
        self.nodes.get(key).copied()
    }

    pub(crate) fn inner(&self) -> &DiGraph<Option<I>, ()> {
        &self.graph
    }
}
