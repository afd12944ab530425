//! Directed action graph built with petgraph.
//!
//! The compiler loads the rewritten (WAIT-free) authoring graph into an
//! [`ActionGraph`] keyed by author node id, then uses it for cycle detection
//! and the breadth-first walk that emits NEXT links.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// A directed graph of author node ids.
#[derive(Debug, Clone, Default)]
pub struct ActionGraph {
    graph: DiGraph<String, ()>,
    /// Map from author node id to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<String, NodeIndex>,
}

impl ActionGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, returning false if it already existed.
    pub fn add_node(&mut self, id: &str) -> bool {
        if self.node_index_map.contains_key(id) {
            return false;
        }
        let index = self.graph.add_node(id.to_string());
        self.node_index_map.insert(id.to_string(), index);
        true
    }

    /// Adds an edge between two existing nodes.
    ///
    /// Returns false if either endpoint is unknown. Duplicate edges are
    /// collapsed.
    pub fn add_edge(&mut self, source: &str, target: &str) -> bool {
        let (Some(&s), Some(&t)) = (
            self.node_index_map.get(source),
            self.node_index_map.get(target),
        ) else {
            return false;
        };
        if self.graph.find_edge(s, t).is_none() {
            self.graph.add_edge(s, t, ());
        }
        true
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.node_index_map.contains_key(id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the ids of the direct successors of a node, sorted.
    #[must_use]
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Returns the ids of the direct predecessors of a node, sorted.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.node_index_map.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<&str> = self
            .graph
            .neighbors_directed(index, direction)
            .filter_map(|n| self.graph.node_weight(n).map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Returns true if the graph contains a directed cycle.
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Walks the graph breadth-first from `roots`, returning every traversed
    /// edge once in visit order.
    ///
    /// Neighbors are visited in sorted id order so the output is stable.
    #[must_use]
    pub fn bfs_edges<'a>(&'a self, roots: &[&'a str]) -> Vec<(&'a str, &'a str)> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut edges = Vec::new();

        for &root in roots {
            if self.contains(root) && seen.insert(root) {
                queue.push_back(root);
            }
        }

        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                edges.push((current, next));
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        edges
    }
}
