//! Wait-for graph over workers
//!
//! Built from a lock ownership snapshot: a worker waiting on a lock gets an
//! edge to the worker that owns it. Before an edge `A -> B` is added the graph
//! looks for a path `B -> ... -> A`; finding one means the edge would close a
//! circular wait, and that path is the cycle.

use crate::core::types::WorkerId;
use fxhash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Directed graph of worker wait relationships
#[derive(Default)]
pub struct WaitForGraph {
    /// Maps a worker to all the workers it is waiting for
    edges: FxHashMap<WorkerId, FxHashSet<WorkerId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directed edge: `from` waits for `to`
    ///
    /// # Returns
    /// * `Some(cycle)` - the workers of the circular wait, starting at `to`,
    ///   if this edge would close one. The edge is not added.
    /// * `None` - the edge was added
    pub fn add_edge(&mut self, from: WorkerId, to: WorkerId) -> Option<Vec<WorkerId>> {
        if self.edges.get(&from).is_some_and(|targets| targets.contains(&to)) {
            return None;
        }

        if from == to {
            return Some(vec![from]);
        }

        if let Some(path) = self.find_path(to, from) {
            return Some(path);
        }

        self.edges.entry(from).or_default().insert(to);
        None
    }

    /// Breadth-first search for a path `start -> ... -> target`, both ends included
    fn find_path(&self, start: WorkerId, target: WorkerId) -> Option<Vec<WorkerId>> {
        let mut queue = VecDeque::from([start]);
        let mut visited = FxHashSet::default();
        let mut parent: FxHashMap<WorkerId, WorkerId> = FxHashMap::default();
        visited.insert(start);

        while let Some(current) = queue.pop_front() {
            if current == target {
                let mut path = vec![target];
                let mut node = target;
                while let Some(&prev) = parent.get(&node) {
                    path.push(prev);
                    node = prev;
                }
                path.reverse();
                return Some(path);
            }

            if let Some(next) = self.edges.get(&current) {
                for &n in next {
                    if visited.insert(n) {
                        parent.insert(n, current);
                        queue.push_back(n);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_worker_cycle() {
        let mut graph = WaitForGraph::new();
        assert!(graph.add_edge(1, 2).is_none());
        let cycle = graph.add_edge(2, 1).unwrap();
        assert_eq!(cycle, vec![1, 2]);
    }

    #[test]
    fn test_chain_without_cycle() {
        let mut graph = WaitForGraph::new();
        assert!(graph.add_edge(1, 2).is_none());
        assert!(graph.add_edge(2, 3).is_none());
        assert!(graph.add_edge(4, 3).is_none());
        // Adding the same edge twice is harmless
        assert!(graph.add_edge(1, 2).is_none());
    }

    #[test]
    fn test_three_worker_ring() {
        let mut graph = WaitForGraph::new();
        assert!(graph.add_edge(1, 2).is_none());
        assert!(graph.add_edge(2, 3).is_none());
        let cycle = graph.add_edge(3, 1).unwrap();
        assert_eq!(cycle, vec![1, 2, 3]);
    }
}
