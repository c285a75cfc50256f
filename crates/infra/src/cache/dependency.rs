//! Parent to children edges for cascading invalidation.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    edges: Mutex<HashMap<String, HashSet<String>>>,
}

impl DependencyGraph {
    /// Record that invalidating `parent` must also invalidate `child`.
    /// Returns false if the edge already existed.
    pub(crate) fn add(&self, parent: &str, child: &str) -> bool {
        self.edges.lock().entry(parent.to_string()).or_default().insert(child.to_string())
    }

    /// Detach `root` and everything reachable from it.
    ///
    /// Walks depth-first with an explicit stack and a visited set, so cycles
    /// and long chains are safe. Returns the reachable keys, excluding
    /// `root`, in visit order. All of them, and `root`, are removed from the
    /// graph both as parents and as children.
    pub(crate) fn take_cascade(&self, root: &str) -> Vec<String> {
        let mut edges = self.edges.lock();

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.to_string());
        let mut order = Vec::new();
        let mut stack: Vec<String> = Vec::new();

        if let Some(children) = edges.remove(root) {
            stack.extend(children);
        }

        while let Some(key) = stack.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if let Some(children) = edges.remove(&key) {
                stack.extend(children.into_iter().filter(|c| !visited.contains(c)));
            }
            order.push(key);
        }

        edges.retain(|_, children| {
            children.retain(|c| !visited.contains(c));
            !children.is_empty()
        });

        order
    }

    pub(crate) fn children(&self, parent: &str) -> Vec<String> {
        let mut children: Vec<String> =
            self.edges.lock().get(parent).map(|c| c.iter().cloned().collect()).unwrap_or_default();
        children.sort();
        children
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.edges.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let graph = DependencyGraph::default();
        assert!(graph.add("a", "b"));
        assert!(!graph.add("a", "b"));
        assert_eq!(graph.children("a"), vec!["b".to_string()]);
    }

    /// Validates the A -> B -> C chain.
    ///
    /// Assertions:
    /// - Every descendant is returned exactly once.
    /// - The graph is empty afterwards.
    #[test]
    fn test_cascade_chain() {
        let graph = DependencyGraph::default();
        graph.add("a", "b");
        graph.add("b", "c");

        assert_eq!(graph.take_cascade("a"), vec!["b".to_string(), "c".to_string()]);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_cascade_survives_cycles_and_diamonds() {
        let graph = DependencyGraph::default();
        graph.add("a", "b");
        graph.add("a", "c");
        graph.add("b", "d");
        graph.add("c", "d");
        graph.add("d", "a");

        let mut keys = graph.take_cascade("a");
        keys.sort();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string(), "d".to_string()]);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_cascade_leaves_unrelated_edges() {
        let graph = DependencyGraph::default();
        graph.add("a", "b");
        graph.add("x", "b");
        graph.add("x", "y");

        assert_eq!(graph.take_cascade("a"), vec!["b".to_string()]);
        assert_eq!(graph.children("x"), vec!["y".to_string()]);
    }

    #[test]
    fn test_long_chain_is_iterative() {
        let graph = DependencyGraph::default();
        for i in 0..10_000 {
            graph.add(&format!("k{i}"), &format!("k{}", i + 1));
        }
        assert_eq!(graph.take_cascade("k0").len(), 10_000);
    }
}
