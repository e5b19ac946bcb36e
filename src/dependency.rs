//! System dependency graph
//!
//! Builds a DAG over registered systems: an edge u -> v means u must finish
//! before v starts. Edges come from pairwise access conflicts (the earlier
//! registered system is the predecessor, which keeps derived edges acyclic)
//! and from explicit after/before hints, which can introduce cycles and are
//! validated by the topological sort.

use std::collections::VecDeque;

use crate::error::{EcsError, Result};
use crate::system::SystemRegistry;

pub struct DependencyGraph {
    /// dependents[u] lists the nodes that wait on u.
    dependents: Vec<Vec<u32>>,
    /// Number of predecessors per node; the scheduler's reset source.
    dependency_counts: Vec<u16>,
    /// Nodes with no predecessors.
    roots: Vec<u32>,
    /// Kahn order over all nodes.
    execution_order: Vec<u32>,
    dirty: bool,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            dependents: Vec::new(),
            dependency_counts: Vec::new(),
            roots: Vec::new(),
            execution_order: Vec::new(),
            dirty: true,
        }
    }

    /// Rebuild from the registry. Fails with [`EcsError::DependencyCycle`]
    /// when explicit hints form a cycle; the graph stays dirty in that case.
    pub fn build(&mut self, registry: &SystemRegistry) -> Result<()> {
        let count = registry.len();
        self.dependents = vec![Vec::new(); count];
        self.dependency_counts = vec![0; count];
        self.roots.clear();
        self.execution_order.clear();

        let systems = registry.systems();

        // Derived edges: for every conflicting pair, the earlier registration
        // runs first.
        for i in 0..count {
            for j in 0..i {
                if systems[i].access().conflicts_with(systems[j].access()) {
                    self.dependents[j].push(i as u32);
                    self.dependency_counts[i] += 1;
                }
            }
        }

        // Explicit hints. after(x): x -> i. before(x): i -> x.
        for (i, system) in systems.iter().enumerate() {
            for &after in &system.after {
                self.dependents[after.index()].push(i as u32);
                self.dependency_counts[i] += 1;
            }
            for &before in &system.before {
                self.dependents[i].push(before.0);
                self.dependency_counts[before.index()] += 1;
            }
        }

        for (i, &deps) in self.dependency_counts.iter().enumerate() {
            if deps == 0 {
                self.roots.push(i as u32);
            }
        }

        self.compute_execution_order();

        if self.has_cycle() {
            tracing::error!("explicit system ordering hints form a cycle");
            return Err(EcsError::DependencyCycle);
        }

        self.dirty = false;
        Ok(())
    }

    /// Kahn's algorithm over a scratch copy of the in-degrees.
    fn compute_execution_order(&mut self) {
        let mut in_degree = self.dependency_counts.clone();
        let mut queue: VecDeque<u32> = self.roots.iter().copied().collect();

        self.execution_order.reserve(self.dependents.len());
        while let Some(node) = queue.pop_front() {
            self.execution_order.push(node);
            for &dependent in &self.dependents[node as usize] {
                let degree = &mut in_degree[dependent as usize];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    /// True iff the topological sort did not reach every node.
    #[inline]
    pub fn has_cycle(&self) -> bool {
        self.execution_order.len() != self.dependents.len()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.dependents.len()
    }

    #[inline]
    pub fn dependents(&self, node: u32) -> &[u32] {
        &self.dependents[node as usize]
    }

    #[inline]
    pub fn dependency_count(&self, node: u32) -> u16 {
        self.dependency_counts[node as usize]
    }

    #[inline]
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    #[inline]
    pub fn execution_order(&self) -> &[u32] {
        &self.execution_order
    }

    /// Position of a node in the execution order.
    pub fn order_index(&self, node: u32) -> Option<usize> {
        self.execution_order.iter().position(|&n| n == node)
    }

    /// True iff there is a directed path from `from` to `to`.
    pub fn has_path(&self, from: u32, to: u32) -> bool {
        let mut stack = vec![from];
        let mut visited = vec![false; self.dependents.len()];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if std::mem::replace(&mut visited[node as usize], true) {
                continue;
            }
            stack.extend_from_slice(&self.dependents[node as usize]);
        }
        false
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{AccessDescriptor, SystemFn, SystemId, SystemRegistry};

    #[derive(Debug)]
    struct A;
    #[derive(Debug)]
    struct B;
    #[derive(Debug)]
    struct C;

    fn noop() -> SystemFn {
        Box::new(|_, _| {})
    }

    fn register(
        registry: &mut SystemRegistry,
        name: &str,
        access: AccessDescriptor,
    ) -> SystemId {
        registry.register(name, noop(), access, &[], &[]).unwrap()
    }

    #[test]
    fn test_conflict_edge_orders_by_registration() {
        let mut registry = SystemRegistry::new();
        register(&mut registry, "writer", AccessDescriptor::new().write::<A>());
        register(&mut registry, "reader", AccessDescriptor::new().read::<A>());

        let mut graph = DependencyGraph::new();
        graph.build(&registry).unwrap();

        assert_eq!(graph.dependents(0), &[1]);
        assert_eq!(graph.dependency_count(1), 1);
        assert_eq!(graph.roots(), &[0]);
        assert!(graph.order_index(0).unwrap() < graph.order_index(1).unwrap());
    }

    #[test]
    fn test_independent_systems_have_no_edges() {
        let mut registry = SystemRegistry::new();
        register(&mut registry, "a", AccessDescriptor::new().write::<A>());
        register(&mut registry, "b", AccessDescriptor::new().write::<B>());

        let mut graph = DependencyGraph::new();
        graph.build(&registry).unwrap();

        assert!(graph.dependents(0).is_empty());
        assert!(graph.dependents(1).is_empty());
        assert_eq!(graph.roots(), &[0, 1]);
    }

    #[test]
    fn test_diamond_from_accesses() {
        // Sa writes A; Sb reads A writes B; Sc reads A writes C; Sd reads B+C.
        let mut registry = SystemRegistry::new();
        register(&mut registry, "sa", AccessDescriptor::new().write::<A>());
        register(
            &mut registry,
            "sb",
            AccessDescriptor::new().read::<A>().write::<B>(),
        );
        register(
            &mut registry,
            "sc",
            AccessDescriptor::new().read::<A>().write::<C>(),
        );
        register(
            &mut registry,
            "sd",
            AccessDescriptor::new().read::<B>().read::<C>(),
        );

        let mut graph = DependencyGraph::new();
        graph.build(&registry).unwrap();

        let order = graph.execution_order();
        let pos = |n: u32| order.iter().position(|&x| x == n).unwrap();
        assert_eq!(pos(0), 0);
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));

        // Sb and Sc are unordered relative to each other.
        assert!(!graph.has_path(1, 2));
        assert!(!graph.has_path(2, 1));
        assert!(graph.has_path(0, 3));
    }

    #[test]
    fn test_every_edge_respects_execution_order() {
        let mut registry = SystemRegistry::new();
        register(&mut registry, "s0", AccessDescriptor::new().write::<A>());
        register(&mut registry, "s1", AccessDescriptor::new().read::<A>().write::<B>());
        register(&mut registry, "s2", AccessDescriptor::new().read::<B>());
        register(&mut registry, "s3", AccessDescriptor::new().write::<C>());

        let mut graph = DependencyGraph::new();
        graph.build(&registry).unwrap();

        for u in 0..graph.node_count() as u32 {
            for &v in graph.dependents(u) {
                assert!(graph.order_index(u).unwrap() < graph.order_index(v).unwrap());
            }
        }
    }

    #[test]
    fn test_explicit_edges() {
        let mut registry = SystemRegistry::new();
        let a = register(&mut registry, "a", AccessDescriptor::new());
        registry
            .register("b", noop(), AccessDescriptor::new(), &[a], &[])
            .unwrap();

        let mut graph = DependencyGraph::new();
        graph.build(&registry).unwrap();
        assert_eq!(graph.dependents(0), &[1]);
    }

    #[test]
    fn test_explicit_cycle_is_build_failure() {
        let mut registry = SystemRegistry::new();
        let a = register(&mut registry, "a", AccessDescriptor::new());
        // b after a, and b before a: a -> b and b -> a.
        registry
            .register("b", noop(), AccessDescriptor::new(), &[a], &[a])
            .unwrap();

        let mut graph = DependencyGraph::new();
        assert_eq!(graph.build(&registry), Err(EcsError::DependencyCycle));
        assert!(graph.is_dirty());
    }

    #[test]
    fn test_overlapping_writers_always_ordered() {
        // Every pair overlapping on a write must end up ordered (a path in
        // some direction); pairs that only read stay unordered.
        let mut registry = SystemRegistry::new();
        register(&mut registry, "w1", AccessDescriptor::new().write::<A>());
        register(&mut registry, "w2", AccessDescriptor::new().write::<A>());
        register(&mut registry, "r1", AccessDescriptor::new().read::<A>());

        let mut graph = DependencyGraph::new();
        graph.build(&registry).unwrap();

        for u in 0..3u32 {
            for v in (u + 1)..3 {
                let conflict = registry.systems()[u as usize]
                    .access()
                    .conflicts_with(registry.systems()[v as usize].access());
                if conflict {
                    assert!(graph.has_path(u, v) || graph.has_path(v, u));
                }
            }
        }
    }
}
