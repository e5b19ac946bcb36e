//! Parallel system scheduler
//!
//! Executes the dependency graph over the thread pool. Each node carries an
//! atomic remaining-predecessor count; finishing a system decrements its
//! dependents and submits any that reach zero. One WaitGroup barrier per
//! frame; the caller blocks until every node ran.
//!
//! Task payloads are a frame-context pointer plus the node index — two words,
//! no per-task allocation, so there is no task-data ring to wrap around.

use std::sync::atomic::{AtomicU16, Ordering};

use crossbeam::utils::CachePadded;

use crate::dependency::DependencyGraph;
use crate::error::Result;
use crate::pool::{Task, ThreadPool, WaitGroup};
use crate::system::{SystemDescriptor, SystemRegistry};
use crate::tick::Tick;
use crate::world::World;

pub struct ParallelScheduler {
    pool: ThreadPool,
    graph: DependencyGraph,
    remaining: Vec<CachePadded<AtomicU16>>,
    wait_group: WaitGroup,
}

/// Per-frame execution context, referenced by every task of the frame.
///
/// Raw pointers only: the struct lives on `run_all`'s stack and every task
/// finishes before `run_all` returns (the WaitGroup barrier), so all of them
/// stay valid for the tasks' lifetime.
struct FrameCtx {
    scheduler: *const ParallelScheduler,
    systems: *mut SystemDescriptor,
    world: *mut World,
    tick: Tick,
}

impl ParallelScheduler {
    pub fn new(worker_count: usize) -> Self {
        Self {
            pool: ThreadPool::new(worker_count),
            graph: DependencyGraph::new(),
            remaining: Vec::new(),
            wait_group: WaitGroup::new(),
        }
    }

    #[inline]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    #[inline]
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.graph.is_dirty()
    }

    pub fn invalidate(&mut self) {
        self.graph.mark_dirty();
    }

    /// Rebuild the dependency graph and the per-node counters.
    pub fn build(&mut self, registry: &SystemRegistry) -> Result<()> {
        self.graph.build(registry)?;
        self.remaining = (0..self.graph.node_count())
            .map(|_| CachePadded::new(AtomicU16::new(0)))
            .collect();
        Ok(())
    }

    /// Run every system once, honoring the graph. Returns when all finished.
    ///
    /// Systems access the world through a shared pointer; the graph guarantees
    /// that concurrently running systems have non-conflicting access
    /// descriptors, which is what makes the aliasing sound.
    pub fn run_all(&mut self, world: &mut World, registry: &mut SystemRegistry, tick: Tick) {
        debug_assert!(!self.graph.is_dirty(), "run_all on a dirty graph");
        let node_count = self.graph.node_count();
        if node_count == 0 {
            return;
        }
        debug_assert_eq!(node_count, registry.len());

        for (node, counter) in self.remaining.iter().enumerate() {
            counter.store(self.graph.dependency_count(node as u32), Ordering::Relaxed);
        }

        self.wait_group.add(node_count);

        let mut ctx = FrameCtx {
            scheduler: self as *const ParallelScheduler,
            systems: registry.systems_mut().as_mut_ptr(),
            world: world as *mut World,
            tick,
        };
        let ctx_ptr = &mut ctx as *mut FrameCtx as *mut u8;

        for &root in self.graph.roots() {
            self.pool.submit(Task {
                run: run_node,
                data: ctx_ptr,
                index: root,
            });
        }

        // One sync barrier per frame.
        self.wait_group.wait();
    }
}

/// Task trampoline: executes one graph node, then releases its dependents.
unsafe fn run_node(data: *mut u8, node: u32) {
    let ctx = &*(data as *const FrameCtx);
    let scheduler = &*ctx.scheduler;

    {
        // Nodes are distinct per task, so each descriptor is mutated by
        // exactly one thread per frame.
        let descriptor = &mut *ctx.systems.add(node as usize);
        (descriptor.run)(&mut *ctx.world, ctx.tick);
    }

    for &dependent in scheduler.graph.dependents(node) {
        // AcqRel: completion of this system happens-before the dependent's
        // execution on whichever thread observes the final decrement.
        let previous =
            scheduler.remaining[dependent as usize].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "dependency count underflow");
        if previous == 1 {
            scheduler.pool.submit(Task {
                run: run_node,
                data,
                index: dependent,
            });
        }
    }

    scheduler.wait_group.done();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::AccessDescriptor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct CompA;
    #[derive(Debug)]
    struct CompB;

    #[test]
    fn test_all_systems_run_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut registry = SystemRegistry::new();
        for i in 0..8 {
            let counter = Arc::clone(&counter);
            registry
                .register(
                    &format!("count-{i}"),
                    Box::new(move |_, _| {
                        counter.fetch_add(1, Ordering::AcqRel);
                    }),
                    AccessDescriptor::new(),
                    &[],
                    &[],
                )
                .unwrap();
        }

        let mut world = World::new();
        let mut scheduler = ParallelScheduler::new(4);
        scheduler.build(&registry).unwrap();
        scheduler.run_all(&mut world, &mut registry, Tick(1));

        assert_eq!(counter.load(Ordering::Acquire), 8);
    }

    #[test]
    fn test_conflicting_systems_observe_predecessor_effects() {
        // writer bumps a shared value, reader snapshots it; the conflict edge
        // must order them writer -> reader on every frame.
        let value = Arc::new(AtomicU32::new(0));
        let observed = Arc::new(AtomicU32::new(u32::MAX));

        let mut registry = SystemRegistry::new();
        {
            let value = Arc::clone(&value);
            registry
                .register(
                    "writer",
                    Box::new(move |_, _| {
                        value.store(42, Ordering::Release);
                    }),
                    AccessDescriptor::new().write::<CompA>(),
                    &[],
                    &[],
                )
                .unwrap();
        }
        {
            let value = Arc::clone(&value);
            let observed = Arc::clone(&observed);
            registry
                .register(
                    "reader",
                    Box::new(move |_, _| {
                        observed.store(value.load(Ordering::Acquire), Ordering::Release);
                    }),
                    AccessDescriptor::new().read::<CompA>(),
                    &[],
                    &[],
                )
                .unwrap();
        }

        let mut world = World::new();
        let mut scheduler = ParallelScheduler::new(4);
        scheduler.build(&registry).unwrap();
        scheduler.run_all(&mut world, &mut registry, Tick(1));

        assert_eq!(observed.load(Ordering::Acquire), 42);
    }

    #[test]
    fn test_repeated_frames_reset_counts() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut registry = SystemRegistry::new();
        {
            let counter = Arc::clone(&counter);
            registry
                .register(
                    "first",
                    Box::new(move |_, _| {
                        counter.fetch_add(1, Ordering::AcqRel);
                    }),
                    AccessDescriptor::new().write::<CompA>(),
                    &[],
                    &[],
                )
                .unwrap();
        }
        {
            let counter = Arc::clone(&counter);
            registry
                .register(
                    "second",
                    Box::new(move |_, _| {
                        counter.fetch_add(1, Ordering::AcqRel);
                    }),
                    AccessDescriptor::new().read::<CompA>().write::<CompB>(),
                    &[],
                    &[],
                )
                .unwrap();
        }

        let mut world = World::new();
        let mut scheduler = ParallelScheduler::new(2);
        scheduler.build(&registry).unwrap();

        for _ in 0..10 {
            scheduler.run_all(&mut world, &mut registry, Tick(1));
        }
        assert_eq!(counter.load(Ordering::Acquire), 20);
    }

    #[test]
    fn test_empty_registry_is_noop() {
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        let mut scheduler = ParallelScheduler::new(1);
        scheduler.build(&registry).unwrap();
        scheduler.run_all(&mut world, &mut registry, Tick(1));
    }
}
