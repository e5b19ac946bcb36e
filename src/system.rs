//! System descriptors and access metadata
//!
//! A system is a named callable plus an [`AccessDescriptor`] describing what
//! it touches. The descriptor is the scheduler's only source of truth for
//! conflict inference, so it must cover everything the callable does.

use smallvec::SmallVec;

use crate::component::{Component, TypeId};
use crate::error::{EcsError, Result};
use crate::tick::Tick;
use crate::world::World;

/// Dense system identifier (registration order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub u32);

impl SystemId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// System callable: runs against the world at the current tick.
///
/// Conflicting systems are serialized by the dependency graph, so a callable
/// may mutate exactly the state its descriptor declares.
pub type SystemFn = Box<dyn FnMut(&mut World, Tick) + Send>;

/// What a system reads and writes.
#[derive(Debug, Clone, Default)]
pub struct AccessDescriptor {
    pub component_reads: Vec<TypeId>,
    pub component_writes: Vec<TypeId>,
    pub resource_reads: Vec<TypeId>,
    pub resource_writes: Vec<TypeId>,
    /// Exclusive systems conflict with everything (structural mutation,
    /// archetype graph growth).
    pub exclusive_world: bool,
}

impl AccessDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access for a world-exclusive system.
    pub fn exclusive() -> Self {
        Self {
            exclusive_world: true,
            ..Self::default()
        }
    }

    pub fn read<T: Component>(mut self) -> Self {
        self.component_reads.push(TypeId::of::<T>());
        self
    }

    pub fn write<T: Component>(mut self) -> Self {
        self.component_writes.push(TypeId::of::<T>());
        self
    }

    pub fn read_resource<R: 'static>(mut self) -> Self {
        self.resource_reads.push(TypeId::from_name(std::any::type_name::<R>()));
        self
    }

    pub fn write_resource<R: 'static>(mut self) -> Self {
        self.resource_writes.push(TypeId::from_name(std::any::type_name::<R>()));
        self
    }

    /// Two accesses conflict iff one is exclusive, a write overlaps a write,
    /// or a write overlaps a read, on either components or resources.
    /// Two reads never conflict.
    pub fn conflicts_with(&self, other: &AccessDescriptor) -> bool {
        if self.exclusive_world || other.exclusive_world {
            return true;
        }

        overlaps(&self.component_writes, &other.component_writes)
            || overlaps(&self.component_writes, &other.component_reads)
            || overlaps(&self.component_reads, &other.component_writes)
            || overlaps(&self.resource_writes, &other.resource_writes)
            || overlaps(&self.resource_writes, &other.resource_reads)
            || overlaps(&self.resource_reads, &other.resource_writes)
    }
}

fn overlaps(a: &[TypeId], b: &[TypeId]) -> bool {
    a.iter().any(|id| b.contains(id))
}

/// A registered system: name, callable, access, explicit ordering hints.
pub struct SystemDescriptor {
    pub(crate) id: SystemId,
    pub(crate) name: String,
    pub(crate) run: SystemFn,
    pub(crate) access: AccessDescriptor,
    pub(crate) after: SmallVec<[SystemId; 4]>,
    pub(crate) before: SmallVec<[SystemId; 4]>,
}

impl SystemDescriptor {
    #[inline]
    pub fn id(&self) -> SystemId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn access(&self) -> &AccessDescriptor {
        &self.access
    }
}

/// Stores system descriptors in registration order.
///
/// Access is immutable after registration; names are unique. The registry
/// tracks a dirty flag so the scheduler knows when to rebuild its graph.
pub struct SystemRegistry {
    systems: Vec<SystemDescriptor>,
    dirty: bool,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            dirty: false,
        }
    }

    /// Register a system. `after`/`before` reference previously registered
    /// systems by id.
    pub fn register(
        &mut self,
        name: &str,
        run: SystemFn,
        access: AccessDescriptor,
        after: &[SystemId],
        before: &[SystemId],
    ) -> Result<SystemId> {
        if self.systems.iter().any(|s| s.name == name) {
            tracing::error!(system = name, "duplicate system registration");
            return Err(EcsError::DuplicateSystemName(name.to_string()));
        }
        for &hint in after.iter().chain(before) {
            if hint.index() >= self.systems.len() {
                tracing::error!(system = name, hint = hint.0, "ordering hint references unknown system");
                return Err(EcsError::UnknownSystem(hint.0));
            }
        }

        let id = SystemId(self.systems.len() as u32);
        self.systems.push(SystemDescriptor {
            id,
            name: name.to_string(),
            run,
            access,
            after: SmallVec::from_slice(after),
            before: SmallVec::from_slice(before),
        });
        self.dirty = true;
        Ok(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    #[inline]
    pub fn get(&self, id: SystemId) -> Option<&SystemDescriptor> {
        self.systems.get(id.index())
    }

    pub fn by_name(&self, name: &str) -> Option<&SystemDescriptor> {
        self.systems.iter().find(|s| s.name == name)
    }

    #[inline]
    pub fn systems(&self) -> &[SystemDescriptor] {
        &self.systems
    }

    #[inline]
    pub(crate) fn systems_mut(&mut self) -> &mut [SystemDescriptor] {
        &mut self.systems
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Default for SystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}
