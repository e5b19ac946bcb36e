// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! World: the simulation facade
//!
//! Owns the entity allocator, the archetype graph, the entity-location table,
//! the observer and system registries, the scheduler and its thread pool, the
//! resource map, the event queues, the reflection registry, and the per-frame
//! bump arena. Structural operations are eager; each one resolves the entity
//! in O(1) through the location table, walks one cached graph edge, and fires
//! the matching observers synchronously.

use std::any::Any;

use ahash::AHashMap;
use bumpalo::Bump;
use parking_lot::Mutex;

use crate::archetype::{Archetype, ArchetypeHandle};
use crate::command::CommandBuffer;
use crate::component::{Bundle, Component, ComponentInfo, TypeId};
use crate::entity::{Entity, EntityAllocator, EntityLocation};
use crate::error::{EcsError, Result};
use crate::events::{Events, EventQueues};
use crate::graph::ArchetypeGraph;
use crate::observer::{EventKind, ObserverBuilder, ObserverEvent, ObserverId, ObserverRegistry};
use crate::query::{
    CachedMatches, Query, QueryFetch, QueryFetchMut, QueryFilter, QueryMut, QuerySignature, Term,
};
use crate::reflect::TypeRegistry;
use crate::scheduler::ParallelScheduler;
use crate::system::{AccessDescriptor, SystemFn, SystemId, SystemRegistry};
use crate::tick::Tick;

/// Construction options.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Scheduler workers; 0 selects the machine's available parallelism.
    pub worker_count: usize,
    /// Starting row capacity of each archetype table.
    pub initial_archetype_capacity: usize,
    /// Pre-reserved bytes of the per-frame bump arena.
    pub frame_bump_bytes: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            initial_archetype_capacity: 64,
            frame_bump_bytes: 1 << 20,
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct WorldStats {
    pub entities: u32,
    pub archetypes: usize,
    pub recycled_entities: usize,
    pub systems: usize,
    pub observers: usize,
}

/// Central ECS world
pub struct World {
    entities: EntityAllocator,
    /// Indexed by entity index; O(1) resolution after generation validation.
    locations: Vec<EntityLocation>,
    graph: ArchetypeGraph,
    observers: ObserverRegistry,
    systems: SystemRegistry,
    /// Created lazily on the first frame that has systems.
    scheduler: Option<ParallelScheduler>,
    /// Typed singletons.
    resources: AHashMap<TypeId, Box<dyn Any + Send + Sync>>,
    events: EventQueues,
    type_registry: TypeRegistry,
    /// Matching archetypes per query signature, refreshed against the graph
    /// generation.
    query_cache: Mutex<AHashMap<QuerySignature, CachedMatches>>,
    /// Per-frame scratch arena, reset at the end of every update.
    frame_bump: Bump,
    tick: Tick,
    config: WorldConfig,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let frame_bump = Bump::with_capacity(config.frame_bump_bytes);
        Self {
            entities: EntityAllocator::new(),
            locations: Vec::new(),
            graph: ArchetypeGraph::new(config.initial_archetype_capacity),
            observers: ObserverRegistry::new(),
            systems: SystemRegistry::new(),
            scheduler: None,
            resources: AHashMap::new(),
            events: EventQueues::new(),
            type_registry: TypeRegistry::new(),
            query_cache: Mutex::new(AHashMap::with_capacity(32)),
            frame_bump,
            // Tick 0 is reserved so freshly spawned rows always read as
            // added/changed against a zero baseline.
            tick: Tick(1),
            config,
        }
    }

    #[inline]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    // ========== Entity lifecycle ==========

    /// Spawn an entity with no components.
    pub fn spawn_empty(&mut self) -> Entity {
        let entity = self.entities.allocate();
        let handle = self.graph.empty();
        let row = self
            .graph
            .get_mut(handle)
            .table_mut()
            .allocate_row(entity, self.tick);
        self.set_location(entity, EntityLocation { archetype: handle, row });
        entity
    }

    /// Spawn an entity with a bundle of components.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.entities.allocate();

        let mut infos = B::component_infos();
        infos.sort_by_key(|info| info.type_id);
        debug_assert!(
            infos.windows(2).all(|w| w[0].type_id != w[1].type_id),
            "bundle contains duplicate component types"
        );

        let handle = self.graph.get_or_create(infos.to_vec());
        let archetype = self.graph.get_mut(handle);
        let row = archetype.table_mut().allocate_row(entity, self.tick);
        unsafe {
            bundle.write_into(archetype.table_mut(), row);
        }
        self.set_location(entity, EntityLocation { archetype: handle, row });

        self.notify_row_components(EventKind::Add, entity, handle, row);
        entity
    }

    /// Spawn many entities with the same bundle type, reserving rows up
    /// front.
    pub fn spawn_batch<B, I>(&mut self, bundles: I) -> Vec<Entity>
    where
        B: Bundle,
        I: IntoIterator<Item = B>,
        I::IntoIter: ExactSizeIterator,
    {
        let bundles = bundles.into_iter();
        let count = bundles.len();
        if count == 0 {
            return Vec::new();
        }

        let mut infos = B::component_infos();
        infos.sort_by_key(|info| info.type_id);
        let handle = self.graph.get_or_create(infos.to_vec());
        self.graph.get_mut(handle).table_mut().reserve_rows(count);

        let mut spawned = Vec::with_capacity(count);
        for bundle in bundles {
            let entity = self.entities.allocate();
            let archetype = self.graph.get_mut(handle);
            let row = archetype.table_mut().allocate_row(entity, self.tick);
            unsafe {
                bundle.write_into(archetype.table_mut(), row);
            }
            self.set_location(entity, EntityLocation { archetype: handle, row });
            self.notify_row_components(EventKind::Add, entity, handle, row);
            spawned.push(entity);
        }
        spawned
    }

    /// Despawn an entity, dropping all its components.
    pub fn despawn(&mut self, entity: Entity) -> Result<()> {
        let location = self.location_of(entity)?;

        // OnRemove fires before any component is destructed; structural
        // mutation from callbacks is buffered and applied afterwards.
        let mut commands = CommandBuffer::new();
        self.collect_remove_notifications(entity, location, &mut commands);

        let moved = self
            .graph
            .get_mut(location.archetype)
            .table_mut()
            .free_row(location.row);
        self.fix_moved_location(moved, location.row);

        self.locations[entity.index() as usize] = EntityLocation::INVALID;
        self.entities.free(entity);

        commands.apply(self);
        Ok(())
    }

    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    // ========== Component mutation ==========

    /// Add a component, moving the entity along the archetype graph's add
    /// edge. Adding a type that is already present is a contract violation.
    pub fn add<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        let location = self.location_of(entity)?;
        let type_id = TypeId::of::<T>();

        if self.graph.get(location.archetype).has(type_id) {
            tracing::error!(entity = ?entity, component = %type_id, "add of component already present");
            return Err(EcsError::ComponentAlreadyPresent { entity, type_id });
        }

        let info = ComponentInfo::of::<T>();
        let target = self.graph.get_or_create_add_target(location.archetype, &info);

        let tick = self.tick;
        let (dst_row, moved) = {
            let (source, destination) = self.graph.get_pair_mut(location.archetype, target);
            let dst_row = destination.table_mut().allocate_row(entity, tick);
            source
                .table_mut()
                .move_row_to(location.row, destination.table_mut(), dst_row);
            let moved = unsafe {
                destination.table_mut().write_initial(dst_row, component);
                source.table_mut().release_row(location.row)
            };
            (dst_row, moved)
        };
        self.fix_moved_location(moved, location.row);
        self.set_location(entity, EntityLocation { archetype: target, row: dst_row });

        self.notify_component(EventKind::Add, entity, target, type_id);
        Ok(())
    }

    /// Remove a component, moving the entity along the remove edge.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let location = self.location_of(entity)?;
        let type_id = TypeId::of::<T>();

        if !self.graph.get(location.archetype).has(type_id) {
            tracing::error!(entity = ?entity, component = %type_id, "remove of component not present");
            return Err(EcsError::ComponentNotFound { entity, type_id });
        }

        // OnRemove sees the still-live value.
        let mut commands = CommandBuffer::new();
        {
            let component = self
                .graph
                .get(location.archetype)
                .table()
                .column(type_id)
                .expect("column checked above")
                .get_raw(location.row as usize);
            self.trigger_observers(EventKind::Remove, type_id, entity, component, &mut commands);
        }

        let target = self.graph.get_or_create_remove_target(location.archetype, type_id);
        let tick = self.tick;
        let (dst_row, moved) = {
            let (source, destination) = self.graph.get_pair_mut(location.archetype, target);
            let dst_row = destination.table_mut().allocate_row(entity, tick);
            // The removed component is not in the destination, so the move
            // drops it in place.
            source
                .table_mut()
                .move_row_to(location.row, destination.table_mut(), dst_row);
            let moved = unsafe { source.table_mut().release_row(location.row) };
            (dst_row, moved)
        };
        self.fix_moved_location(moved, location.row);
        self.set_location(entity, EntityLocation { archetype: target, row: dst_row });

        commands.apply(self);
        Ok(())
    }

    /// Overwrite a component value in place, marking the slot changed.
    pub fn set<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        let location = self.location_of(entity)?;
        let type_id = TypeId::of::<T>();

        if !self.graph.get(location.archetype).has(type_id) {
            tracing::error!(entity = ?entity, component = %type_id, "set of component not present");
            return Err(EcsError::ComponentNotFound { entity, type_id });
        }

        let tick = self.tick;
        unsafe {
            self.graph
                .get_mut(location.archetype)
                .table_mut()
                .set_component_erased(
                    location.row,
                    type_id,
                    &component as *const T as *const u8,
                    tick,
                );
        }
        std::mem::forget(component);

        // OnSet fires after the value is overwritten.
        self.notify_component(EventKind::Set, entity, location.archetype, type_id);
        Ok(())
    }

    /// Read a component.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let location = self.location_of(entity).ok()?;
        self.graph
            .get(location.archetype)
            .table()
            .column(TypeId::of::<T>())?
            .get(location.row as usize)
    }

    /// Mutably access a component; the slot is marked changed.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let location = self.location_of(entity).ok()?;
        let tick = self.tick;
        let column = self
            .graph
            .get_mut(location.archetype)
            .table_mut()
            .column_mut(TypeId::of::<T>())?;
        column.mark_changed(location.row as usize, tick);
        column.get_mut(location.row as usize)
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.location_of(entity)
            .map(|location| self.graph.get(location.archetype).has(TypeId::of::<T>()))
            .unwrap_or(false)
    }

    /// Where an entity currently lives.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.location_of(entity).ok()
    }

    // ========== Queries ==========

    pub fn query<'w, Q>(&'w self) -> Query<'w, Q>
    where
        Q: QueryFilter + QueryFetch<'w> + 'w,
    {
        Query::new(self)
    }

    pub fn query_mut<'w, Q>(&'w mut self) -> QueryMut<'w, Q>
    where
        Q: QueryFilter + QueryFetchMut<'w>,
    {
        QueryMut::new(self)
    }

    /// Matching archetypes for a runtime term list (cached).
    pub fn query_terms(&self, terms: &[Term]) -> Vec<ArchetypeHandle> {
        self.cached_matches(QuerySignature::from_terms(terms))
    }

    /// Matching archetypes for a compiled signature (cached).
    pub fn cached_matches(&self, signature: QuerySignature) -> Vec<ArchetypeHandle> {
        let mut cache = self.query_cache.lock();
        let generation = self.graph.generation();
        match cache.entry(signature) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let cached = entry.get_mut();
                cached.update(self.graph.archetypes(), generation);
                cached.matches.clone()
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let cached =
                    CachedMatches::new(entry.key().clone(), self.graph.archetypes(), generation);
                let matches = cached.matches.clone();
                entry.insert(cached);
                matches
            }
        }
    }

    pub(crate) fn cached_matches_for<Q: QueryFilter>(&self) -> Vec<ArchetypeHandle> {
        self.cached_matches(Q::signature())
    }

    // ========== Archetype access ==========

    pub fn archetypes(&self) -> &[Archetype] {
        self.graph.archetypes()
    }

    pub fn archetype(&self, handle: ArchetypeHandle) -> &Archetype {
        self.graph.get(handle)
    }

    pub fn archetype_count(&self) -> usize {
        self.graph.len()
    }

    pub fn archetype_generation(&self) -> u32 {
        self.graph.generation()
    }

    pub(crate) fn archetype_ptr(&self, handle: ArchetypeHandle) -> *mut Archetype {
        self.graph.archetype_ptr(handle)
    }

    // ========== Resources ==========

    /// Insert a resource (typed singleton), replacing any previous value.
    pub fn insert_resource<R: Send + Sync + 'static>(&mut self, resource: R) {
        self.resources
            .insert(Self::resource_key::<R>(), Box::new(resource));
    }

    pub fn resource<R: 'static>(&self) -> Option<&R> {
        self.resources
            .get(&Self::resource_key::<R>())
            .and_then(|r| r.downcast_ref())
    }

    pub fn resource_mut<R: 'static>(&mut self) -> Option<&mut R> {
        self.resources
            .get_mut(&Self::resource_key::<R>())
            .and_then(|r| r.downcast_mut())
    }

    /// Read a resource that is required to exist.
    pub fn expect_resource<R: 'static>(&self) -> Result<&R> {
        self.resource::<R>().ok_or_else(|| {
            tracing::error!(resource = std::any::type_name::<R>(), "unknown resource type");
            EcsError::ResourceNotFound(std::any::type_name::<R>())
        })
    }

    pub fn has_resource<R: 'static>(&self) -> bool {
        self.resources.contains_key(&Self::resource_key::<R>())
    }

    pub fn remove_resource<R: 'static>(&mut self) -> Option<R> {
        self.resources
            .remove(&Self::resource_key::<R>())
            .and_then(|r| r.downcast().ok())
            .map(|boxed| *boxed)
    }

    fn resource_key<R: 'static>() -> TypeId {
        TypeId::from_name(std::any::type_name::<R>())
    }

    // ========== Events ==========

    /// Register a double-buffered event queue for `E`.
    pub fn add_event<E: Send + Sync + 'static>(&mut self) {
        self.events.register::<E>();
    }

    pub fn send_event<E: Send + Sync + 'static>(&mut self, event: E) {
        match self.events.get_mut::<E>() {
            Some(queue) => queue.send(event),
            None => {
                tracing::warn!(event = std::any::type_name::<E>(), "event type not registered");
            }
        }
    }

    pub fn events<E: Send + Sync + 'static>(&self) -> Option<&Events<E>> {
        self.events.get::<E>()
    }

    pub fn events_mut<E: Send + Sync + 'static>(&mut self) -> Option<&mut Events<E>> {
        self.events.get_mut::<E>()
    }

    // ========== Observers ==========

    /// Start registering an observer for a structural event.
    ///
    /// ```ignore
    /// world.observe::<OnAdd<Health>>("log-spawn")
    ///     .each(|_, _, entity, health: &Health| { ... });
    /// ```
    pub fn observe<E: ObserverEvent>(&mut self, name: &str) -> ObserverBuilder<'_, E> {
        ObserverBuilder::new(self, name)
    }

    pub fn set_observer_enabled(&mut self, id: ObserverId, enabled: bool) -> bool {
        self.observers.set_enabled(id, enabled)
    }

    pub(crate) fn observers_mut(&mut self) -> &mut ObserverRegistry {
        &mut self.observers
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // ========== Systems & frame loop ==========

    /// Register a system with its access descriptor and optional explicit
    /// ordering hints.
    pub fn register_system(
        &mut self,
        name: &str,
        run: SystemFn,
        access: AccessDescriptor,
        after: &[SystemId],
        before: &[SystemId],
    ) -> Result<SystemId> {
        self.systems.register(name, run, access, after, before)
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// The scheduler, once the first frame with systems has run.
    pub fn scheduler(&self) -> Option<&ParallelScheduler> {
        self.scheduler.as_ref()
    }

    /// Run one frame: rebuild the dependency graph if dirty, execute all
    /// systems over the pool, reset the frame arena, advance the tick, and
    /// swap event queues.
    pub fn update(&mut self) -> Result<()> {
        if !self.systems.is_empty() {
            if self.scheduler.is_none() {
                self.scheduler = Some(ParallelScheduler::new(self.config.worker_count));
            }

            let needs_build = self.systems.is_dirty()
                || self
                    .scheduler
                    .as_ref()
                    .map(|s| s.needs_rebuild())
                    .unwrap_or(false);
            if needs_build {
                let scheduler = self.scheduler.as_mut().expect("scheduler created above");
                scheduler.build(&self.systems)?;
                self.systems.mark_clean();
            }

            // The scheduler and registry step out of the world for the frame
            // so systems can receive the world itself.
            let mut scheduler = self.scheduler.take().expect("scheduler created above");
            let mut systems = std::mem::take(&mut self.systems);
            let tick = self.tick;
            scheduler.run_all(self, &mut systems, tick);
            self.systems = systems;
            self.scheduler = Some(scheduler);
        }

        self.frame_bump.reset();
        self.tick.increment();
        self.events.swap_all();
        Ok(())
    }

    /// Per-frame scratch arena; reset at the end of every update.
    pub fn frame_allocator(&self) -> &Bump {
        &self.frame_bump
    }

    // ========== Reflection ==========

    pub fn type_registry(&self) -> &TypeRegistry {
        &self.type_registry
    }

    pub fn type_registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.type_registry
    }

    // ========== Diagnostics ==========

    pub fn entity_count(&self) -> u32 {
        self.entities.live_count()
    }

    pub fn recycled_entity_count(&self) -> usize {
        self.entities.recycled_count()
    }

    /// Highest entity index ever allocated.
    pub fn entity_high_water_mark(&self) -> u32 {
        self.entities.high_water_mark()
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            entities: self.entities.live_count(),
            archetypes: self.graph.len(),
            recycled_entities: self.entities.recycled_count(),
            systems: self.systems.len(),
            observers: self.observers.len(),
        }
    }

    // ========== Internals ==========

    fn location_of(&self, entity: Entity) -> Result<EntityLocation> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        Ok(self.locations[entity.index() as usize])
    }

    fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let index = entity.index() as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, EntityLocation::INVALID);
        }
        self.locations[index] = location;
    }

    /// After a swap-remove, the entity that filled the hole gets its row
    /// re-pointed.
    fn fix_moved_location(&mut self, moved: Entity, row: u32) {
        if !moved.is_null() {
            self.locations[moved.index() as usize].row = row;
        }
    }

    /// Fire observers for one component event; commands queued by callbacks
    /// are applied before returning.
    fn notify_component(
        &mut self,
        kind: EventKind,
        entity: Entity,
        archetype: ArchetypeHandle,
        type_id: TypeId,
    ) {
        if !self.observers.has_observers(kind, type_id) {
            return;
        }
        let mut commands = CommandBuffer::new();
        let component = self
            .graph
            .get(archetype)
            .table()
            .column(type_id)
            .expect("observed column present")
            .get_raw(self.locations[entity.index() as usize].row as usize);
        self.trigger_observers(kind, type_id, entity, component, &mut commands);
        commands.apply(self);
    }

    /// Fire observers for every component of a row (spawn).
    fn notify_row_components(
        &mut self,
        kind: EventKind,
        entity: Entity,
        archetype: ArchetypeHandle,
        row: u32,
    ) {
        let types: smallvec::SmallVec<[TypeId; 8]> = self
            .graph
            .get(archetype)
            .types()
            .iter()
            .copied()
            .filter(|&type_id| self.observers.has_observers(kind, type_id))
            .collect();
        if types.is_empty() {
            return;
        }

        let mut commands = CommandBuffer::new();
        for type_id in types {
            let component = self
                .graph
                .get(archetype)
                .table()
                .column(type_id)
                .expect("column present")
                .get_raw(row as usize);
            self.trigger_observers(kind, type_id, entity, component, &mut commands);
        }
        commands.apply(self);
    }

    /// Queue OnRemove notifications for every component of a row about to be
    /// freed. The caller applies `commands` after the row is gone.
    fn collect_remove_notifications(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        commands: &mut CommandBuffer,
    ) {
        let types: smallvec::SmallVec<[TypeId; 8]> = self
            .graph
            .get(location.archetype)
            .types()
            .iter()
            .copied()
            .filter(|&type_id| self.observers.has_observers(EventKind::Remove, type_id))
            .collect();

        for type_id in types {
            let component = self
                .graph
                .get(location.archetype)
                .table()
                .column(type_id)
                .expect("column present")
                .get_raw(location.row as usize);
            self.trigger_observers(EventKind::Remove, type_id, entity, component, commands);
        }
    }

    /// Invoke the registry with a shared view of the world.
    fn trigger_observers(
        &mut self,
        kind: EventKind,
        type_id: TypeId,
        entity: Entity,
        component: *const u8,
        commands: &mut CommandBuffer,
    ) {
        let world_ptr = self as *mut World;
        // SAFETY: callbacks receive &World and may only read; structural
        // mutation goes through `commands`, applied by the caller once the
        // registry borrow is released.
        unsafe {
            (*world_ptr)
                .observers
                .trigger(kind, type_id, &*world_ptr, commands, entity, component);
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
