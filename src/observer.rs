//! Observers for structural events
//!
//! An observer is a named callback bound to (event kind, component type) and
//! invoked synchronously at the point of change: OnAdd after the component is
//! constructed, OnSet after the value is overwritten, OnRemove before the
//! component is destructed (the pointer is always valid). Invocation order is
//! registration order and stable across calls.
//!
//! Callbacks must not mutate world structure directly; they receive a
//! [`CommandBuffer`] and the triggering world method applies the queued
//! commands after the structural operation completes.

use std::marker::PhantomData;

use ahash::AHashMap;

use crate::command::CommandBuffer;
use crate::component::{Component, TypeId};
use crate::entity::Entity;
use crate::world::World;

/// Structural event classes observers can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Remove,
    Set,
}

/// 1-based observer identifier; 0 is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u32);

impl ObserverId {
    pub const INVALID: ObserverId = ObserverId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    #[inline]
    fn slot(self) -> usize {
        self.0 as usize - 1
    }
}

/// Typed event markers: `OnAdd<Health>`, `OnRemove<Health>`, `OnSet<Health>`.
pub trait ObserverEvent: 'static {
    type Component: Component;
    const KIND: EventKind;
}

pub struct OnAdd<T: Component>(PhantomData<T>);
pub struct OnRemove<T: Component>(PhantomData<T>);
pub struct OnSet<T: Component>(PhantomData<T>);

impl<T: Component> ObserverEvent for OnAdd<T> {
    type Component = T;
    const KIND: EventKind = EventKind::Add;
}

impl<T: Component> ObserverEvent for OnRemove<T> {
    type Component = T;
    const KIND: EventKind = EventKind::Remove;
}

impl<T: Component> ObserverEvent for OnSet<T> {
    type Component = T;
    const KIND: EventKind = EventKind::Set;
}

/// Type-erased observer callback. The boxed closure carries the user's
/// captured state and its destructor.
pub type ObserverFn = Box<dyn FnMut(&World, &mut CommandBuffer, Entity, *const u8) + Send>;

struct ObserverEntry {
    id: ObserverId,
    kind: EventKind,
    type_id: TypeId,
    enabled: bool,
    name: String,
    callback: ObserverFn,
}

/// Registry of observers keyed by (event kind, component type).
///
/// The lookup map is immutable while systems run; registration happens
/// between frames.
pub struct ObserverRegistry {
    entries: Vec<ObserverEntry>,
    by_key: AHashMap<(EventKind, TypeId), Vec<u32>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_key: AHashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        kind: EventKind,
        type_id: TypeId,
        callback: ObserverFn,
    ) -> ObserverId {
        let id = ObserverId(self.entries.len() as u32 + 1);
        let index = self.entries.len() as u32;
        self.entries.push(ObserverEntry {
            id,
            kind,
            type_id,
            enabled: true,
            name: name.to_string(),
            callback,
        });
        self.by_key.entry((kind, type_id)).or_default().push(index);
        id
    }

    /// Enable or disable an observer. Returns false for unknown ids.
    pub fn set_enabled(&mut self, id: ObserverId, enabled: bool) -> bool {
        if !id.is_valid() {
            return false;
        }
        match self.entries.get_mut(id.slot()) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, id: ObserverId) -> bool {
        id.is_valid()
            && self
                .entries
                .get(id.slot())
                .map(|e| e.enabled)
                .unwrap_or(false)
    }

    pub fn name(&self, id: ObserverId) -> Option<&str> {
        if !id.is_valid() {
            return None;
        }
        self.entries.get(id.slot()).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True iff any observer is registered for this key. Lets structural
    /// paths skip the invocation machinery entirely.
    #[inline]
    pub fn has_observers(&self, kind: EventKind, type_id: TypeId) -> bool {
        self.by_key.contains_key(&(kind, type_id))
    }

    /// Invoke every enabled observer for (kind, type) in registration order.
    ///
    /// # Safety
    /// `component` must point to a valid value of the observed type for the
    /// duration of the call, and `world` must stay valid for shared access.
    pub(crate) unsafe fn trigger(
        &mut self,
        kind: EventKind,
        type_id: TypeId,
        world: &World,
        commands: &mut CommandBuffer,
        entity: Entity,
        component: *const u8,
    ) {
        // Indices are appended in registration order and never reordered.
        // Cloned so the entry list can be borrowed mutably below.
        let indices = match self.by_key.get(&(kind, type_id)) {
            Some(indices) => indices.clone(),
            None => return,
        };
        for index in indices {
            let entry = &mut self.entries[index as usize];
            if entry.enabled {
                (entry.callback)(world, commands, entity, component);
            }
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder returned by [`World::observe`]; captures the typed callback.
pub struct ObserverBuilder<'w, E: ObserverEvent> {
    world: &'w mut World,
    name: String,
    _event: PhantomData<E>,
}

impl<'w, E: ObserverEvent> ObserverBuilder<'w, E> {
    pub(crate) fn new(world: &'w mut World, name: &str) -> Self {
        Self {
            world,
            name: name.to_string(),
            _event: PhantomData,
        }
    }

    /// Install the observer with a typed callback.
    pub fn each<F>(self, mut callback: F) -> ObserverId
    where
        F: FnMut(&World, &mut CommandBuffer, Entity, &E::Component) + Send + 'static,
    {
        let erased: ObserverFn = Box::new(move |world, commands, entity, component| {
            // SAFETY: the registry only routes pointers of the keyed type.
            let component = unsafe { &*(component as *const E::Component) };
            callback(world, commands, entity, component);
        });
        self.world.observers_mut().register(
            &self.name,
            E::KIND,
            TypeId::of::<E::Component>(),
            erased,
        )
    }
}
