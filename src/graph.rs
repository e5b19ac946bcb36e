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

//! Archetype graph: lazy creation and cached single-type transitions
//!
//! Archetypes live in an arena and are referenced by stable handles (indices),
//! never by owning references: the transition edges form a cyclic mesh
//! (add followed by remove returns to the origin). Edges are created on the
//! first structural transition that needs them and cached on both endpoints.

use ahash::AHashMap;

use crate::archetype::{Archetype, ArchetypeHandle, ArchetypeId, EMPTY_ARCHETYPE};
use crate::component::{ComponentInfo, TypeId};

pub struct ArchetypeGraph {
    archetypes: Vec<Archetype>,
    by_id: AHashMap<ArchetypeId, ArchetypeHandle>,
    /// Bumped whenever an archetype is created; query caches key off it.
    generation: u32,
    initial_capacity: usize,
}

impl ArchetypeGraph {
    pub fn new(initial_capacity: usize) -> Self {
        let mut graph = Self {
            archetypes: Vec::with_capacity(64),
            by_id: AHashMap::with_capacity(64),
            generation: 0,
            initial_capacity,
        };
        // The empty archetype always exists, at handle 0.
        let empty = Archetype::new(Vec::new(), initial_capacity);
        graph.by_id.insert(empty.id(), EMPTY_ARCHETYPE);
        graph.archetypes.push(empty);
        graph.generation = 1;
        graph
    }

    #[inline]
    pub fn empty(&self) -> ArchetypeHandle {
        EMPTY_ARCHETYPE
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    #[inline]
    pub fn get(&self, handle: ArchetypeHandle) -> &Archetype {
        &self.archetypes[handle as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, handle: ArchetypeHandle) -> &mut Archetype {
        &mut self.archetypes[handle as usize]
    }

    #[inline]
    pub fn get_by_id(&self, id: ArchetypeId) -> Option<ArchetypeHandle> {
        self.by_id.get(&id).copied()
    }

    #[inline]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Raw pointer to an archetype, for query iteration through the world's
    /// interior-mutability boundary.
    #[inline]
    pub(crate) fn archetype_ptr(&self, handle: ArchetypeHandle) -> *mut Archetype {
        &self.archetypes[handle as usize] as *const Archetype as *mut Archetype
    }

    /// Two archetypes (source and destination of a transition) borrowed
    /// mutably at once. Panics if the handles are equal.
    pub fn get_pair_mut(
        &mut self,
        a: ArchetypeHandle,
        b: ArchetypeHandle,
    ) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "transition endpoints must differ");
        let (a, b) = (a as usize, b as usize);
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Archetype reached from `source` by adding component `info`.
    ///
    /// Cache hit is O(1); on miss the target type set is computed, looked up
    /// by id, created if absent, and both edges are installed. Adding a type
    /// the source already has returns the source unchanged.
    pub fn get_or_create_add_target(
        &mut self,
        source: ArchetypeHandle,
        info: &ComponentInfo,
    ) -> ArchetypeHandle {
        let type_id = info.type_id;
        {
            let src = self.get(source);
            if src.has(type_id) {
                return source;
            }
            if let Some(target) = src.add_edge(type_id) {
                return target;
            }
        }

        let mut infos: Vec<ComponentInfo> = self.get(source).component_infos().to_vec();
        let insert_at = infos
            .binary_search_by_key(&type_id, |i| i.type_id)
            .unwrap_err();
        infos.insert(insert_at, *info);

        let target = self.get_or_create(infos);
        self.get_mut(source).set_add_edge(type_id, target);
        self.get_mut(target).set_remove_edge(type_id, source);
        target
    }

    /// Archetype reached from `source` by removing component `type_id`.
    ///
    /// Removing a type the source does not have returns the source unchanged.
    pub fn get_or_create_remove_target(
        &mut self,
        source: ArchetypeHandle,
        type_id: TypeId,
    ) -> ArchetypeHandle {
        {
            let src = self.get(source);
            if !src.has(type_id) {
                return source;
            }
            if let Some(target) = src.remove_edge(type_id) {
                return target;
            }
        }

        let infos: Vec<ComponentInfo> = self
            .get(source)
            .component_infos()
            .iter()
            .filter(|i| i.type_id != type_id)
            .copied()
            .collect();

        let target = self.get_or_create(infos);
        self.get_mut(source).set_remove_edge(type_id, target);
        self.get_mut(target).set_add_edge(type_id, source);
        target
    }

    /// Resolve the archetype for a full sorted type set, creating it if
    /// needed (spawn path).
    pub fn get_or_create(&mut self, sorted_infos: Vec<ComponentInfo>) -> ArchetypeHandle {
        let types: Vec<TypeId> = sorted_infos.iter().map(|i| i.type_id).collect();
        let id = ArchetypeId::from_sorted_types(&types);
        if let Some(handle) = self.by_id.get(&id) {
            return *handle;
        }

        let archetype = Archetype::new(sorted_infos, self.initial_capacity);
        let handle = self.archetypes.len() as ArchetypeHandle;
        self.by_id.insert(archetype.id(), handle);
        self.archetypes.push(archetype);
        self.generation += 1;
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[derive(Debug, Clone, Copy)]
    struct Position;
    #[derive(Debug, Clone, Copy)]
    struct Velocity;

    fn type_id<T: Component>() -> TypeId {
        TypeId::of::<T>()
    }

    #[test]
    fn test_empty_archetype_exists() {
        let graph = ArchetypeGraph::new(8);
        assert_eq!(graph.len(), 1);
        assert!(graph.get(graph.empty()).types().is_empty());
    }

    #[test]
    fn test_add_transition_creates_once() {
        let mut graph = ArchetypeGraph::new(8);
        let info = ComponentInfo::of::<Position>();

        let with_pos = graph.get_or_create_add_target(EMPTY_ARCHETYPE, &info);
        assert_ne!(with_pos, EMPTY_ARCHETYPE);
        assert_eq!(graph.len(), 2);

        // Second transition hits the edge cache.
        let again = graph.get_or_create_add_target(EMPTY_ARCHETYPE, &info);
        assert_eq!(again, with_pos);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_inverse_edge_installed() {
        let mut graph = ArchetypeGraph::new(8);
        let info = ComponentInfo::of::<Position>();
        let with_pos = graph.get_or_create_add_target(EMPTY_ARCHETYPE, &info);

        // The inverse remove edge came with the add edge.
        assert_eq!(
            graph.get(with_pos).remove_edge(type_id::<Position>()),
            Some(EMPTY_ARCHETYPE)
        );
        let back = graph.get_or_create_remove_target(with_pos, type_id::<Position>());
        assert_eq!(back, EMPTY_ARCHETYPE);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_add_present_type_is_identity() {
        let mut graph = ArchetypeGraph::new(8);
        let info = ComponentInfo::of::<Position>();
        let with_pos = graph.get_or_create_add_target(EMPTY_ARCHETYPE, &info);
        assert_eq!(graph.get_or_create_add_target(with_pos, &info), with_pos);
    }

    #[test]
    fn test_remove_absent_type_is_identity() {
        let mut graph = ArchetypeGraph::new(8);
        assert_eq!(
            graph.get_or_create_remove_target(EMPTY_ARCHETYPE, type_id::<Velocity>()),
            EMPTY_ARCHETYPE
        );
    }

    #[test]
    fn test_same_type_set_same_archetype() {
        let mut graph = ArchetypeGraph::new(8);
        let pos = ComponentInfo::of::<Position>();
        let vel = ComponentInfo::of::<Velocity>();

        // empty -> pos -> pos+vel
        let a = graph.get_or_create_add_target(EMPTY_ARCHETYPE, &pos);
        let ab = graph.get_or_create_add_target(a, &vel);

        // empty -> vel -> vel+pos arrives at the same bucket
        let b = graph.get_or_create_add_target(EMPTY_ARCHETYPE, &vel);
        let ba = graph.get_or_create_add_target(b, &pos);

        assert_eq!(ab, ba);
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_generation_bumps_on_create() {
        let mut graph = ArchetypeGraph::new(8);
        let start = graph.generation();
        graph.get_or_create_add_target(EMPTY_ARCHETYPE, &ComponentInfo::of::<Position>());
        assert!(graph.generation() > start);

        let after = graph.generation();
        graph.get_or_create_add_target(EMPTY_ARCHETYPE, &ComponentInfo::of::<Position>());
        assert_eq!(graph.generation(), after);
    }
}
