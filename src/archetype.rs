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

//! Archetype: one storage bucket per exact component-type set
//!
//! An archetype owns a [`Table`] plus its sorted type set, an identity hash
//! of that set, and cached edges to the archetypes reached by adding or
//! removing a single component type.

use ahash::AHashMap;

use crate::component::{ComponentInfo, TypeId};
use crate::table::Table;

/// Identity hash of an archetype: FNV-1a fold of its sorted TypeIds.
///
/// A pure function of the component-type set, so two archetypes with the same
/// set share the same id and the graph keeps exactly one object per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub u64);

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl ArchetypeId {
    /// Fold sorted TypeIds into one 64-bit id.
    pub fn from_sorted_types(sorted: &[TypeId]) -> Self {
        let mut hash = FNV_OFFSET_BASIS;
        for type_id in sorted {
            hash ^= type_id.0;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        ArchetypeId(hash)
    }
}

/// Stable handle into the archetype graph's arena.
pub type ArchetypeHandle = u32;

/// Handle of the empty archetype (always present, created first).
pub const EMPTY_ARCHETYPE: ArchetypeHandle = 0;

pub struct Archetype {
    id: ArchetypeId,
    /// Sorted component-type set; binary-searched by `has`.
    types: Vec<TypeId>,
    infos: Vec<ComponentInfo>,
    table: Table,
    /// Cached transition targets: add_edges[T] is the archetype reached by
    /// adding T. For every installed add edge A --T--> B the inverse remove
    /// edge B --T--> A is installed by the graph.
    add_edges: AHashMap<TypeId, ArchetypeHandle>,
    remove_edges: AHashMap<TypeId, ArchetypeHandle>,
}

impl Archetype {
    /// Build an archetype from component metadata. `infos` must be sorted by
    /// TypeId; the graph canonicalizes before calling.
    pub fn new(infos: Vec<ComponentInfo>, initial_capacity: usize) -> Self {
        debug_assert!(
            infos.windows(2).all(|w| w[0].type_id < w[1].type_id),
            "archetype metadata must be sorted by TypeId"
        );
        let types: Vec<TypeId> = infos.iter().map(|info| info.type_id).collect();
        let id = ArchetypeId::from_sorted_types(&types);
        let table = Table::new(&infos, initial_capacity);
        Self {
            id,
            types,
            infos,
            table,
            add_edges: AHashMap::new(),
            remove_edges: AHashMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[inline]
    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    #[inline]
    pub fn component_infos(&self) -> &[ComponentInfo] {
        &self.infos
    }

    /// Sorted-vector binary search.
    #[inline]
    pub fn has(&self, type_id: TypeId) -> bool {
        self.types.binary_search(&type_id).is_ok()
    }

    #[inline]
    pub fn table(&self) -> &Table {
        &self.table
    }

    #[inline]
    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[inline]
    pub fn add_edge(&self, type_id: TypeId) -> Option<ArchetypeHandle> {
        self.add_edges.get(&type_id).copied()
    }

    #[inline]
    pub fn remove_edge(&self, type_id: TypeId) -> Option<ArchetypeHandle> {
        self.remove_edges.get(&type_id).copied()
    }

    pub(crate) fn set_add_edge(&mut self, type_id: TypeId, target: ArchetypeHandle) {
        self.add_edges.insert(type_id, target);
    }

    pub(crate) fn set_remove_edge(&mut self, type_id: TypeId, target: ArchetypeHandle) {
        self.remove_edges.insert(type_id, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[derive(Debug, Clone, Copy)]
    struct A;
    #[derive(Debug, Clone, Copy)]
    struct B;
    #[derive(Debug, Clone, Copy)]
    struct C;

    fn sorted_infos<const N: usize>(mut infos: [ComponentInfo; N]) -> Vec<ComponentInfo> {
        infos.sort_by_key(|info| info.type_id);
        infos.to_vec()
    }

    fn id_of(types: &mut [TypeId]) -> ArchetypeId {
        types.sort();
        ArchetypeId::from_sorted_types(types)
    }

    fn type_id<T: Component>() -> TypeId {
        TypeId::of::<T>()
    }

    #[test]
    fn test_id_is_function_of_type_set() {
        let ab = id_of(&mut [type_id::<A>(), type_id::<B>()]);
        let ba = id_of(&mut [type_id::<B>(), type_id::<A>()]);
        let abc = id_of(&mut [type_id::<A>(), type_id::<B>(), type_id::<C>()]);
        assert_eq!(ab, ba);
        assert_ne!(ab, abc);
    }

    #[test]
    fn test_empty_set_id_is_offset_basis() {
        assert_eq!(
            ArchetypeId::from_sorted_types(&[]),
            ArchetypeId(FNV_OFFSET_BASIS)
        );
    }

    #[test]
    fn test_has_binary_search() {
        let archetype = Archetype::new(
            sorted_infos([ComponentInfo::of::<A>(), ComponentInfo::of::<B>()]),
            4,
        );
        assert!(archetype.has(type_id::<A>()));
        assert!(archetype.has(type_id::<B>()));
        assert!(!archetype.has(type_id::<C>()));
    }

    #[test]
    fn test_edges() {
        let mut archetype = Archetype::new(Vec::new(), 4);
        assert_eq!(archetype.add_edge(type_id::<A>()), None);
        archetype.set_add_edge(type_id::<A>(), 3);
        assert_eq!(archetype.add_edge(type_id::<A>()), Some(3));
    }
}
