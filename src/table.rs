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

//! Row-aligned component storage
//!
//! A table groups one entity column with one [`Column`] per component type.
//! All columns hold the same number of rows; `entities[i]` is the entity
//! whose data lives at row `i` in every column. Removal is swap-and-pop, so
//! row indices are not stable across frees.

use rustc_hash::FxHashMap;

use crate::column::Column;
use crate::component::{Component, ComponentInfo, TypeId};
use crate::entity::Entity;
use crate::tick::Tick;

pub struct Table {
    entities: Vec<Entity>,
    columns: Vec<Column>,
    column_index: FxHashMap<TypeId, usize>,
}

impl Table {
    pub fn new(infos: &[ComponentInfo], initial_capacity: usize) -> Self {
        let mut columns = Vec::with_capacity(infos.len());
        let mut column_index = FxHashMap::default();
        for info in infos {
            column_index.insert(info.type_id, columns.len());
            columns.push(Column::new(*info, initial_capacity));
        }
        Self {
            entities: Vec::with_capacity(initial_capacity),
            columns,
            column_index,
        }
    }

    /// Append a row for `entity`, stamping every column's ticks with `tick`.
    ///
    /// The new slots are uninitialized; the caller must populate every column
    /// (bundle write, transition move, component insert) before returning to
    /// user code.
    pub fn allocate_row(&mut self, entity: Entity, tick: Tick) -> u32 {
        debug_assert!(!entity.is_null(), "cannot allocate row for null entity");
        let row = self.entities.len() as u32;
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_uninit(tick);
        }
        row
    }

    /// Swap-remove `row`, dropping its component values.
    ///
    /// Returns the entity that moved into `row`, or [`Entity::NULL`] when the
    /// removed row was the last one.
    pub fn free_row(&mut self, row: u32) -> Entity {
        let row = row as usize;
        assert!(row < self.entities.len(), "row index out of bounds");

        self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.swap_remove(row);
        }

        if row < self.entities.len() {
            self.entities[row]
        } else {
            Entity::NULL
        }
    }

    /// Swap-remove `row` after its values were moved out by
    /// [`Table::move_row_to`]. Nothing is dropped.
    ///
    /// # Safety
    /// Every column slot at `row` must be uninitialized (moved out or
    /// explicitly dropped by the transition path).
    pub unsafe fn release_row(&mut self, row: u32) -> Entity {
        let row = row as usize;
        assert!(row < self.entities.len(), "row index out of bounds");

        self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.swap_remove_no_drop(row);
        }

        if row < self.entities.len() {
            self.entities[row]
        } else {
            Entity::NULL
        }
    }

    /// Move the component intersection of `src_row` into `dst_row` of
    /// `target`. Components present only in this table are dropped; components
    /// present only in the target are left for the caller to populate.
    ///
    /// Returns the number of components moved. After this call every slot of
    /// `src_row` is uninitialized; release it with [`Table::release_row`].
    pub fn move_row_to(&mut self, src_row: u32, target: &mut Table, dst_row: u32) -> usize {
        assert!((src_row as usize) < self.entities.len(), "source row out of bounds");
        assert!((dst_row as usize) < target.entities.len(), "destination row out of bounds");

        let mut moved = 0;
        for column in &mut self.columns {
            let type_id = column.type_id();
            let src = column.get_raw(src_row as usize);
            match target.column_index.get(&type_id) {
                Some(&dst_index) => {
                    let dst_column = &mut target.columns[dst_index];
                    // Destination slot is fresh from allocate_row: move in
                    // without dropping.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            src,
                            dst_column.get_raw(dst_row as usize),
                            column.info().size,
                        );
                    }
                    moved += 1;
                }
                None => unsafe {
                    column.drop_slot(src_row as usize);
                },
            }
        }
        moved
    }

    /// Drop the old value in `row`'s column for `type_id` and move the value
    /// at `src` in, marking the slot changed at `tick`.
    ///
    /// # Safety
    /// `src` must point to a valid value of the column's type; ownership
    /// transfers to the table.
    pub unsafe fn set_component_erased(
        &mut self,
        row: u32,
        type_id: TypeId,
        src: *const u8,
        tick: Tick,
    ) {
        let index = *self
            .column_index
            .get(&type_id)
            .expect("component type not in table");
        self.columns[index].replace_erased(row as usize, src, tick);
    }

    /// Initialize a freshly allocated slot with a typed value.
    ///
    /// # Safety
    /// The slot must be uninitialized (fresh from `allocate_row`).
    pub unsafe fn write_initial<T: Component>(&mut self, row: u32, value: T) {
        let index = *self
            .column_index
            .get(&TypeId::of::<T>())
            .expect("component type not in table");
        self.columns[index].init_slot(row as usize, value);
    }

    #[inline]
    pub fn has(&self, type_id: TypeId) -> bool {
        self.column_index.contains_key(&type_id)
    }

    #[inline]
    pub fn column_index(&self, type_id: TypeId) -> Option<usize> {
        self.column_index.get(&type_id).copied()
    }

    #[inline]
    pub fn column(&self, type_id: TypeId) -> Option<&Column> {
        self.column_index.get(&type_id).map(|&i| &self.columns[i])
    }

    #[inline]
    pub fn column_mut(&mut self, type_id: TypeId) -> Option<&mut Column> {
        let index = *self.column_index.get(&type_id)?;
        Some(&mut self.columns[index])
    }

    #[inline]
    pub fn column_by_index(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    #[inline]
    pub fn column_by_index_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn entity(&self, row: u32) -> Entity {
        self.entities[row as usize]
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn reserve_rows(&mut self, additional: usize) {
        self.entities.reserve(additional);
        let needed = self.entities.len() + additional;
        for column in &mut self.columns {
            column.reserve(needed);
        }
    }
}
