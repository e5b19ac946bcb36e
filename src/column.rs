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

//! Type-erased component column
//!
//! One contiguous, component-aligned allocation per component type per table,
//! with a parallel array of change ticks. Element `i` is initialized iff
//! `i < len`, except for the window inside a structural operation between
//! `push_uninit` and the caller's write.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::component::{Component, ComponentInfo, TypeId};
use crate::tick::{ComponentTicks, Tick};

/// Type-erased, aligned contiguous storage for one component type.
pub struct Column {
    info: ComponentInfo,
    data: NonNull<u8>,
    capacity: usize,
    len: usize,
    ticks: Vec<ComponentTicks>,
}

// Access is mediated by the world and the scheduler's conflict graph.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    pub fn new(info: ComponentInfo, initial_capacity: usize) -> Self {
        let mut column = Self {
            info,
            data: NonNull::dangling(),
            capacity: 0,
            len: 0,
            ticks: Vec::new(),
        };
        column.reserve(initial_capacity);
        column
    }

    #[inline]
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.info.type_id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        if self.info.size == 0 {
            usize::MAX
        } else {
            self.capacity
        }
    }

    /// Grow to at least `new_capacity` slots. Geometric doubling from 8.
    pub fn reserve(&mut self, new_capacity: usize) {
        self.ticks.reserve(new_capacity.saturating_sub(self.ticks.len()));
        if self.info.size == 0 || new_capacity <= self.capacity {
            return;
        }
        self.grow_to(new_capacity);
    }

    fn grow_to(&mut self, new_capacity: usize) {
        let layout = Layout::from_size_align(new_capacity * self.info.size, self.info.align)
            .expect("column layout overflow");
        // SAFETY: layout has non-zero size (size != 0 checked by callers).
        let new_data = unsafe { alloc::alloc(layout) };
        let Some(new_data) = NonNull::new(new_data) else {
            alloc::handle_alloc_error(layout);
        };

        if self.capacity != 0 {
            // Relocation is a bytewise move; the old slots are left
            // uninitialized and must not be dropped.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.data.as_ptr(),
                    new_data.as_ptr(),
                    self.len * self.info.size,
                );
                let old_layout =
                    Layout::from_size_align_unchecked(self.capacity * self.info.size, self.info.align);
                alloc::dealloc(self.data.as_ptr(), old_layout);
            }
        }

        self.data = new_data;
        self.capacity = new_capacity;
    }

    fn ensure_capacity(&mut self, required: usize) {
        if self.info.size == 0 || required <= self.capacity {
            return;
        }
        let mut new_capacity = if self.capacity == 0 { 8 } else { self.capacity * 2 };
        while new_capacity < required {
            new_capacity *= 2;
        }
        self.grow_to(new_capacity);
    }

    /// Append one uninitialized slot stamped with `tick` and return its index.
    ///
    /// The caller must initialize the slot before any operation that reads or
    /// drops it. Every structural path in the world does so before returning.
    pub fn push_uninit(&mut self, tick: Tick) -> usize {
        self.ensure_capacity(self.len + 1);
        self.ticks.push(ComponentTicks::new(tick));
        let index = self.len;
        self.len += 1;
        index
    }

    /// Remove slot `index` by moving the last slot into it.
    ///
    /// The removed value is dropped; the moved-in slot keeps its tick pair.
    pub fn swap_remove(&mut self, index: usize) {
        assert!(index < self.len, "column swap_remove out of bounds");

        let last = self.len - 1;
        unsafe {
            let dst = self.slot_ptr(index);
            if let Some(drop_fn) = self.info.drop_fn {
                drop_fn(dst);
            }
            if index != last {
                ptr::copy_nonoverlapping(self.slot_ptr(last), dst, self.info.size);
                self.ticks[index] = self.ticks[last];
            }
        }
        self.ticks.pop();
        self.len = last;
    }

    /// Swap-remove for a slot whose value was already moved out: relocates the
    /// last slot bytewise without dropping the removed one.
    ///
    /// # Safety
    /// The value at `index` must have been moved out (transition paths).
    pub unsafe fn swap_remove_no_drop(&mut self, index: usize) {
        debug_assert!(index < self.len, "column swap_remove out of bounds");
        let last = self.len - 1;
        if index != last {
            ptr::copy_nonoverlapping(self.slot_ptr(last), self.slot_ptr(index), self.info.size);
            self.ticks[index] = self.ticks[last];
        }
        self.ticks.pop();
        self.len = last;
    }

    /// Drop the value in place, leaving the slot uninitialized.
    ///
    /// # Safety
    /// The slot must be initialized; the caller must remove it via
    /// [`Column::swap_remove_no_drop`] before anything else touches it.
    pub unsafe fn drop_slot(&mut self, index: usize) {
        debug_assert!(index < self.len);
        if let Some(drop_fn) = self.info.drop_fn {
            drop_fn(self.slot_ptr(index));
        }
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> *mut u8 {
        if self.info.size == 0 {
            return NonNull::<u8>::dangling().as_ptr();
        }
        // SAFETY: callers stay within capacity.
        unsafe { self.data.as_ptr().add(index * self.info.size) }
    }

    /// Raw pointer to slot `index`.
    #[inline]
    pub fn get_raw(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len, "column index out of bounds");
        self.slot_ptr(index)
    }

    /// Base pointer of the storage (for query iteration).
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.slot_ptr(0)
    }

    /// Typed read access.
    pub fn get<T: Component>(&self, index: usize) -> Option<&T> {
        debug_assert_eq!(TypeId::of::<T>(), self.info.type_id, "column type mismatch");
        if index >= self.len {
            return None;
        }
        Some(unsafe { &*(self.slot_ptr(index) as *const T) })
    }

    /// Typed write access. Does not mark the slot changed; callers that hand
    /// out mutable references stamp the tick themselves.
    pub fn get_mut<T: Component>(&mut self, index: usize) -> Option<&mut T> {
        debug_assert_eq!(TypeId::of::<T>(), self.info.type_id, "column type mismatch");
        if index >= self.len {
            return None;
        }
        Some(unsafe { &mut *(self.slot_ptr(index) as *mut T) })
    }

    /// Initialize a freshly pushed slot with a typed value.
    ///
    /// # Safety
    /// The slot must be uninitialized (fresh from `push_uninit`).
    pub unsafe fn init_slot<T: Component>(&mut self, index: usize, value: T) {
        debug_assert_eq!(TypeId::of::<T>(), self.info.type_id, "column type mismatch");
        debug_assert!(index < self.len);
        ptr::write(self.slot_ptr(index) as *mut T, value);
    }

    /// Drop the old value at `index` and move the value at `src` in its
    /// place, stamping the changed tick.
    ///
    /// # Safety
    /// `src` must point to a valid value of this column's type; ownership
    /// transfers to the column (the source must not be dropped).
    pub unsafe fn replace_erased(&mut self, index: usize, src: *const u8, tick: Tick) {
        assert!(index < self.len, "column replace out of bounds");
        let dst = self.slot_ptr(index);
        if let Some(drop_fn) = self.info.drop_fn {
            drop_fn(dst);
        }
        ptr::copy_nonoverlapping(src, dst, self.info.size);
        self.ticks[index].mark_changed(tick);
    }

    #[inline]
    pub fn ticks(&self, index: usize) -> ComponentTicks {
        self.ticks[index]
    }

    #[inline]
    pub fn ticks_slice(&self) -> &[ComponentTicks] {
        &self.ticks
    }

    #[inline]
    pub fn ticks_ptr(&self) -> *const ComponentTicks {
        self.ticks.as_ptr()
    }

    #[inline]
    pub fn mark_changed(&mut self, index: usize, tick: Tick) {
        self.ticks[index].mark_changed(tick);
    }

    /// True iff any slot changed since `last_run` (archetype-level skip).
    pub fn changed_since(&self, last_run: Tick) -> bool {
        self.ticks.iter().any(|t| t.was_changed(last_run))
    }

    /// True iff any slot was added since `last_run`.
    pub fn added_since(&self, last_run: Tick) -> bool {
        self.ticks.iter().any(|t| t.was_added(last_run))
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        unsafe {
            if let Some(drop_fn) = self.info.drop_fn {
                for i in 0..self.len {
                    drop_fn(self.slot_ptr(i));
                }
            }
            if self.capacity != 0 && self.info.size != 0 {
                let layout =
                    Layout::from_size_align_unchecked(self.capacity * self.info.size, self.info.align);
                alloc::dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Vec3 {
        x: f32,
        y: f32,
        z: f32,
    }

    fn push_value<T: Component>(column: &mut Column, value: T, tick: Tick) -> usize {
        let index = column.push_uninit(tick);
        unsafe { column.init_slot(index, value) };
        index
    }

    #[test]
    fn test_push_and_get() {
        let mut column = Column::new(ComponentInfo::of::<Vec3>(), 4);
        let v = Vec3 { x: 1.0, y: 2.0, z: 3.0 };
        let index = push_value(&mut column, v, Tick(1));
        assert_eq!(column.len(), 1);
        assert_eq!(column.get::<Vec3>(index), Some(&v));
        assert_eq!(column.ticks(index).added, Tick(1));
        assert_eq!(column.ticks(index).changed, Tick(1));
    }

    #[test]
    fn test_growth_preserves_values() {
        let mut column = Column::new(ComponentInfo::of::<u64>(), 0);
        for i in 0..100u64 {
            push_value(&mut column, i, Tick(0));
        }
        for i in 0..100u64 {
            assert_eq!(column.get::<u64>(i as usize), Some(&i));
        }
        assert!(column.capacity() >= 100);
    }

    #[test]
    fn test_swap_remove_moves_last_with_ticks() {
        let mut column = Column::new(ComponentInfo::of::<u32>(), 4);
        push_value(&mut column, 10u32, Tick(1));
        push_value(&mut column, 20u32, Tick(2));
        push_value(&mut column, 30u32, Tick(3));

        column.swap_remove(0);
        assert_eq!(column.len(), 2);
        assert_eq!(column.get::<u32>(0), Some(&30));
        assert_eq!(column.ticks(0).added, Tick(3));
        assert_eq!(column.get::<u32>(1), Some(&20));
    }

    #[test]
    fn test_swap_remove_last() {
        let mut column = Column::new(ComponentInfo::of::<u32>(), 4);
        push_value(&mut column, 1u32, Tick(0));
        push_value(&mut column, 2u32, Tick(0));
        column.swap_remove(1);
        assert_eq!(column.len(), 1);
        assert_eq!(column.get::<u32>(0), Some(&1));
    }

    #[test]
    fn test_drop_runs_destructors() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROPS.store(0, Ordering::SeqCst);
        {
            let mut column = Column::new(ComponentInfo::of::<Tracked>(), 2);
            push_value(&mut column, Tracked, Tick(0));
            push_value(&mut column, Tracked, Tick(0));
            push_value(&mut column, Tracked, Tick(0));
            column.swap_remove(1);
            assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_replace_drops_old_and_marks_changed() {
        let mut column = Column::new(ComponentInfo::of::<String>(), 2);
        push_value(&mut column, String::from("old"), Tick(1));

        let new = String::from("new");
        unsafe {
            column.replace_erased(0, &new as *const String as *const u8, Tick(5));
            std::mem::forget(new);
        }
        assert_eq!(column.get::<String>(0).map(|s| s.as_str()), Some("new"));
        assert_eq!(column.ticks(0).changed, Tick(5));
        assert_eq!(column.ticks(0).added, Tick(1));
    }

    #[test]
    fn test_zero_sized_components() {
        struct Tag;
        let mut column = Column::new(ComponentInfo::of::<Tag>(), 4);
        push_value(&mut column, Tag, Tick(0));
        push_value(&mut column, Tag, Tick(0));
        assert_eq!(column.len(), 2);
        column.swap_remove(0);
        assert_eq!(column.len(), 1);
    }

    #[test]
    fn test_alignment_respected() {
        #[repr(align(32))]
        #[derive(Clone, Copy)]
        struct Aligned(#[allow(dead_code)] [u8; 32]);

        let mut column = Column::new(ComponentInfo::of::<Aligned>(), 1);
        for _ in 0..9 {
            push_value(&mut column, Aligned([7; 32]), Tick(0));
        }
        assert_eq!(column.base_ptr() as usize % 32, 0);
    }
}
