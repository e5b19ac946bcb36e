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

//! Query engine with archetype filtering and change detection
//!
//! Queries are declared as terms: a component type, an operator (with /
//! without / optional) and an access mode. Compilation folds terms into a
//! [`QuerySignature`]; matching walks archetypes once and is cached until the
//! archetype graph grows. The typed layer ([`QueryFetch`] / [`QueryFetchMut`])
//! turns matching rows into tuples of references, marking changed ticks on
//! mutable access.

use std::marker::PhantomData;
use std::ptr::NonNull;

use smallvec::SmallVec;

use crate::archetype::{Archetype, ArchetypeHandle};
use crate::component::{Component, TypeId};
use crate::entity::Entity;
use crate::tick::{ComponentTicks, Tick};
use crate::world::World;

const MAX_QUERY_TERMS: usize = 8;

/// How a term constrains archetype membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOp {
    /// Archetype must contain the component.
    With,
    /// Archetype must not contain the component.
    Without,
    /// Component is fetched when present, null otherwise.
    Optional,
}

/// How a term accesses component data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermAccess {
    Read,
    Write,
    None,
}

/// One condition of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    pub type_id: TypeId,
    pub op: TermOp,
    pub access: TermAccess,
}

impl Term {
    pub fn with<T: Component>(access: TermAccess) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            op: TermOp::With,
            access,
        }
    }

    pub fn without<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            op: TermOp::Without,
            access: TermAccess::None,
        }
    }

    pub fn optional<T: Component>(access: TermAccess) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            op: TermOp::Optional,
            access,
        }
    }
}

/// Compiled component-set filter for query caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QuerySignature {
    /// Components that must be present
    pub required: SmallVec<[TypeId; 8]>,
    /// Components that must be absent
    pub excluded: SmallVec<[TypeId; 8]>,
    /// Components fetched when present
    pub optional: SmallVec<[TypeId; 8]>,
}

impl QuerySignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a term list into the three sets, sorted and deduplicated.
    pub fn from_terms(terms: &[Term]) -> Self {
        let mut sig = Self::new();
        for term in terms {
            match term.op {
                TermOp::With => sig.required.push(term.type_id),
                TermOp::Without => sig.excluded.push(term.type_id),
                TermOp::Optional => sig.optional.push(term.type_id),
            }
        }
        sig.canonicalize();
        sig
    }

    fn canonicalize(&mut self) {
        self.required.sort();
        self.required.dedup();
        self.excluded.sort();
        self.excluded.dedup();
        self.optional.sort();
        self.optional.dedup();
    }

    /// An archetype matches iff it has every required type and no excluded
    /// type. Optional terms never affect matching.
    pub fn matches(&self, archetype: &Archetype) -> bool {
        for &required in &self.required {
            if !archetype.has(required) {
                return false;
            }
        }
        for &excluded in &self.excluded {
            if archetype.has(excluded) {
                return false;
            }
        }
        true
    }
}

/// Cached match list for one signature, refreshed incrementally while the
/// archetype graph grows.
pub struct CachedMatches {
    pub matches: Vec<ArchetypeHandle>,
    pub seen_archetypes: usize,
    pub seen_generation: u32,
    pub signature: QuerySignature,
}

impl CachedMatches {
    pub fn new(signature: QuerySignature, archetypes: &[Archetype], generation: u32) -> Self {
        let matches = archetypes
            .iter()
            .enumerate()
            .filter(|(_, arch)| signature.matches(arch))
            .map(|(handle, _)| handle as ArchetypeHandle)
            .collect();

        Self {
            matches,
            seen_archetypes: archetypes.len(),
            seen_generation: generation,
            signature,
        }
    }

    /// Scan only the archetypes created since the last update.
    pub fn update(&mut self, archetypes: &[Archetype], generation: u32) {
        if generation == self.seen_generation {
            return;
        }
        for (handle, arch) in archetypes.iter().enumerate().skip(self.seen_archetypes) {
            if self.signature.matches(arch) {
                self.matches.push(handle as ArchetypeHandle);
            }
        }
        self.seen_archetypes = archetypes.len();
        self.seen_generation = generation;
    }
}

/// Query filter trait for type-level archetype matching
pub trait QueryFilter {
    /// Check if archetype matches this query
    fn matches_archetype(archetype: &Archetype) -> bool;

    /// Append this filter's terms
    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>);

    /// Get query signature for caching
    fn signature() -> QuerySignature {
        let mut terms = SmallVec::new();
        Self::collect_terms(&mut terms);
        QuerySignature::from_terms(&terms)
    }
}

// ---------------------------------------------------------------------------
// Fetch traits
// ---------------------------------------------------------------------------

/// Trait for fetching component data (immutable)
///
/// # Safety
/// Implementations must ensure that `fetch` is safe to call with the state
/// returned by `prepare` for any row below the archetype's row count.
pub unsafe trait QueryFetch<'w>: QueryFilter {
    /// The type of data returned by the query
    type Item;
    /// State used to fetch data (e.g. column pointers)
    type State;

    /// Prepare to fetch from an archetype. Returning None skips the whole
    /// archetype (empty, or a change filter saw nothing new).
    fn prepare(archetype: &'w Archetype, last_run: Tick) -> Option<Self::State>;

    /// Fetch data for a specific row
    ///
    /// # Safety
    /// `row` must be valid for the archetype used in `prepare`.
    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item>;
}

/// Trait for fetching component data (mutable)
///
/// # Safety
/// As [`QueryFetch`], and `fetch` must not be called twice for the same row
/// (aliasing of `&mut` items).
pub unsafe trait QueryFetchMut<'w>: QueryFilter {
    type Item;
    type State;

    fn prepare(
        archetype: &'w mut Archetype,
        last_run: Tick,
        current_tick: Tick,
    ) -> Option<Self::State>;

    /// # Safety
    /// `row` must be valid for the archetype used in `prepare` and must not
    /// repeat.
    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item>;
}

// ---------------------------------------------------------------------------
// Leaf implementations
// ---------------------------------------------------------------------------

impl<T: Component> QueryFilter for &T {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has(TypeId::of::<T>())
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::with::<T>(TermAccess::Read));
    }
}

unsafe impl<'w, T: Component> QueryFetch<'w> for &'w T {
    type Item = &'w T;
    type State = (*const u8, usize);

    fn prepare(archetype: &'w Archetype, _last_run: Tick) -> Option<Self::State> {
        let column = archetype.table().column(TypeId::of::<T>())?;
        Some((column.base_ptr() as *const u8, column.info().size))
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        let (base, size) = *state;
        Some(&*(base.add(row * size) as *const T))
    }
}

impl<T: Component> QueryFilter for &mut T {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has(TypeId::of::<T>())
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::with::<T>(TermAccess::Write));
    }
}

/// Write state: base pointer, tick array, stride, and the stamp tick.
pub struct WriteState {
    base: *mut u8,
    ticks: *mut ComponentTicks,
    size: usize,
    current_tick: Tick,
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for &'w mut T {
    type Item = &'w mut T;
    type State = WriteState;

    fn prepare(
        archetype: &'w mut Archetype,
        _last_run: Tick,
        current_tick: Tick,
    ) -> Option<Self::State> {
        let column = archetype.table_mut().column_mut(TypeId::of::<T>())?;
        Some(WriteState {
            base: column.base_ptr(),
            ticks: column.ticks_ptr() as *mut ComponentTicks,
            size: column.info().size,
            current_tick,
        })
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        // Mutable access marks the slot changed at the current world tick.
        (*state.ticks.add(row)).mark_changed(state.current_tick);
        Some(&mut *(state.base.add(row * state.size) as *mut T))
    }
}

/// Mixed-mutability tuples: a read term inside a mutable query.
unsafe impl<'w, T: Component> QueryFetchMut<'w> for &'w T {
    type Item = &'w T;
    type State = (*const u8, usize);

    fn prepare(
        archetype: &'w mut Archetype,
        last_run: Tick,
        _current_tick: Tick,
    ) -> Option<Self::State> {
        <&T as QueryFetch>::prepare(archetype, last_run)
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        <&T as QueryFetch>::fetch(state, row)
    }
}

// Optional terms: pointer is null when the archetype lacks the component.

impl<T: Component> QueryFilter for Option<&T> {
    fn matches_archetype(_archetype: &Archetype) -> bool {
        true
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::optional::<T>(TermAccess::Read));
    }
}

unsafe impl<'w, T: Component> QueryFetch<'w> for Option<&'w T> {
    type Item = Option<&'w T>;
    type State = Option<(*const u8, usize)>;

    fn prepare(archetype: &'w Archetype, last_run: Tick) -> Option<Self::State> {
        Some(<&T as QueryFetch>::prepare(archetype, last_run))
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        match state {
            Some(inner) => Some(<&T as QueryFetch>::fetch(inner, row)),
            None => Some(None),
        }
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for Option<&'w T> {
    type Item = Option<&'w T>;
    type State = Option<(*const u8, usize)>;

    fn prepare(
        archetype: &'w mut Archetype,
        last_run: Tick,
        _current_tick: Tick,
    ) -> Option<Self::State> {
        Some(<&T as QueryFetch>::prepare(archetype, last_run))
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        match state {
            Some(inner) => Some(<&T as QueryFetch>::fetch(inner, row)),
            None => Some(None),
        }
    }
}

impl<T: Component> QueryFilter for Option<&mut T> {
    fn matches_archetype(_archetype: &Archetype) -> bool {
        true
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::optional::<T>(TermAccess::Write));
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for Option<&'w mut T> {
    type Item = Option<&'w mut T>;
    type State = Option<WriteState>;

    fn prepare(
        archetype: &'w mut Archetype,
        last_run: Tick,
        current_tick: Tick,
    ) -> Option<Self::State> {
        Some(<&mut T as QueryFetchMut>::prepare(
            archetype,
            last_run,
            current_tick,
        ))
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        match state {
            Some(inner) => Some(<&mut T as QueryFetchMut>::fetch(inner, row)),
            None => Some(None),
        }
    }
}

/// Marker type for fetching the row's [`Entity`] in queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef;

impl QueryFilter for EntityRef {
    fn matches_archetype(_archetype: &Archetype) -> bool {
        true
    }

    fn collect_terms(_terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {}
}

unsafe impl<'w> QueryFetch<'w> for EntityRef {
    type Item = Entity;
    type State = &'w [Entity];

    fn prepare(archetype: &'w Archetype, _last_run: Tick) -> Option<Self::State> {
        Some(archetype.table().entities())
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        state.get(row).copied()
    }
}

unsafe impl<'w> QueryFetchMut<'w> for EntityRef {
    type Item = Entity;
    type State = *const Entity;

    fn prepare(
        archetype: &'w mut Archetype,
        _last_run: Tick,
        _current_tick: Tick,
    ) -> Option<Self::State> {
        Some(archetype.table().entities().as_ptr())
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        Some(*state.add(row))
    }
}

/// Filter for entities with component T (no data access)
pub struct With<T>(PhantomData<T>);

impl<T: Component> QueryFilter for With<T> {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has(TypeId::of::<T>())
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::with::<T>(TermAccess::None));
    }
}

unsafe impl<'w, T: Component> QueryFetch<'w> for With<T> {
    type Item = ();
    type State = ();

    fn prepare(_archetype: &'w Archetype, _last_run: Tick) -> Option<Self::State> {
        Some(())
    }

    unsafe fn fetch(_state: &Self::State, _row: usize) -> Option<Self::Item> {
        Some(())
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for With<T> {
    type Item = ();
    type State = ();

    fn prepare(
        _archetype: &'w mut Archetype,
        _last_run: Tick,
        _current_tick: Tick,
    ) -> Option<Self::State> {
        Some(())
    }

    unsafe fn fetch(_state: &mut Self::State, _row: usize) -> Option<Self::Item> {
        Some(())
    }
}

/// Filter for entities without component T
pub struct Without<T>(PhantomData<T>);

impl<T: Component> QueryFilter for Without<T> {
    fn matches_archetype(archetype: &Archetype) -> bool {
        !archetype.has(TypeId::of::<T>())
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::without::<T>());
    }
}

unsafe impl<'w, T: Component> QueryFetch<'w> for Without<T> {
    type Item = ();
    type State = ();

    fn prepare(_archetype: &'w Archetype, _last_run: Tick) -> Option<Self::State> {
        Some(())
    }

    unsafe fn fetch(_state: &Self::State, _row: usize) -> Option<Self::Item> {
        Some(())
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for Without<T> {
    type Item = ();
    type State = ();

    fn prepare(
        _archetype: &'w mut Archetype,
        _last_run: Tick,
        _current_tick: Tick,
    ) -> Option<Self::State> {
        Some(())
    }

    unsafe fn fetch(_state: &mut Self::State, _row: usize) -> Option<Self::Item> {
        Some(())
    }
}

/// Change filter: only rows whose `T` changed since the query's last run.
///
/// Usage: `Query<(&Position, Changed<Position>)>`
pub struct Changed<T: Component>(PhantomData<T>);

impl<T: Component> QueryFilter for Changed<T> {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has(TypeId::of::<T>())
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::with::<T>(TermAccess::None));
    }
}

unsafe impl<'w, T: Component> QueryFetch<'w> for Changed<T> {
    type Item = ();
    type State = (&'w [ComponentTicks], Tick);

    fn prepare(archetype: &'w Archetype, last_run: Tick) -> Option<Self::State> {
        let column = archetype.table().column(TypeId::of::<T>())?;
        // Archetype-level skip when nothing changed.
        if !column.changed_since(last_run) {
            return None;
        }
        Some((column.ticks_slice(), last_run))
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        let (ticks, last_run) = state;
        if ticks.get(row)?.was_changed(*last_run) {
            Some(())
        } else {
            None
        }
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for Changed<T> {
    type Item = ();
    type State = (&'w [ComponentTicks], Tick);

    fn prepare(
        archetype: &'w mut Archetype,
        last_run: Tick,
        _current_tick: Tick,
    ) -> Option<Self::State> {
        <Changed<T> as QueryFetch>::prepare(archetype, last_run)
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        <Changed<T> as QueryFetch>::fetch(state, row)
    }
}

/// Addition filter: only rows whose `T` was added since the query's last run.
pub struct Added<T: Component>(PhantomData<T>);

impl<T: Component> QueryFilter for Added<T> {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has(TypeId::of::<T>())
    }

    fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
        terms.push(Term::with::<T>(TermAccess::None));
    }
}

unsafe impl<'w, T: Component> QueryFetch<'w> for Added<T> {
    type Item = ();
    type State = (&'w [ComponentTicks], Tick);

    fn prepare(archetype: &'w Archetype, last_run: Tick) -> Option<Self::State> {
        let column = archetype.table().column(TypeId::of::<T>())?;
        if !column.added_since(last_run) {
            return None;
        }
        Some((column.ticks_slice(), last_run))
    }

    unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
        let (ticks, last_run) = state;
        if ticks.get(row)?.was_added(*last_run) {
            Some(())
        } else {
            None
        }
    }
}

unsafe impl<'w, T: Component> QueryFetchMut<'w> for Added<T> {
    type Item = ();
    type State = (&'w [ComponentTicks], Tick);

    fn prepare(
        archetype: &'w mut Archetype,
        last_run: Tick,
        _current_tick: Tick,
    ) -> Option<Self::State> {
        <Added<T> as QueryFetch>::prepare(archetype, last_run)
    }

    unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
        <Added<T> as QueryFetch>::fetch(state, row)
    }
}

// ---------------------------------------------------------------------------
// Tuple implementations
// ---------------------------------------------------------------------------

macro_rules! impl_query_filter {
    ($($T:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($T: QueryFilter),*> QueryFilter for ($($T,)*) {
            fn matches_archetype(archetype: &Archetype) -> bool {
                $($T::matches_archetype(archetype))&&*
            }

            fn collect_terms(terms: &mut SmallVec<[Term; MAX_QUERY_TERMS]>) {
                $($T::collect_terms(terms);)*
            }
        }
    };
}

impl_query_filter!(A);
impl_query_filter!(A, B);
impl_query_filter!(A, B, C);
impl_query_filter!(A, B, C, D);
impl_query_filter!(A, B, C, D, E);
impl_query_filter!(A, B, C, D, E, F);
impl_query_filter!(A, B, C, D, E, F, G);
impl_query_filter!(A, B, C, D, E, F, G, H);

macro_rules! impl_query_fetch {
    ($($T:ident $idx:tt),*) => {
        unsafe impl<'w, $($T: QueryFetch<'w>),*> QueryFetch<'w> for ($($T,)*) {
            type Item = ($($T::Item,)*);
            type State = ($($T::State,)*);

            fn prepare(archetype: &'w Archetype, last_run: Tick) -> Option<Self::State> {
                Some(($($T::prepare(archetype, last_run)?,)*))
            }

            unsafe fn fetch(state: &Self::State, row: usize) -> Option<Self::Item> {
                Some(($($T::fetch(&state.$idx, row)?,)*))
            }
        }

        unsafe impl<'w, $($T: QueryFetchMut<'w>),*> QueryFetchMut<'w> for ($($T,)*) {
            type Item = ($($T::Item,)*);
            type State = ($($T::State,)*);

            fn prepare(
                archetype: &'w mut Archetype,
                last_run: Tick,
                current_tick: Tick,
            ) -> Option<Self::State> {
                // Each term targets a distinct column; the raw pointer lets
                // every term take its own column pointer out of the same
                // archetype borrow.
                let ptr = archetype as *mut Archetype;
                Some(($($T::prepare(unsafe { &mut *ptr }, last_run, current_tick)?,)*))
            }

            unsafe fn fetch(state: &mut Self::State, row: usize) -> Option<Self::Item> {
                Some(($($T::fetch(&mut state.$idx, row)?,)*))
            }
        }
    };
}

impl_query_fetch!(A 0);
impl_query_fetch!(A 0, B 1);
impl_query_fetch!(A 0, B 1, C 2);
impl_query_fetch!(A 0, B 1, C 2, D 3);
impl_query_fetch!(A 0, B 1, C 2, D 3, E 4);
impl_query_fetch!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_query_fetch!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_query_fetch!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// Immutable query iterator
pub struct QueryIter<'w, Q: QueryFilter>
where
    Q: QueryFetch<'w>,
{
    archetypes: Vec<NonNull<Archetype>>,
    archetype_index: usize,
    row: usize,
    last_run: Tick,
    state: Option<Q::State>,
    _phantom: PhantomData<&'w Q>,
}

impl<'w, Q: QueryFilter> QueryIter<'w, Q>
where
    Q: QueryFetch<'w>,
{
    pub(crate) fn new(world: &'w World, matched: &[ArchetypeHandle], last_run: Tick) -> Self {
        let archetypes = matched
            .iter()
            .filter_map(|&handle| NonNull::new(world.archetype_ptr(handle)))
            .collect();
        Self {
            archetypes,
            archetype_index: 0,
            row: 0,
            last_run,
            state: None,
            _phantom: PhantomData,
        }
    }
}

impl<'w, Q> Iterator for QueryIter<'w, Q>
where
    Q: QueryFilter + QueryFetch<'w>,
{
    type Item = <Q as QueryFetch<'w>>::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state.is_none() {
                if self.archetype_index >= self.archetypes.len() {
                    return None;
                }
                // SAFETY: pointer comes from the world and outlives 'w.
                let archetype = unsafe { self.archetypes[self.archetype_index].as_ref() };
                self.state = Q::prepare(archetype, self.last_run);
                self.row = 0;

                // A change filter may reject the whole archetype.
                if self.state.is_none() {
                    self.archetype_index += 1;
                    continue;
                }
            }

            let archetype = unsafe { self.archetypes[self.archetype_index].as_ref() };
            if self.row >= archetype.row_count() {
                self.state = None;
                self.archetype_index += 1;
                continue;
            }

            let row = self.row;
            self.row += 1;

            // SAFETY: row bounds checked above against the prepared archetype.
            if let Some(item) = unsafe { Q::fetch(self.state.as_ref().unwrap(), row) } {
                return Some(item);
            }
            // Row-level filter miss; keep scanning.
        }
    }
}

/// Mutable query iterator
pub struct QueryIterMut<'w, Q: QueryFilter>
where
    Q: QueryFetchMut<'w>,
{
    archetypes: Vec<NonNull<Archetype>>,
    archetype_index: usize,
    row: usize,
    last_run: Tick,
    current_tick: Tick,
    state: Option<Q::State>,
    _phantom: PhantomData<&'w mut Q>,
}

impl<'w, Q: QueryFilter> QueryIterMut<'w, Q>
where
    Q: QueryFetchMut<'w>,
{
    pub(crate) fn new(
        world: &'w mut World,
        matched: &[ArchetypeHandle],
        last_run: Tick,
        current_tick: Tick,
    ) -> Self {
        let archetypes = matched
            .iter()
            .filter_map(|&handle| NonNull::new(world.archetype_ptr(handle)))
            .collect();
        Self {
            archetypes,
            archetype_index: 0,
            row: 0,
            last_run,
            current_tick,
            state: None,
            _phantom: PhantomData,
        }
    }
}

impl<'w, Q> Iterator for QueryIterMut<'w, Q>
where
    Q: QueryFilter + QueryFetchMut<'w>,
{
    type Item = <Q as QueryFetchMut<'w>>::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state.is_none() {
                if self.archetype_index >= self.archetypes.len() {
                    return None;
                }
                // SAFETY: pointer comes from the world and outlives 'w.
                let archetype = unsafe { self.archetypes[self.archetype_index].as_mut() };
                self.state = Q::prepare(archetype, self.last_run, self.current_tick);
                self.row = 0;

                if self.state.is_none() {
                    self.archetype_index += 1;
                    continue;
                }
            }

            let archetype = unsafe { self.archetypes[self.archetype_index].as_ref() };
            if self.row >= archetype.row_count() {
                self.state = None;
                self.archetype_index += 1;
                continue;
            }

            let row = self.row;
            self.row += 1;

            // SAFETY: rows are strictly increasing, so no item aliases.
            if let Some(item) = unsafe { Q::fetch(self.state.as_mut().unwrap(), row) } {
                return Some(item);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stateful query objects
// ---------------------------------------------------------------------------

/// Cached query state: pre-computed matching archetypes, refreshed
/// incrementally when the archetype graph grows.
pub struct QueryState<F> {
    matches: Vec<ArchetypeHandle>,
    seen_archetypes: usize,
    seen_generation: u32,
    _phantom: PhantomData<F>,
}

impl<F: QueryFilter> QueryState<F> {
    pub fn new(world: &World) -> Self {
        let matches = world
            .archetypes()
            .iter()
            .enumerate()
            .filter(|(_, arch)| F::matches_archetype(arch))
            .map(|(handle, _)| handle as ArchetypeHandle)
            .collect();
        Self {
            matches,
            seen_archetypes: world.archetype_count(),
            seen_generation: world.archetype_generation(),
            _phantom: PhantomData,
        }
    }

    /// Incrementally pick up archetypes created since the last update.
    pub fn update(&mut self, world: &World) {
        let generation = world.archetype_generation();
        if generation == self.seen_generation {
            return;
        }
        for (handle, arch) in world
            .archetypes()
            .iter()
            .enumerate()
            .skip(self.seen_archetypes)
        {
            if F::matches_archetype(arch) {
                self.matches.push(handle as ArchetypeHandle);
            }
        }
        self.seen_archetypes = world.archetype_count();
        self.seen_generation = generation;
    }

    pub fn iter<'w>(&self, world: &'w World, last_run: Tick) -> QueryIter<'w, F>
    where
        F: QueryFetch<'w>,
    {
        QueryIter::new(world, &self.matches, last_run)
    }

    pub fn iter_mut<'w>(&self, world: &'w mut World, last_run: Tick) -> QueryIterMut<'w, F>
    where
        F: QueryFetchMut<'w>,
    {
        let current_tick = world.tick();
        QueryIterMut::new(world, &self.matches, last_run, current_tick)
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn matches(&self) -> &[ArchetypeHandle] {
        &self.matches
    }
}

/// Persistent query with a per-query last-run tick.
///
/// This is the carrier for change filters: each iteration records the world
/// tick, and the next iteration's `Changed`/`Added` terms compare against it.
pub struct CachedQuery<F: QueryFilter> {
    state: QueryState<F>,
    last_run: Tick,
}

impl<F: QueryFilter> CachedQuery<F> {
    pub fn new(world: &World) -> Self {
        Self {
            state: QueryState::new(world),
            last_run: Tick::ZERO,
        }
    }

    pub fn iter<'w>(&mut self, world: &'w World) -> QueryIter<'w, F>
    where
        F: QueryFetch<'w> + 'w,
    {
        self.state.update(world);
        let iter = self.state.iter(world, self.last_run);
        self.last_run = world.tick();
        iter
    }

    pub fn iter_mut<'w>(&mut self, world: &'w mut World) -> QueryIterMut<'w, F>
    where
        F: QueryFetchMut<'w>,
    {
        self.state.update(world);
        let tick = world.tick();
        let iter = self.state.iter_mut(world, self.last_run);
        self.last_run = tick;
        iter
    }

    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    pub fn state(&self) -> &QueryState<F> {
        &self.state
    }
}

/// Borrowing immutable query wrapper (uses the world's match cache).
pub struct Query<'w, Q>
where
    Q: QueryFilter + QueryFetch<'w>,
{
    world: &'w World,
    _phantom: PhantomData<Q>,
}

impl<'w, Q> Query<'w, Q>
where
    Q: QueryFilter + QueryFetch<'w> + 'w,
{
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            _phantom: PhantomData,
        }
    }

    pub fn iter(&self) -> QueryIter<'w, Q> {
        let matched = self.world.cached_matches_for::<Q>();
        QueryIter::new(self.world, &matched, Tick::ZERO)
    }

    /// Iterate with a change-filter baseline.
    pub fn iter_since(&self, last_run: Tick) -> QueryIter<'w, Q> {
        let matched = self.world.cached_matches_for::<Q>();
        QueryIter::new(self.world, &matched, last_run)
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

/// Borrowing mutable query wrapper.
pub struct QueryMut<'w, Q>
where
    Q: QueryFilter + QueryFetchMut<'w>,
{
    world: &'w mut World,
    _phantom: PhantomData<Q>,
}

impl<'w, Q> QueryMut<'w, Q>
where
    Q: QueryFilter + QueryFetchMut<'w>,
{
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self {
            world,
            _phantom: PhantomData,
        }
    }

    pub fn iter(&'w mut self) -> QueryIterMut<'w, Q> {
        let matched = self.world.cached_matches_for::<Q>();
        let tick = self.world.tick();
        QueryIterMut::new(self.world, &matched, Tick::ZERO, tick)
    }

    pub fn iter_since(&'w mut self, last_run: Tick) -> QueryIterMut<'w, Q> {
        let matched = self.world.cached_matches_for::<Q>();
        let tick = self.world.tick();
        QueryIterMut::new(self.world, &matched, last_run, tick)
    }
}

impl<'w, Q> IntoIterator for QueryMut<'w, Q>
where
    Q: QueryFilter + QueryFetchMut<'w> + 'w,
{
    type Item = <Q as QueryFetchMut<'w>>::Item;
    type IntoIter = QueryIterMut<'w, Q>;

    fn into_iter(self) -> Self::IntoIter {
        let matched = self.world.cached_matches_for::<Q>();
        let tick = self.world.tick();
        QueryIterMut::new(self.world, &matched, Tick::ZERO, tick)
    }
}
