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

//! Strata ECS - archetype entity/component runtime
//!
//! Cache-coherent archetype storage with cached structural-transition edges,
//! a work-stealing parallel scheduler driven by inferred data-access
//! conflicts, tick-based change detection, and synchronous observers for
//! structural events.

pub mod archetype;
pub mod column;
pub mod command;
pub mod component;
pub mod dependency;
pub mod deque;
pub mod entity;
pub mod error;
pub mod events;
pub mod graph;
pub mod observer;
pub mod pool;
pub mod query;
pub mod reflect;
pub mod scheduler;
pub mod sparse;
pub mod system;
pub mod table;
pub mod tick;
pub mod world;

// Re-exports for convenience
pub use archetype::{Archetype, ArchetypeHandle, ArchetypeId};
pub use command::CommandBuffer;
pub use component::{Bundle, Component, ComponentInfo, TypeId};
pub use entity::{Entity, EntityAllocator, EntityLocation};
pub use error::{EcsError, Result};
pub use events::Events;
pub use observer::{EventKind, ObserverId, OnAdd, OnRemove, OnSet};
pub use query::{
    Added, CachedQuery, Changed, EntityRef, Query, QueryFetch, QueryFetchMut, QueryFilter,
    QueryMut, QueryState, Term, TermAccess, TermOp, With, Without,
};
pub use reflect::{FieldInfo, FieldKind, Reflectable, TypeLayout, TypeRegistry};
pub use sparse::SparseSet;
pub use system::{AccessDescriptor, SystemFn, SystemId};
pub use tick::{ComponentTicks, Tick};
pub use world::{World, WorldConfig, WorldStats};

/// Convenient re-exports of commonly used types.
///
/// The prelude can be imported with:
/// ```
/// use strata_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::command::CommandBuffer;
    pub use crate::component::{Bundle, Component};
    pub use crate::entity::Entity;
    pub use crate::error::{EcsError, Result};
    pub use crate::observer::{OnAdd, OnRemove, OnSet};
    pub use crate::query::{Added, CachedQuery, Changed, EntityRef, With, Without};
    pub use crate::system::{AccessDescriptor, SystemId};
    pub use crate::tick::Tick;
    pub use crate::world::{World, WorldConfig};
}
