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

//! Error types

use std::fmt;

use crate::component::TypeId;
use crate::entity::Entity;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity is null or its generation is stale
    InvalidEntity(Entity),

    /// Component type already present on the entity
    ComponentAlreadyPresent { entity: Entity, type_id: TypeId },

    /// Component type not present on the entity
    ComponentNotFound { entity: Entity, type_id: TypeId },

    /// Resource of the requested type was never inserted
    ResourceNotFound(&'static str),

    /// A system with this name is already registered
    DuplicateSystemName(String),

    /// Explicit before/after hints produced a cycle
    DependencyCycle,

    /// Ordering hint references a system id that does not exist
    UnknownSystem(u32),

    /// Reflected type exceeds the 64-field diff limit
    TooManyFields {
        type_name: &'static str,
        fields: usize,
    },
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::InvalidEntity(e) => {
                write!(f, "Invalid entity {e:?} (null or stale generation)")
            }
            EcsError::ComponentAlreadyPresent { entity, type_id } => {
                write!(f, "Component {type_id} already present on {entity:?}")
            }
            EcsError::ComponentNotFound { entity, type_id } => {
                write!(f, "Component {type_id} not found on {entity:?}")
            }
            EcsError::ResourceNotFound(name) => write!(f, "Resource not found: {name}"),
            EcsError::DuplicateSystemName(name) => {
                write!(f, "System name already registered: {name}")
            }
            EcsError::DependencyCycle => {
                write!(f, "Cycle in explicit system ordering constraints")
            }
            EcsError::UnknownSystem(id) => write!(f, "Unknown system id {id}"),
            EcsError::TooManyFields { type_name, fields } => {
                write!(
                    f,
                    "Type {type_name} has {fields} reflected fields, limit is 64"
                )
            }
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
