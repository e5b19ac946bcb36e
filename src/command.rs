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

//! Deferred structural mutations
//!
//! Structural changes are eager on the world itself, so code that is mid
//! iteration (or inside an observer callback) queues them here and applies
//! the buffer afterwards.

use crate::component::{Bundle, Component};
use crate::entity::Entity;
use crate::world::World;

/// Type alias for world mutation closures
pub type CommandFn = Box<dyn FnOnce(&mut World) + Send>;

enum Command {
    Despawn(Entity),
    Apply(CommandFn),
}

/// Command buffer for deferred operations
#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Queue a spawn with a component bundle.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) {
        self.push(move |world| {
            world.spawn(bundle);
        });
    }

    /// Queue a despawn. Applying tolerates entities that died in the
    /// meantime (cascades, duplicate queueing).
    pub fn despawn(&mut self, entity: Entity) {
        self.commands.push(Command::Despawn(entity));
    }

    /// Queue adding a component.
    pub fn add<T: Component>(&mut self, entity: Entity, component: T) {
        self.push(move |world| {
            if let Err(err) = world.add(entity, component) {
                tracing::warn!(%err, "deferred add failed");
            }
        });
    }

    /// Queue removing a component.
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.push(move |world| {
            if let Err(err) = world.remove::<T>(entity) {
                tracing::warn!(%err, "deferred remove failed");
            }
        });
    }

    /// Queue overwriting a component value.
    pub fn set<T: Component>(&mut self, entity: Entity, component: T) {
        self.push(move |world| {
            if let Err(err) = world.set(entity, component) {
                tracing::warn!(%err, "deferred set failed");
            }
        });
    }

    /// Queue an arbitrary world mutation.
    pub fn push<F>(&mut self, f: F)
    where
        F: FnOnce(&mut World) + Send + 'static,
    {
        self.commands.push(Command::Apply(Box::new(f)));
    }

    /// Apply all queued commands in order and clear the buffer.
    pub fn apply(&mut self, world: &mut World) {
        for command in self.commands.drain(..) {
            match command {
                Command::Despawn(entity) => {
                    if world.is_alive(entity) {
                        let _ = world.despawn(entity);
                    }
                }
                Command::Apply(f) => f(world),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_commands_apply_in_order() {
        let mut world = World::new();
        let entity = world.spawn((Marker(0),));

        let mut commands = CommandBuffer::new();
        commands.set(entity, Marker(1));
        commands.set(entity, Marker(2));
        commands.apply(&mut world);

        assert_eq!(world.get::<Marker>(entity), Some(&Marker(2)));
        assert!(commands.is_empty());
    }

    #[test]
    fn test_deferred_spawn_and_despawn() {
        let mut world = World::new();
        let doomed = world.spawn((Marker(9),));

        let mut commands = CommandBuffer::new();
        commands.spawn((Marker(1),));
        commands.despawn(doomed);
        // Double-queued despawn is tolerated.
        commands.despawn(doomed);
        commands.apply(&mut world);

        assert!(!world.is_alive(doomed));
        assert_eq!(world.entity_count(), 1);
    }
}
