//! Double-buffered per-frame event queues
//!
//! `Events<E>` keeps two buffers: sends append to the current side, and a
//! frame-end swap clears what is about to become the new current side and
//! flips. Readers therefore see every event for two frames (the previous
//! buffer first, then the current one, in send order).

use std::any::Any;

use crate::component::TypeId;

pub struct Events<E> {
    buffers: [Vec<E>; 2],
    /// Index of the buffer receiving sends.
    current: usize,
}

impl<E> Events<E> {
    pub fn new() -> Self {
        Self {
            buffers: [Vec::new(), Vec::new()],
            current: 0,
        }
    }

    /// Append to the current side.
    pub fn send(&mut self, event: E) {
        self.buffers[self.current].push(event);
    }

    /// Flip buffers: the previous frame's events are dropped, the current
    /// ones become the previous ones.
    pub fn swap(&mut self) {
        let next = 1 - self.current;
        self.buffers[next].clear();
        self.current = next;
    }

    /// Walk previous then current, each in send order.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        let previous = 1 - self.current;
        self.buffers[previous]
            .iter()
            .chain(self.buffers[self.current].iter())
    }

    /// Events sent this frame only.
    pub fn iter_current(&self) -> impl Iterator<Item = &E> {
        self.buffers[self.current].iter()
    }

    pub fn len(&self) -> usize {
        self.buffers[0].len() + self.buffers[1].len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers[0].is_empty() && self.buffers[1].is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers[0].clear();
        self.buffers[1].clear();
    }
}

impl<E> Default for Events<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe face of `Events<E>` so the world can swap every registered
/// queue at frame end without knowing the event types.
pub(crate) trait AnyEventQueue: Any + Send + Sync {
    fn swap(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Send + Sync + 'static> AnyEventQueue for Events<E> {
    fn swap(&mut self) {
        Events::swap(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// All event queues owned by a world, keyed by event type.
pub(crate) struct EventQueues {
    queues: ahash::AHashMap<TypeId, Box<dyn AnyEventQueue>>,
}

impl EventQueues {
    pub fn new() -> Self {
        Self {
            queues: ahash::AHashMap::new(),
        }
    }

    pub fn register<E: Send + Sync + 'static>(&mut self) {
        self.queues
            .entry(TypeId::from_name(std::any::type_name::<E>()))
            .or_insert_with(|| Box::new(Events::<E>::new()));
    }

    pub fn get<E: Send + Sync + 'static>(&self) -> Option<&Events<E>> {
        self.queues
            .get(&TypeId::from_name(std::any::type_name::<E>()))
            .and_then(|q| q.as_any().downcast_ref())
    }

    pub fn get_mut<E: Send + Sync + 'static>(&mut self) -> Option<&mut Events<E>> {
        self.queues
            .get_mut(&TypeId::from_name(std::any::type_name::<E>()))
            .and_then(|q| q.as_any_mut().downcast_mut())
    }

    /// Frame-end swap of every registered queue.
    pub fn swap_all(&mut self) {
        for queue in self.queues.values_mut() {
            queue.swap();
        }
    }
}
