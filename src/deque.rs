//! Lock-free work-stealing deque (Chase–Lev)
//!
//! The owning worker pushes and pops at the bottom (LIFO); any other thread
//! steals from the top (FIFO) through a seq-cst CAS. The backing buffer is a
//! growable power-of-two ring; retired buffers are kept alive until the deque
//! drops so a stalled thief can never read freed memory.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicI64, AtomicPtr, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

/// Power-of-two ring buffer with wrap-around indexing.
///
/// Owner `put` and thief `get` never hit the same physical slot: the grow
/// check in `push` keeps `bottom - top < capacity`, so distinct logical
/// indices map to distinct slots.
struct RingBuffer<T> {
    storage: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: i64,
}

impl<T: Copy> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            storage,
            mask: capacity as i64 - 1,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    unsafe fn get(&self, index: i64) -> T {
        let slot = self.storage[(index & self.mask) as usize].get();
        (*slot).assume_init()
    }

    #[inline]
    unsafe fn put(&self, index: i64, value: T) {
        let slot = self.storage[(index & self.mask) as usize].get();
        (*slot).write(value);
    }

    /// Double the capacity, copying the live range `[top, bottom)`.
    fn grow(&self, bottom: i64, top: i64) -> Box<RingBuffer<T>> {
        let new_buffer = Box::new(RingBuffer::new(self.capacity() * 2));
        for i in top..bottom {
            unsafe {
                new_buffer.put(i, self.get(i));
            }
        }
        new_buffer
    }
}

pub struct WorkStealingDeque<T> {
    top: CachePadded<AtomicI64>,
    bottom: CachePadded<AtomicI64>,
    buffer: AtomicPtr<RingBuffer<T>>,
    /// Buffers replaced by growth, freed on drop. Growth is rare and
    /// owner-only; the mutex is uncontended in practice.
    retired: Mutex<Vec<*mut RingBuffer<T>>>,
}

unsafe impl<T: Send> Send for WorkStealingDeque<T> {}
unsafe impl<T: Send> Sync for WorkStealingDeque<T> {}

impl<T: Copy + Send> WorkStealingDeque<T> {
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.next_power_of_two().max(2);
        Self {
            top: CachePadded::new(AtomicI64::new(0)),
            bottom: CachePadded::new(AtomicI64::new(0)),
            buffer: AtomicPtr::new(Box::into_raw(Box::new(RingBuffer::new(capacity)))),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Push an item onto the bottom.
    ///
    /// # Safety
    /// Only the owning worker thread may call this.
    pub unsafe fn push(&self, item: T) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut buf = self.buffer.load(Ordering::Relaxed);

        if b - t > (*buf).capacity() as i64 - 1 {
            let grown = Box::into_raw((*buf).grow(b, t));
            self.buffer.store(grown, Ordering::Release);
            self.retired.lock().push(buf);
            buf = grown;
        }

        (*buf).put(b, item);
        // The item must be visible before the new bottom.
        self.bottom.store(b + 1, Ordering::Release);
    }

    /// Pop an item from the bottom.
    ///
    /// # Safety
    /// Only the owning worker thread may call this.
    pub unsafe fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        let buf = self.buffer.load(Ordering::Relaxed);
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t <= b {
            let item = (*buf).get(b);
            if t == b {
                // Last element: race against thieves for it.
                if self
                    .top
                    .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                    .is_err()
                {
                    self.bottom.store(b + 1, Ordering::Relaxed);
                    return None;
                }
                self.bottom.store(b + 1, Ordering::Relaxed);
            }
            Some(item)
        } else {
            self.bottom.store(b + 1, Ordering::Relaxed);
            None
        }
    }

    /// Steal an item from the top. Any thread may call this; returns None
    /// when the deque looks empty or the CAS was lost to a racing thief.
    pub fn steal(&self) -> Option<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t < b {
            let buf = self.buffer.load(Ordering::Acquire);
            // Read before the CAS: a successful CAS is what claims the slot.
            let item = unsafe { (*buf).get(t) };
            if self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                return None;
            }
            Some(item)
        } else {
            None
        }
    }

    /// Snapshot emptiness; may be stale under concurrency.
    pub fn is_empty(&self) -> bool {
        let t = self.top.load(Ordering::Acquire);
        let b = self.bottom.load(Ordering::Acquire);
        t >= b
    }

    /// Approximate number of items.
    pub fn len(&self) -> usize {
        let t = self.top.load(Ordering::Acquire);
        let b = self.bottom.load(Ordering::Acquire);
        (b - t).max(0) as usize
    }
}

impl<T> Drop for WorkStealingDeque<T> {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.buffer.load(Ordering::Relaxed)));
            for retired in self.retired.lock().drain(..) {
                drop(Box::from_raw(retired));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_lifo_for_owner() {
        let deque = WorkStealingDeque::new(4);
        unsafe {
            deque.push(1);
            deque.push(2);
            deque.push(3);
            assert_eq!(deque.pop(), Some(3));
            assert_eq!(deque.pop(), Some(2));
            assert_eq!(deque.pop(), Some(1));
            assert_eq!(deque.pop(), None);
        }
    }

    #[test]
    fn test_fifo_for_thieves() {
        let deque = WorkStealingDeque::new(4);
        unsafe {
            deque.push(1);
            deque.push(2);
        }
        assert_eq!(deque.steal(), Some(1));
        assert_eq!(deque.steal(), Some(2));
        assert_eq!(deque.steal(), None);
    }

    #[test]
    fn test_growth_preserves_order() {
        let deque = WorkStealingDeque::new(2);
        unsafe {
            for i in 0..100 {
                deque.push(i);
            }
        }
        for i in 0..100 {
            assert_eq!(deque.steal(), Some(i));
        }
        assert!(deque.is_empty());
    }

    #[test]
    fn test_concurrent_steal_claims_each_item_once() {
        const ITEMS: usize = 10_000;
        const THIEVES: usize = 4;

        let deque = Arc::new(WorkStealingDeque::<usize>::new(64));
        let seen = Arc::new((0..ITEMS).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
        let stolen = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..THIEVES {
                let deque = Arc::clone(&deque);
                let seen = Arc::clone(&seen);
                let stolen = Arc::clone(&stolen);
                scope.spawn(move || {
                    while stolen.load(Ordering::Acquire) < ITEMS {
                        if let Some(item) = deque.steal() {
                            seen[item].fetch_add(1, Ordering::AcqRel);
                            stolen.fetch_add(1, Ordering::AcqRel);
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                });
            }

            // Owner interleaves pushes and the occasional pop.
            let mut popped = 0;
            unsafe {
                for i in 0..ITEMS {
                    deque.push(i);
                    if i % 64 == 0 {
                        if let Some(item) = deque.pop() {
                            seen[item].fetch_add(1, Ordering::AcqRel);
                            popped += 1;
                        }
                    }
                }
            }
            stolen.fetch_add(popped, Ordering::AcqRel);
        });

        for (i, count) in seen.iter().enumerate() {
            assert_eq!(count.load(Ordering::Acquire), 1, "item {i} claimed wrong number of times");
        }
    }
}
