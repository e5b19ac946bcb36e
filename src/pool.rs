//! Work-stealing thread pool
//!
//! Fixed worker set, one Chase–Lev deque per worker. A worker pushes follow-up
//! tasks onto its own deque; foreign threads submit through a mutex-backed
//! injector (deque bottoms are owner-only). Idle workers steal at random,
//! then park briefly. Shutdown is cooperative: workers drain everything
//! pending before exiting.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::sync::{Parker, Unparker};
use parking_lot::{Condvar, Mutex};

use crate::deque::WorkStealingDeque;

/// A unit of pool work: a plain function pointer plus two words of payload.
///
/// No allocation per task; the payload typically points at a frame-scoped
/// context that outlives the scheduler's wait.
#[derive(Clone, Copy)]
pub struct Task {
    pub run: unsafe fn(*mut u8, u32),
    pub data: *mut u8,
    pub index: u32,
}

unsafe impl Send for Task {}

/// Counts outstanding work; `wait` blocks until the count returns to zero.
pub struct WaitGroup {
    count: AtomicUsize,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Pair the notification with the waiter's lock so the final
            // decrement cannot slip between its check and its sleep.
            let _guard = self.lock.lock();
            self.condvar.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while self.count.load(Ordering::Acquire) != 0 {
            self.condvar.wait(&mut guard);
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    /// (pool identity, worker index) of the current thread, if it is a
    /// worker. The one sanctioned use of TLS: the deque owner's identity.
    static WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

struct PoolShared {
    deques: Vec<WorkStealingDeque<Task>>,
    injector: Mutex<std::collections::VecDeque<Task>>,
    unparkers: Vec<Unparker>,
    shutdown: AtomicBool,
    pending: AtomicUsize,
}

impl PoolShared {
    fn pop_injected(&self) -> Option<Task> {
        self.injector.lock().pop_front()
    }
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start `worker_count` workers; 0 selects the machine's available
    /// parallelism.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            worker_count
        };

        let parkers: Vec<Parker> = (0..worker_count).map(|_| Parker::new()).collect();
        let shared = Arc::new(PoolShared {
            deques: (0..worker_count)
                .map(|_| WorkStealingDeque::new(256))
                .collect(),
            injector: Mutex::new(std::collections::VecDeque::new()),
            unparkers: parkers.iter().map(|p| p.unparker().clone()).collect(),
            shutdown: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
        });

        let workers = parkers
            .into_iter()
            .enumerate()
            .map(|(index, parker)| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("ecs-worker-{index}"))
                    .spawn(move || worker_loop(shared, index, parker))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Submit a task: workers push onto their own deque, foreign threads go
    /// through the injector. Sleeping workers are woken either way.
    pub fn submit(&self, task: Task) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        let pool_id = Arc::as_ptr(&self.shared) as usize;
        let own_deque = WORKER.with(|w| match w.get() {
            Some((id, index)) if id == pool_id => Some(index),
            _ => None,
        });

        match own_deque {
            Some(index) => unsafe {
                // This thread owns deques[index]; bottom access is exclusive.
                self.shared.deques[index].push(task);
            },
            None => {
                self.shared.injector.lock().push_back(task);
            }
        }

        for unparker in &self.shared.unparkers {
            unparker.unpark();
        }
    }

    /// Tasks submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for unparker in &self.shared.unparkers {
            unparker.unpark();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>, index: usize, parker: Parker) {
    WORKER.with(|w| w.set(Some((Arc::as_ptr(&shared) as usize, index))));

    // Cheap xorshift for victim selection.
    let mut rng: u32 = 0x9e37_79b9 ^ (index as u32 + 1);
    let mut next_random = move || {
        rng ^= rng << 13;
        rng ^= rng >> 17;
        rng ^= rng << 5;
        rng
    };

    loop {
        let task = unsafe { shared.deques[index].pop() }
            .or_else(|| shared.pop_injected())
            .or_else(|| {
                // Random steal until success or every victim looked empty.
                let count = shared.deques.len();
                if count <= 1 {
                    return None;
                }
                let start = next_random() as usize % count;
                for offset in 0..count {
                    let victim = (start + offset) % count;
                    if victim == index {
                        continue;
                    }
                    if let Some(task) = shared.deques[victim].steal() {
                        return Some(task);
                    }
                }
                None
            });

        match task {
            Some(task) => {
                unsafe { (task.run)(task.data, task.index) };
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
            None => {
                if shared.shutdown.load(Ordering::Acquire)
                    && shared.pending.load(Ordering::Acquire) == 0
                {
                    break;
                }
                std::thread::yield_now();
                parker.park_timeout(Duration::from_micros(100));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waitgroup_counts_down() {
        let wg = Arc::new(WaitGroup::new());
        wg.add(8);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let wg = Arc::clone(&wg);
                scope.spawn(move || wg.done());
            }
            wg.wait();
        });
        assert_eq!(wg.count(), 0);
    }

    #[test]
    fn test_pool_runs_external_submissions() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        unsafe fn bump(_data: *mut u8, _index: u32) {
            COUNTER.fetch_add(1, Ordering::AcqRel);
        }

        COUNTER.store(0, Ordering::SeqCst);
        let pool = ThreadPool::new(4);
        for i in 0..1000 {
            pool.submit(Task {
                run: bump,
                data: std::ptr::null_mut(),
                index: i,
            });
        }
        while pool.pending() != 0 {
            std::thread::yield_now();
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn test_pool_drains_before_shutdown() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        unsafe fn bump(_data: *mut u8, _index: u32) {
            COUNTER.fetch_add(1, Ordering::AcqRel);
        }

        COUNTER.store(0, Ordering::SeqCst);
        {
            let pool = ThreadPool::new(2);
            for i in 0..100 {
                pool.submit(Task {
                    run: bump,
                    data: std::ptr::null_mut(),
                    index: i,
                });
            }
            // Dropped immediately: shutdown must still drain the backlog.
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_auto_worker_count() {
        let pool = ThreadPool::new(0);
        assert!(pool.worker_count() >= 1);
    }
}
