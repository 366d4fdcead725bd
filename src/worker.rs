//! A single GC worker: its deque, identity, and the parked/running/
//! shutting-down state machine described in the collector's design.

use crate::concurrent::{Backoff, Stealer, WorkStealingDeque, CACHE_LINE_SIZE};
use crate::task::GcTask;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a worker sleeps after failing to find work anywhere, before
/// retrying. The worker never blocks on anything else while `should_work`
/// is set.
const BACKOFF_SLEEP: Duration = Duration::from_millis(1);

/// Pool-wide state every worker reads to decide whether to run, sleep, or
/// exit. Owned by [`crate::pool::GcPool`] and shared with every worker via
/// `Arc`.
pub struct PoolState {
    pub(crate) shutdown: AtomicBool,
    pub(crate) should_work: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cond: Condvar,
}

impl PoolState {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            should_work: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_cond: Condvar::new(),
        }
    }

    /// Wake every parked worker. Called with `should_work` or `shutdown`
    /// already set, so a worker observing the notification always finds a
    /// reason to leave the wait.
    pub fn notify_all(&self) {
        let _guard = self.wake_lock.lock();
        self.wake_cond.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn should_work(&self) -> bool {
        self.should_work.load(Ordering::Acquire)
    }

    /// Block until `should_work` or `shutdown` becomes true.
    fn park(&self) {
        let mut guard = self.wake_lock.lock();
        while !self.should_work() && !self.is_shutdown() {
            self.wake_cond.wait(&mut guard);
        }
    }
}

impl Default for PoolState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-worker counters, always maintained (they're cheap atomics) but only
/// aggregated and printed when the crate is built with the `worker-stats`
/// feature.
#[derive(Default)]
pub struct WorkerStats {
    objects_marked: AtomicU64,
    objects_freed: AtomicU64,
}

impl WorkerStats {
    pub fn record_marked(&self, count: u64) {
        self.objects_marked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_freed(&self, count: u64) {
        self.objects_freed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn objects_marked(&self) -> u64 {
        self.objects_marked.load(Ordering::Relaxed)
    }

    pub fn objects_freed(&self) -> u64 {
        self.objects_freed.load(Ordering::Relaxed)
    }
}

/// One worker's queue, identity, and liveness flag.
///
/// Worker 0 is degenerate: it is never given a dedicated OS thread. The
/// mutator thread executes its `run_step` logic directly while draining a
/// cycle (see `pool.rs::wait_for_workers`).
#[repr(C, align(64))]
pub struct Worker {
    pub id: usize,
    deque: Arc<WorkStealingDeque<GcTask>>,
    stealers: Vec<Stealer<GcTask>>,
    /// Cleared by any successful own-pop or steal; set when a worker finds
    /// no work anywhere and is about to back off.
    done: AtomicBool,
    pub stats: WorkerStats,
    _pad: [u8; CACHE_LINE_SIZE],
}

impl Worker {
    pub fn new(
        id: usize,
        deque: Arc<WorkStealingDeque<GcTask>>,
        stealers: Vec<Stealer<GcTask>>,
    ) -> Self {
        Self {
            id,
            deque,
            stealers,
            done: AtomicBool::new(false),
            stats: WorkerStats::default(),
            _pad: [0; CACHE_LINE_SIZE],
        }
    }

    pub fn push(&self, task: GcTask) {
        self.deque.push(task);
    }

    /// Read this worker's `done` flag.
    ///
    /// Loaded with `Acquire` so that a coordinator observing `true`
    /// synchronizes-with the matching `Release` store in `run_step`: a
    /// sweep-chunk task writes its results back through plain `Cell`s after
    /// it runs, and `done` is the only cross-thread signal the coordinator
    /// has that those writes happened. Without this pairing a weak-memory
    /// target could let the coordinator observe `done == true` before the
    /// `Cell` writes that preceded it, reading stale or torn chunk results.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn deque_len(&self) -> usize {
        self.deque.len()
    }

    pub fn deque_stats(&self) -> crate::concurrent::DequeStats {
        self.deque.stats()
    }

    /// Try the local deque first, then round-robin a single steal attempt
    /// across every peer. Returns `None` only when no task was found
    /// anywhere on this pass.
    fn find_work(&self) -> Option<GcTask> {
        if let Some(task) = self.deque.pop() {
            return Some(task);
        }

        for stealer in &self.stealers {
            match stealer.steal_with_backoff() {
                crate::concurrent::Steal::Success(task) => return Some(task),
                crate::concurrent::Steal::Empty | crate::concurrent::Steal::Retry => continue,
            }
        }

        None
    }

    /// Execute a single step: find and run one task if one is available.
    /// Returns `true` if a task ran.
    pub fn run_step(&self) -> bool {
        match self.find_work() {
            Some(task) => {
                self.done.store(false, Ordering::Release);
                task.execute();
                true
            }
            None => {
                // Release: a chunk/range task run earlier in this same call
                // (or an earlier call on this thread) may have written its
                // results through plain `Cell`s; this store must make those
                // writes visible to whatever thread next observes `done` as
                // true via the paired `Acquire` load in `is_done`.
                self.done.store(true, Ordering::Release);
                false
            }
        }
    }

    /// Drive the parked/running state machine for a dedicated worker
    /// thread. Never called for worker 0, which is driven inline by the
    /// mutator instead.
    pub fn run_loop(&self, pool: &PoolState) {
        let mut backoff = Backoff::new();
        loop {
            if pool.is_shutdown() {
                return;
            }

            if !pool.should_work() {
                pool.park();
                continue;
            }

            if pool.is_shutdown() {
                return;
            }

            if self.run_step() {
                backoff.reset();
            } else {
                std::thread::sleep(BACKOFF_SLEEP);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop_task() -> GcTask {
        unsafe fn run(_arg: *mut ()) {}
        GcTask::new((), run)
    }

    #[test]
    fn run_step_executes_local_task() {
        let deque = Arc::new(WorkStealingDeque::new());
        let worker = Worker::new(0, deque.clone(), Vec::new());
        worker.push(noop_task());

        assert!(worker.run_step());
        assert!(!worker.is_done());

        assert!(!worker.run_step());
        assert!(worker.is_done());
    }

    #[test]
    fn run_step_steals_from_peer() {
        let deque_a = Arc::new(WorkStealingDeque::new());
        let deque_b = Arc::new(WorkStealingDeque::new());

        let stealer_b = Stealer::new(deque_b.clone());
        let worker_a = Worker::new(0, deque_a, vec![stealer_b]);

        deque_b.push(noop_task());

        assert!(worker_a.run_step());
        assert!(deque_b.is_empty());
    }

    #[test]
    fn counter_task_runs_exactly_once() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        unsafe fn run(_arg: *mut ()) {
            COUNTER.fetch_add(1, Ordering::Relaxed);
        }

        let deque = Arc::new(WorkStealingDeque::new());
        let worker = Worker::new(0, deque.clone(), Vec::new());
        for _ in 0..10 {
            worker.push(GcTask::new((), run));
        }

        while worker.run_step() {}

        assert_eq!(COUNTER.load(Ordering::Relaxed), 10);
    }
}
