//! The GC thread pool: worker lifecycle, wake/sleep transitions, and the
//! drain loop the mutator uses while a cycle is in flight.

use crate::concurrent::{Stealer, WorkStealingDeque};
use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::task::GcTask;
use crate::worker::{PoolState, Worker, WorkerStats};
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

thread_local! {
    /// The worker identity bound to the current OS thread, if any. Worker 0
    /// is never a dedicated thread; the mutator binds itself to id 0 around
    /// each cycle via `GcPool::assign_current_worker`.
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };

    /// The stats counters of the worker bound to the current OS thread, if
    /// any. Populated alongside `CURRENT_WORKER` for dedicated worker
    /// threads, and by `GcPool::bind_current_worker` for the mutator thread
    /// playing worker 0. Kept separate from `CURRENT_WORKER` since a bare
    /// worker id isn't enough to reach a specific pool's `Worker` from a
    /// free function with no `&GcPool` in scope (`mark_value`, the sweep
    /// chunk task).
    static CURRENT_WORKER_STATS: Cell<Option<*const WorkerStats>> = const { Cell::new(None) };
}

/// The collector's pool of workers.
///
/// Worker 0 has no dedicated OS thread: the mutator thread plays that role
/// while it drives a cycle. Workers `1..num_threads` each get a real
/// thread parked on the pool's wake condition between cycles.
pub struct GcPool {
    workers: Vec<Arc<Worker>>,
    threads: Vec<JoinHandle<()>>,
    state: Arc<PoolState>,
    shut_down: bool,
}

impl GcPool {
    /// Create `config.num_threads` dedicated workers (plus worker 0, which
    /// the caller plays), all holding cross-stealer handles to every other
    /// worker's deque.
    pub fn init(config: &GcConfig) -> Result<Self> {
        let worker_count = config.num_threads + 1;

        let mut deques = Vec::new();
        deques.try_reserve_exact(worker_count).map_err(|source| {
            GcError::PoolInit(format!("failed to allocate {worker_count} deque handles: {source}"))
        })?;
        for _ in 0..worker_count {
            deques.push(Arc::new(WorkStealingDeque::<GcTask>::with_capacity(
                config.initial_deque_capacity,
            )));
        }

        let mut workers = Vec::new();
        workers.try_reserve_exact(worker_count).map_err(|source| {
            GcError::PoolInit(format!("failed to allocate {worker_count} worker slots: {source}"))
        })?;
        for (id, deque) in deques.iter().enumerate() {
            let stealers: Vec<Stealer<GcTask>> = deques
                .iter()
                .enumerate()
                .filter(|(other_id, _)| *other_id != id)
                .map(|(_, d)| Stealer::new(d.clone()))
                .collect();
            workers.push(Arc::new(Worker::new(id, deque.clone(), stealers)));
        }

        let state = Arc::new(PoolState::new());
        let mut threads = Vec::with_capacity(config.num_threads);

        for worker in workers.iter().skip(1).cloned() {
            let pool_state = state.clone();
            let builder = std::thread::Builder::new().name(format!("gc-worker-{}", worker.id));
            let handle = builder
                .spawn(move || {
                    CURRENT_WORKER.with(|c| c.set(Some(worker.id)));
                    CURRENT_WORKER_STATS
                        .with(|c| c.set(Some(&worker.stats as *const WorkerStats)));
                    worker.run_loop(&pool_state);
                })
                .map_err(|source| GcError::ThreadSpawn {
                    worker_id: worker.id,
                    source,
                })?;
            threads.push(handle);
        }

        info!(worker_count, "gc thread pool initialized");

        Ok(Self {
            workers,
            threads,
            state,
            shut_down: false,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, id: usize) -> &Worker {
        &self.workers[id]
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Bind the calling thread to a worker identity, or clear the binding
    /// with `None`. Worker 0's identity is bound by the mutator thread
    /// around each cycle.
    ///
    /// This does not bind the worker-stats pointer; callers that want
    /// `objects_marked`/`objects_freed` attributed to worker 0 should use
    /// [`GcPool::bind_current_worker`] / [`GcPool::unbind_current_worker`]
    /// instead, which this pool's [`crate::cycle::GcCycle`] does.
    pub fn assign_current_worker(id: Option<usize>) {
        CURRENT_WORKER.with(|c| c.set(id));
    }

    pub fn current_worker() -> Option<usize> {
        CURRENT_WORKER.with(|c| c.get())
    }

    /// Bind the calling thread to worker `id` *and* that worker's stats
    /// counters, so `mark_value`/the sweep chunk task can attribute their
    /// work to it. Used by the mutator thread around a cycle; dedicated
    /// worker threads bind both at spawn time instead (see `init`).
    pub fn bind_current_worker(&self, id: usize) {
        CURRENT_WORKER.with(|c| c.set(Some(id)));
        CURRENT_WORKER_STATS.with(|c| c.set(Some(&self.workers[id].stats as *const WorkerStats)));
    }

    /// Clear both the worker-id and worker-stats bindings for the calling
    /// thread.
    pub fn unbind_current_worker() {
        CURRENT_WORKER.with(|c| c.set(None));
        CURRENT_WORKER_STATS.with(|c| c.set(None));
    }

    /// The stats counters of the worker bound to the calling thread, if
    /// any. `None` for threads that never bound (e.g. direct unit tests
    /// calling `mark_value` outside a cycle).
    pub(crate) fn current_worker_stats() -> Option<*const WorkerStats> {
        CURRENT_WORKER_STATS.with(|c| c.get())
    }

    /// Whether [`GcPool::shutdown`] has already run to completion on this
    /// pool. A cycle driver checks this before waking workers: invoking a
    /// cycle on a shut-down pool is a programming-contract violation, not a
    /// condition the collector can recover from.
    pub fn is_shutdown(&self) -> bool {
        self.shut_down
    }

    /// Signal every parked worker to start running.
    pub fn wake_workers(&self) {
        self.state.should_work.store(true, Ordering::Release);
        self.state.notify_all();
        debug!("gc workers woken");
    }

    /// Signal every worker to stop running and return to parked.
    pub fn put_workers_to_sleep(&self) {
        self.state.should_work.store(false, Ordering::Release);
        debug!("gc workers put to sleep");
    }

    /// Drive worker 0 inline until every other worker reports `done` with
    /// an empty deque. The mutator thread is worker 0 for the duration of
    /// this call.
    pub fn wait_for_workers(&self) {
        let worker0 = &self.workers[0];
        loop {
            let made_progress = worker0.run_step();

            if !made_progress {
                let all_idle = self.workers[1..]
                    .iter()
                    .all(|w| w.is_done() && w.deque_len() == 0);
                if all_idle && worker0.deque_len() == 0 {
                    break;
                }
            }
        }
    }

    /// Signal shutdown, join every dedicated worker thread, and consume the
    /// pool. Idempotent: calling this twice is a no-op the second time.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }

        self.state.shutdown.store(true, Ordering::Release);
        self.state.should_work.store(true, Ordering::Release);
        self.state.notify_all();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("gc worker thread panicked during shutdown");
            }
        }

        self.shut_down = true;
        info!("gc thread pool shut down");
        Ok(())
    }
}

impl Drop for GcPool {
    fn drop(&mut self) {
        if !self.shut_down {
            let _ = self.shutdown();
        }
    }
}
