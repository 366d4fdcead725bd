//! The top-level GC cycle: the single synchronous call the mutator makes
//! to run mark and sweep to completion.

use crate::config::GcConfig;
use crate::controller::HeapController;
use crate::error::{GcError, Result};
use crate::heap::{ObjectList, Traceable};
use crate::mark;
use crate::pool::GcPool;
use crate::sweep::{self, SweepReport};
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// What a completed cycle accomplished, for the mutator to log or expose
/// as diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CycleReport {
    pub bytes_freed: u64,
    pub objects_freed: u64,
    pub objects_marked: u64,
    pub duration: Duration,
}

/// Orchestrates one GC cycle against a pool, a heap controller, and the
/// VM's object list.
pub struct GcCycle<'a> {
    pool: &'a GcPool,
    controller: &'a HeapController,
    config: &'a GcConfig,
}

impl<'a> GcCycle<'a> {
    pub fn new(pool: &'a GcPool, controller: &'a HeapController, config: &'a GcConfig) -> Self {
        Self {
            pool,
            controller,
            config,
        }
    }

    /// Run one full cycle: wake workers, mark `roots`, drain, sweep
    /// `objects` (whose current length is `object_count`, treated as an
    /// upper bound, see `sweep::parallel_sweep`), invoke `sweep_hook` once
    /// sweep completes (the VM's chance to clean up the interned-strings
    /// table or any other structure that holds weak references to heap
    /// objects), then put workers back to sleep and update the heap
    /// threshold from `bytes_allocated_before_sweep` (the VM's live-byte
    /// tally immediately before this cycle ran).
    ///
    /// The mutator MUST have quiesced every other thread that could touch
    /// the object graph before calling this; the collector has no way to
    /// verify that beyond the reentrancy check below.
    #[instrument(skip_all)]
    pub fn run<'roots>(
        &self,
        roots: impl Iterator<Item = &'roots dyn Traceable>,
        objects: &ObjectList,
        object_count: usize,
        bytes_allocated_before_sweep: u64,
        sweep_hook: impl FnOnce(),
    ) -> Result<CycleReport> {
        if GcPool::current_worker().is_some() {
            return Err(GcError::ContractViolation(
                "GcCycle::run invoked re-entrantly on a thread already bound to a worker"
                    .to_string(),
            ));
        }

        if self.pool.is_shutdown() {
            return Err(GcError::AlreadyShutdown);
        }

        let started_at = Instant::now();

        self.pool.wake_workers();
        self.pool.bind_current_worker(0);

        mark::reset_mark_counter();
        // Safety: `self.pool` outlives the mark phase below; `exit_cycle`
        // is called before this function returns on every path.
        unsafe {
            mark::enter_cycle(
                self.pool,
                self.config.parallel_mark_array_threshold,
                self.config.parallel_mark_hashtable_threshold,
            );
        }

        mark::mark_roots(roots);
        self.pool.wait_for_workers();

        mark::exit_cycle();
        let objects_marked = mark::take_mark_counter();

        let sweep_report = if object_count >= self.config.parallel_sweep_threshold {
            match sweep::parallel_sweep(objects, object_count, self.pool) {
                Some(report) => report,
                None => sweep::sweep_serial(objects),
            }
        } else {
            sweep::sweep_serial(objects)
        };
        let SweepReport {
            objects_freed,
            bytes_freed,
        } = sweep_report;

        sweep_hook();

        self.pool.put_workers_to_sleep();
        GcPool::unbind_current_worker();

        let bytes_in_use = bytes_allocated_before_sweep.saturating_sub(bytes_freed);
        self.controller.record_cycle(bytes_in_use, bytes_freed);

        let duration = started_at.elapsed();
        info!(
            objects_marked,
            objects_freed,
            bytes_freed,
            ?duration,
            "gc cycle complete"
        );

        Ok(CycleReport {
            bytes_freed,
            objects_freed,
            objects_marked,
            duration,
        })
    }
}
