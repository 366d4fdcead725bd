//! Optional per-worker diagnostics, compiled in only when the crate is
//! built with the `worker-stats` feature.

#![cfg(feature = "worker-stats")]

use crate::pool::GcPool;
use tracing::info;

/// A snapshot of one worker's counters, for the diagnostic table.
pub struct WorkerStatsRow {
    pub worker_id: usize,
    pub objects_marked: u64,
    pub objects_freed: u64,
    pub push_count: u64,
    pub pop_count: u64,
    pub steal_count: u64,
    pub steal_attempt_count: u64,
    pub grow_count: u64,
    pub current_deque_size: usize,
}

/// Collect a snapshot of every worker's counters. Safe to call only while
/// workers are parked (between cycles), matching the aggregation
/// discipline the rest of the pool relies on.
pub fn snapshot(pool: &GcPool) -> Vec<WorkerStatsRow> {
    pool.workers()
        .iter()
        .map(|worker| {
            let deque_stats = worker.deque_stats();
            WorkerStatsRow {
                worker_id: worker.id,
                objects_marked: worker.stats.objects_marked(),
                objects_freed: worker.stats.objects_freed(),
                push_count: deque_stats.push_count,
                pop_count: deque_stats.pop_count,
                steal_count: deque_stats.steal_count,
                steal_attempt_count: deque_stats.steal_attempt_count,
                grow_count: deque_stats.grow_count,
                current_deque_size: deque_stats.current_size,
            }
        })
        .collect()
}

/// Print a human-readable table of per-worker counters and emit the same
/// data as a structured `tracing` event per row, mirroring how the rest of
/// the crate logs rather than writing straight to stdout.
pub fn print_worker_stats(pool: &GcPool) {
    let rows = snapshot(pool);

    println!(
        "{:>6} {:>10} {:>10} {:>8} {:>8} {:>8} {:>10} {:>8} {:>10}",
        "worker",
        "marked",
        "freed",
        "push",
        "pop",
        "steal",
        "attempts",
        "grows",
        "deque_len"
    );
    for row in &rows {
        println!(
            "{:>6} {:>10} {:>10} {:>8} {:>8} {:>8} {:>10} {:>8} {:>10}",
            row.worker_id,
            row.objects_marked,
            row.objects_freed,
            row.push_count,
            row.pop_count,
            row.steal_count,
            row.steal_attempt_count,
            row.grow_count,
            row.current_deque_size
        );
        info!(
            worker_id = row.worker_id,
            objects_marked = row.objects_marked,
            objects_freed = row.objects_freed,
            push_count = row.push_count,
            pop_count = row.pop_count,
            steal_count = row.steal_count,
            steal_attempt_count = row.steal_attempt_count,
            grow_count = row.grow_count,
            deque_len = row.current_deque_size,
            "gc worker stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::controller::HeapController;
    use crate::cycle::GcCycle;
    use crate::heap::{GcHeader, GcObject, ObjectList, Traceable};
    use std::ptr;

    #[test]
    fn snapshot_has_one_row_per_worker() {
        let pool = GcPool::init(&GcConfig {
            num_threads: 3,
            ..GcConfig::default()
        })
        .expect("pool init");

        let rows = snapshot(&pool);
        assert_eq!(rows.len(), 4);
    }

    struct Leaf {
        header: GcHeader,
    }
    impl Leaf {
        fn new_linked(next: *mut GcHeader) -> *mut GcHeader {
            unsafe fn drop_fn(ptr: *mut GcHeader) {
                drop(Box::from_raw(ptr as *mut Leaf));
            }
            let leaf = Box::new(Leaf {
                header: GcHeader::new(drop_fn, 1),
            });
            let ptr = Box::into_raw(leaf) as *mut GcHeader;
            unsafe { (*ptr).set_next(next) };
            ptr
        }
    }
    impl GcObject for Leaf {
        fn header(&self) -> &GcHeader {
            &self.header
        }
        fn trace(&self, _mark_value: &mut dyn FnMut(&dyn Traceable)) {}
    }
    struct RootRef(*mut GcHeader);
    impl Traceable for RootRef {
        fn as_object(&self) -> Option<&dyn GcObject> {
            Some(unsafe { &*(self.0 as *mut Leaf) })
        }
    }

    #[test]
    fn a_cycle_attributes_marked_and_freed_counts_to_workers() {
        let mut tail = ptr::null_mut();
        let mut all = Vec::new();
        for _ in 0..20 {
            tail = Leaf::new_linked(tail);
            all.push(tail);
        }
        let list = ObjectList::new(tail);

        let config = GcConfig {
            num_threads: 2,
            ..GcConfig::default()
        };
        let pool = GcPool::init(&config).expect("pool init");
        let controller = HeapController::new(&config);
        let cycle = GcCycle::new(&pool, &controller, &config);

        let root = RootRef(all[0]);
        let roots: Vec<&dyn Traceable> = vec![&root];
        let report = cycle
            .run(roots.into_iter(), &list, 20, 20, || {})
            .expect("cycle runs");
        assert_eq!(report.objects_freed, 19);

        let rows = snapshot(&pool);
        let total_marked: u64 = rows.iter().map(|r| r.objects_marked).sum();
        let total_freed: u64 = rows.iter().map(|r| r.objects_freed).sum();
        assert_eq!(total_marked, 1);
        assert_eq!(total_freed, 19);
    }
}
