//! Sweep scheduler: partition the global object list into chunks, sweep
//! each chunk independently, and re-stitch the survivors back into one
//! list.

use crate::heap::{GcHeader, ObjectList};
use crate::pool::GcPool;
use crate::task::{GcTask, SweepChunk};
use std::ptr;
use tracing::{debug, warn};

/// Outcome of a sweep pass over the object list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub objects_freed: u64,
    pub bytes_freed: u64,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.objects_freed += other.objects_freed;
        self.bytes_freed += other.bytes_freed;
    }
}

/// Sweep the whole list on the calling thread, with no fan-out. Used both
/// as the direct path for small heaps (below
/// `parallel_sweep_threshold`) and as the fallback when parallel sweep
/// setup fails.
pub fn sweep_serial(list: &ObjectList) -> SweepReport {
    let mut report = SweepReport::default();
    let mut previous: *mut GcHeader = ptr::null_mut();
    let mut new_head: *mut GcHeader = ptr::null_mut();
    let mut current = list.head();

    while !current.is_null() {
        // Safety: every node reachable from `list.head()` is a live header
        // for the duration of the cycle, during which the mutator is
        // quiesced.
        let next = unsafe { (*current).next() };

        if unsafe { (*current).unmark() } {
            if new_head.is_null() {
                new_head = current;
            }
            if !previous.is_null() {
                unsafe { (*previous).set_next(current) };
            }
            previous = current;
        } else {
            report.objects_freed += 1;
            report.bytes_freed += unsafe { (*current).size() } as u64;
            // Safety: `current` is about to be unlinked from the list (it
            // is simply skipped, never relinked) and this is the only
            // sweep pass that will ever see it.
            unsafe { GcHeader::destroy(current) };
        }

        current = next;
    }

    if !previous.is_null() {
        unsafe { (*previous).set_next(ptr::null_mut()) };
    }
    list.set_head(new_head);

    report
}

unsafe fn sweep_chunk_task(arg: *mut ()) {
    let chunk = &*(arg as *const SweepChunk);
    let start = chunk.start.get();
    if start.is_null() {
        return;
    }

    let mut previous: *mut GcHeader = ptr::null_mut();
    let mut current = start;
    let mut new_start: *mut GcHeader = ptr::null_mut();
    let mut new_end: *mut GcHeader = ptr::null_mut();
    let end = chunk.end.get();
    let mut freed_count = 0u64;
    let mut freed_bytes = 0u64;

    for _ in 0..chunk.size {
        let next = (*current).next();

        if (*current).unmark() {
            if new_start.is_null() {
                new_start = current;
            }
            if !previous.is_null() {
                (*previous).set_next(current);
            }
            previous = current;
            new_end = current;
        } else {
            freed_count += 1;
            freed_bytes += (*current).size() as u64;
            GcHeader::destroy(current);
        }

        if current == end {
            break;
        }
        current = next;
    }

    if !new_end.is_null() {
        (*new_end).set_next(ptr::null_mut());
    }

    chunk.start.set(new_start);
    chunk.end.set(new_end);
    chunk.freed_count.set(freed_count);
    chunk.freed_bytes.set(freed_bytes);

    if let Some(stats) = GcPool::current_worker_stats() {
        // Safety: see `mark_value`'s identical use of this binding.
        unsafe { (*stats).record_freed(freed_count) };
    }
}

/// Partition `list` into `2 * pool.worker_count()` contiguous chunks and
/// sweep each one independently, then re-stitch the survivors.
///
/// Returns `Ok(None)` if the chunk descriptors could not be allocated; the
/// list is left untouched in that case and the caller should fall back to
/// [`sweep_serial`]. `object_count` is treated as an upper bound on how far
/// the partition walk goes: a drifting count degrades to sweeping fewer
/// objects than expected rather than walking past the list's actual end.
pub fn parallel_sweep(
    list: &ObjectList,
    object_count: usize,
    pool: &GcPool,
) -> Option<SweepReport> {
    if object_count == 0 {
        return Some(SweepReport::default());
    }

    let num_chunks = (pool.worker_count() * 2).max(1);
    let base = object_count / num_chunks;
    let remainder = object_count % num_chunks;

    let mut chunks = Vec::new();
    if chunks.try_reserve_exact(num_chunks).is_err() {
        warn!(object_count, num_chunks, "sweep chunk allocation failed");
        return None;
    }

    let mut current = list.head();
    for i in 0..num_chunks {
        if current.is_null() {
            // The list was shorter than `object_count` claimed; stop
            // partitioning rather than trust the count past the list.
            break;
        }

        let target_size = base + if i < remainder { 1 } else { 0 };
        if target_size == 0 {
            continue;
        }

        let start = current;
        let mut end = current;
        let mut walked = 1usize;
        while walked < target_size {
            // Safety: `end` was reached via `next()` from a node already
            // known live.
            let next = unsafe { (*end).next() };
            if next.is_null() {
                break;
            }
            end = next;
            walked += 1;
        }

        let next_chunk_start = unsafe { (*end).next() };
        chunks.push(SweepChunk::new(start, end, walked));
        current = next_chunk_start;
    }

    debug!(chunk_count = chunks.len(), "sweeping in parallel");

    let worker_id =
        GcPool::current_worker().expect("parallel_sweep called from outside a GC worker thread");
    for chunk in &chunks {
        // Safety: `chunks` outlives the drain below, so the pointer handed
        // to the task stays valid for the task's entire execution.
        let task = unsafe { GcTask::new_borrowed(chunk as *const SweepChunk as *mut SweepChunk, sweep_chunk_task) };
        pool.worker(worker_id).push(task);
    }

    pool.wait_for_workers();

    let mut report = SweepReport::default();
    let mut new_head: *mut GcHeader = ptr::null_mut();
    let mut tail: *mut GcHeader = ptr::null_mut();

    for chunk in &chunks {
        report.merge(SweepReport {
            objects_freed: chunk.freed_count.get(),
            bytes_freed: chunk.freed_bytes.get(),
        });

        let start = chunk.start.get();
        if start.is_null() {
            continue;
        }

        if new_head.is_null() {
            new_head = start;
        } else {
            unsafe { (*tail).set_next(start) };
        }
        tail = chunk.end.get();
    }

    if !tail.is_null() {
        unsafe { (*tail).set_next(ptr::null_mut()) };
    }
    list.set_head(new_head);

    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    unsafe fn drop_fn(ptr: *mut GcHeader) {
        drop(Box::from_raw(ptr));
    }

    fn build_list(count: usize, reachable: impl Fn(usize) -> bool) -> (ObjectList, Vec<*mut GcHeader>) {
        let mut headers = Vec::with_capacity(count);
        for i in 0..count {
            let header = Box::into_raw(Box::new(GcHeader::new(drop_fn, 1)));
            if reachable(i) {
                unsafe { (*header).mark() };
            }
            headers.push(header);
        }
        for window in headers.windows(2) {
            unsafe { (*window[0]).set_next(window[1]) };
        }
        let head = headers.first().copied().unwrap_or(ptr::null_mut());
        (ObjectList::new(head), headers)
    }

    #[test]
    fn serial_sweep_frees_all_unreachable() {
        let (list, _headers) = build_list(10, |_| false);
        let report = sweep_serial(&list);
        assert_eq!(report.objects_freed, 10);
        assert!(list.head().is_null());
    }

    #[test]
    fn serial_sweep_keeps_reachable_and_clears_their_mark() {
        let (list, headers) = build_list(10, |i| i == 5);
        let report = sweep_serial(&list);
        assert_eq!(report.objects_freed, 9);
        assert_eq!(list.walk_count(), 1);
        assert_eq!(list.head(), headers[5]);
        assert!(!unsafe { (*headers[5]).is_marked() });
    }

    #[test]
    fn parallel_sweep_matches_serial_semantics_on_large_list() {
        const N: usize = 200_000;
        let (list, _headers) = build_list(N, |i| i % 2 == 1);

        let config = GcConfig {
            num_threads: 4,
            ..GcConfig::default()
        };
        let pool = GcPool::init(&config).expect("pool init");
        GcPool::assign_current_worker(Some(0));

        let report = parallel_sweep(&list, N, &pool).expect("chunk allocation succeeds");
        assert_eq!(report.objects_freed as usize, N / 2);
        assert_eq!(list.walk_count(), N / 2);

        GcPool::assign_current_worker(None);
    }
}
