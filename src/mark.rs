//! Mark scheduler: traversal of the root set and the two bulk container
//! shapes, with fan-out into range tasks once a container is large enough
//! that dispatch overhead stops dominating.

use crate::containers::{MarkableArray, MarkableTable};
use crate::heap::Traceable;
use crate::pool::GcPool;
use crate::task::{GcTask, MarkRangeArg, MarkSource};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use tracing::debug;

/// The pool/config pair a mark-range task needs once it is running on some
/// worker's thread, detached from the call stack that enqueued it.
///
/// `GcObject::trace` is a host-supplied callback with no room in its
/// signature for extra context, so a composite object's own fan-out (e.g.
/// a sequence tracing its backing array) can only reach the pool and
/// config through this ambient pointer rather than an explicit parameter.
/// It is valid only because the collector forbids more than one active
/// cycle at a time, so there is always exactly zero or one live
/// `CycleContext`.
struct CycleContext {
    pool: *const GcPool,
    parallel_mark_array_threshold: usize,
    parallel_mark_hashtable_threshold: usize,
}

static ACTIVE_CYCLE: AtomicPtr<CycleContext> = AtomicPtr::new(ptr::null_mut());

/// Install the ambient cycle context. Must be paired with [`exit_cycle`].
///
/// # Safety
///
/// `pool` must outlive the mark phase; the caller (the cycle driver) holds
/// it for the whole cycle, which is longer than the mark phase.
pub(crate) unsafe fn enter_cycle(
    pool: &GcPool,
    parallel_mark_array_threshold: usize,
    parallel_mark_hashtable_threshold: usize,
) {
    let ctx = Box::new(CycleContext {
        pool: pool as *const _,
        parallel_mark_array_threshold,
        parallel_mark_hashtable_threshold,
    });
    let prev = ACTIVE_CYCLE.swap(Box::into_raw(ctx), Ordering::SeqCst);
    debug_assert!(prev.is_null(), "nested GC cycle detected");
}

pub(crate) fn exit_cycle() {
    let ctx = ACTIVE_CYCLE.swap(ptr::null_mut(), Ordering::SeqCst);
    if !ctx.is_null() {
        // Safety: only ever set by `enter_cycle` via `Box::into_raw`.
        unsafe {
            drop(Box::from_raw(ctx));
        }
    }
}

fn active_cycle() -> &'static CycleContext {
    let ptr = ACTIVE_CYCLE.load(Ordering::SeqCst);
    assert!(
        !ptr.is_null(),
        "mark scheduler invoked outside an active GC cycle"
    );
    // Safety: non-null only between a matching enter_cycle/exit_cycle pair,
    // during which the pointee outlives every access.
    unsafe { &*ptr }
}

/// Mark one value. Primitives are a no-op; a heap reference is marked via
/// the false→true cycle guard on its header, and only the thread that wins
/// that guard traces its outgoing references.
pub fn mark_value(value: &dyn Traceable) {
    let Some(object) = value.as_object() else {
        return;
    };

    if object.header().mark() {
        // Already marked by someone else; the cycle guard stops us here.
        return;
    }

    OBJECTS_MARKED.fetch_add(1, Ordering::Relaxed);
    if let Some(stats) = GcPool::current_worker_stats() {
        // Safety: a non-null stats pointer was bound by the currently
        // running worker (or the mutator playing worker 0) and outlives
        // every mark task dispatched during this cycle.
        unsafe { (*stats).record_marked(1) };
    }
    object.trace(&mut |child| mark_value(child));
}

/// Total objects marked since the last [`reset_mark_counter`] call. Kept as
/// a free-standing counter (distinct from the pool/config `CycleContext`)
/// so unit tests can call `mark_value` directly without standing up a
/// whole cycle.
static OBJECTS_MARKED: AtomicU64 = AtomicU64::new(0);

pub(crate) fn reset_mark_counter() {
    OBJECTS_MARKED.store(0, Ordering::Relaxed);
}

pub(crate) fn take_mark_counter() -> u64 {
    OBJECTS_MARKED.swap(0, Ordering::Relaxed)
}

/// Mark every root produced by the embedding VM.
pub fn mark_roots<'a>(roots: impl Iterator<Item = &'a dyn Traceable>) {
    for root in roots {
        mark_value(root);
    }
}

fn mark_array_range(array: &dyn MarkableArray, start: usize, end: usize) {
    for i in start..end {
        mark_value(array.get(i));
    }
}

fn mark_table_range(table: &dyn MarkableTable, start: usize, end: usize) {
    for i in start..end {
        if let Some((key, value)) = table.entry(i) {
            mark_value(key);
            mark_value(value);
        }
    }
}

unsafe fn mark_range_task(arg: *mut ()) {
    let arg = Box::from_raw(arg as *mut MarkRangeArg);
    match arg.source {
        MarkSource::Array(ptr) => mark_array_range(&*ptr, arg.start, arg.end),
        MarkSource::Table(ptr) => mark_table_range(&*ptr, arg.start, arg.end),
    }
}

fn fan_out(source: MarkSource, len: usize, worker_id: usize) {
    let ctx = active_cycle();
    // Safety: valid for the duration of the cycle, see `CycleContext`.
    let pool = unsafe { &*ctx.pool };

    let chunks = pool.worker_count().max(1);
    let chunk_size = (len + chunks - 1) / chunks;
    let mut start = 0;
    while start < len {
        let end = (start + chunk_size).min(len);
        let source = match &source {
            MarkSource::Array(p) => MarkSource::Array(*p),
            MarkSource::Table(p) => MarkSource::Table(*p),
        };
        let arg = MarkRangeArg { source, start, end };
        pool.worker(worker_id)
            .push(GcTask::new(arg, mark_range_task));
        start = end;
    }
}

/// Mark an array, fanning out into range tasks if it is large enough that
/// dispatch overhead no longer dominates.
pub fn parallel_mark_array(array: &dyn MarkableArray) {
    let len = array.len();
    if len == 0 {
        return;
    }

    let ctx = active_cycle();
    if len < ctx.parallel_mark_array_threshold {
        mark_array_range(array, 0, len);
        return;
    }

    let worker_id = GcPool::current_worker()
        .expect("parallel_mark_array called from outside a GC worker thread");
    debug!(len, worker_id, "fanning out array mark");
    fan_out(MarkSource::Array(array as *const dyn MarkableArray), len, worker_id);
}

/// Mark a hash table, fanning out into range tasks if its capacity is
/// large enough that dispatch overhead no longer dominates.
pub fn parallel_mark_hashtable(table: &dyn MarkableTable) {
    let len = table.capacity();
    if len == 0 {
        return;
    }

    let ctx = active_cycle();
    if len < ctx.parallel_mark_hashtable_threshold {
        mark_table_range(table, 0, len);
        return;
    }

    let worker_id = GcPool::current_worker()
        .expect("parallel_mark_hashtable called from outside a GC worker thread");
    debug!(len, worker_id, "fanning out hashtable mark");
    fan_out(MarkSource::Table(table as *const dyn MarkableTable), len, worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{GcHeader, GcObject};

    struct Leaf {
        header: GcHeader,
    }

    impl Leaf {
        fn new() -> Self {
            unsafe fn drop_fn(ptr: *mut GcHeader) {
                drop(Box::from_raw(ptr as *mut Leaf));
            }
            Self {
                header: GcHeader::new(drop_fn, std::mem::size_of::<Leaf>()),
            }
        }
    }

    impl GcObject for Leaf {
        fn header(&self) -> &GcHeader {
            &self.header
        }
        fn trace(&self, _mark_value: &mut dyn FnMut(&dyn Traceable)) {}
    }

    struct Ref<'a>(&'a dyn GcObject);
    impl<'a> Traceable for Ref<'a> {
        fn as_object(&self) -> Option<&dyn GcObject> {
            Some(self.0)
        }
    }

    struct Primitive;
    impl Traceable for Primitive {
        fn as_object(&self) -> Option<&dyn GcObject> {
            None
        }
    }

    #[test]
    fn primitive_mark_is_a_no_op() {
        mark_value(&Primitive);
    }

    #[test]
    fn marking_sets_the_header_once() {
        let leaf = Leaf::new();
        let root = Ref(&leaf);

        assert!(!leaf.header.is_marked());
        mark_value(&root);
        assert!(leaf.header.is_marked());
    }

    #[test]
    fn cycle_guard_stops_revisiting_already_marked_objects() {
        // Marking the same object through two separate roots should trace
        // its outgoing references only once, not twice.
        use std::cell::Cell;

        struct Counting<'a> {
            header: GcHeader,
            traced: &'a Cell<u32>,
        }
        impl<'a> GcObject for Counting<'a> {
            fn header(&self) -> &GcHeader {
                &self.header
            }
            fn trace(&self, _mark_value: &mut dyn FnMut(&dyn Traceable)) {
                self.traced.set(self.traced.get() + 1);
            }
        }

        unsafe fn drop_fn(_ptr: *mut GcHeader) {}
        let traced = Cell::new(0);
        let node = Counting {
            header: GcHeader::new(drop_fn, 0),
            traced: &traced,
        };

        let root_a = Ref(&node);
        let root_b = Ref(&node);
        mark_value(&root_a);
        mark_value(&root_b);

        assert_eq!(traced.get(), 1);
    }
}
