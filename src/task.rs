//! Task payloads carried through the work-stealing deques.
//!
//! A task is a function pointer paired with an opaque argument pointer, not
//! a boxed closure: the producer allocates the argument block and the task
//! function is responsible for freeing it once it has run. This mirrors the
//! `(fn, arg)` pair the collector dispatches through its deques, keeping the
//! ownership of each argument block explicit rather than hidden inside a
//! trait object.

use crate::containers::{MarkableArray, MarkableTable};
use crate::heap::GcHeader;
use std::cell::Cell;

/// A unit of work queued on a worker's deque.
///
/// `run` either takes ownership of `arg` and must free it before returning
/// (tasks built with [`GcTask::new`]), or borrows memory the producer keeps
/// alive until the task has run (tasks built with [`GcTask::new_borrowed`]).
/// The deque itself never interprets `arg`; it is opaque cargo.
pub struct GcTask {
    run: unsafe fn(*mut ()),
    arg: *mut (),
}

impl GcTask {
    /// Build a task from an owned argument and a typed entry point.
    ///
    /// The argument is boxed and leaked into a raw pointer; `run` is
    /// responsible for reconstructing the box and dropping it.
    pub fn new<A>(arg: A, run: unsafe fn(*mut ())) -> Self {
        let boxed = Box::new(arg);
        Self {
            run,
            arg: Box::into_raw(boxed) as *mut (),
        }
    }

    /// Build a task over borrowed memory the task function must not free.
    ///
    /// # Safety
    ///
    /// The caller must guarantee `ptr` stays valid until the task has run
    /// (e.g. it lives in a `Vec` the coordinator holds across the drain).
    pub unsafe fn new_borrowed<A>(ptr: *mut A, run: unsafe fn(*mut ())) -> Self {
        Self {
            run,
            arg: ptr as *mut (),
        }
    }

    /// Execute the task, consuming it.
    pub fn execute(self) {
        // Safety: `arg` was produced by one of the constructors above,
        // matching the type `run` expects, and `run`'s ownership contract
        // (free vs. borrow) matches how `arg` was built.
        unsafe {
            (self.run)(self.arg);
        }
    }
}

// Safety: the argument block behind `arg` is only ever touched by the
// producer (before handoff) and the single worker that eventually runs the
// task, never concurrently by both.
unsafe impl Send for GcTask {}

/// Which bulk container a mark-range task was fanned out from.
pub enum MarkSource {
    Array(*const dyn MarkableArray),
    Table(*const dyn MarkableTable),
}

// Safety: the pointee is only read (never mutated) for the lifetime of the
// mark phase, and the mark phase does not outlive the cycle that created it.
unsafe impl Send for MarkSource {}

/// Argument for a parallel mark-range task: trace `[start, end)` of the
/// container referenced by `source`.
pub struct MarkRangeArg {
    pub source: MarkSource,
    pub start: usize,
    pub end: usize,
}

/// Argument for a parallel sweep-chunk task.
///
/// `start`/`end` are inclusive endpoints of a contiguous slice of the
/// global object list on entry. The coordinator keeps each `SweepChunk` in
/// a `Vec` across the whole drain and hands the task only a borrowed
/// pointer into it (`GcTask::new_borrowed`), so the task can write the
/// endpoints of the surviving sub-slice back through the `Cell`s (both null
/// if nothing in the chunk survived) for the coordinator to read once the
/// chunk task completes.
pub struct SweepChunk {
    pub start: Cell<*mut GcHeader>,
    pub end: Cell<*mut GcHeader>,
    pub size: usize,
    pub freed_count: Cell<u64>,
    pub freed_bytes: Cell<u64>,
}

impl SweepChunk {
    pub fn new(start: *mut GcHeader, end: *mut GcHeader, size: usize) -> Self {
        Self {
            start: Cell::new(start),
            end: Cell::new(end),
            size,
            freed_count: Cell::new(0),
            freed_bytes: Cell::new(0),
        }
    }
}
