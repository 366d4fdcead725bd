//! A minimal heap object for the integration tests: one header, a list of
//! outgoing references, and a shared counter its destructor bumps so a
//! test can assert exactly how many objects were freed.

use std::cell::RefCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use vm_gc::{GcHeader, GcObject, Traceable};

/// `#[repr(C)]` so `drop_fn`, which only ever receives a `*mut GcHeader`,
/// can cast back to `*mut MockObject` because `header` is the first field.
#[repr(C)]
pub struct MockObject {
    header: GcHeader,
    refs: RefCell<Vec<*const MockObject>>,
    destroyed: *const AtomicUsize,
}

impl MockObject {
    /// Allocate one object of `size` bytes whose destructor bumps
    /// `destroyed`. Returns the raw header pointer the caller links into an
    /// `ObjectList`.
    pub fn alloc(destroyed: &AtomicUsize, size: usize) -> *mut GcHeader {
        unsafe fn drop_fn(ptr: *mut GcHeader) {
            let obj = ptr as *mut MockObject;
            (*(*obj).destroyed).fetch_add(1, Ordering::Relaxed);
            drop(Box::from_raw(obj));
        }

        let boxed = Box::new(MockObject {
            header: GcHeader::new(drop_fn, size),
            refs: RefCell::new(Vec::new()),
            destroyed: destroyed as *const AtomicUsize,
        });
        Box::into_raw(boxed) as *mut GcHeader
    }

    /// Record an outgoing reference from the object behind `from` to the
    /// one behind `to`. Both must still be live.
    pub fn link(from: *mut GcHeader, to: *mut GcHeader) {
        let from = from as *mut MockObject;
        unsafe { (*from).refs.borrow_mut().push(to as *const MockObject) };
    }
}

impl GcObject for MockObject {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, mark_value: &mut dyn FnMut(&dyn Traceable)) {
        for &ptr in self.refs.borrow().iter() {
            let reference = MockRef(ptr);
            mark_value(&reference);
        }
    }
}

/// A root, or an outgoing reference, pointing at a [`MockObject`].
pub struct MockRef(pub *const MockObject);

impl Traceable for MockRef {
    fn as_object(&self) -> Option<&dyn GcObject> {
        // Safety: every `MockRef` built in these tests points at an object
        // still linked into the list under collection.
        Some(unsafe { &*self.0 })
    }
}

/// Link `headers` into a singly-linked list in order, returning the head
/// (or null if `headers` is empty).
pub fn link_list(headers: &[*mut GcHeader]) -> *mut GcHeader {
    for window in headers.windows(2) {
        unsafe { (*window[0]).set_next(window[1]) };
    }
    headers.first().copied().unwrap_or(ptr::null_mut())
}
