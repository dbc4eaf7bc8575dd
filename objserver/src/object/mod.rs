//! Reference-counted broker objects.
//!
//! Every client-visible entity (file, pipe end, console, ...) is an
//! [`Object`]: a small header holding the kind-specific [`ObjectOps`], an
//! optional [`Fd`] companion and a wait queue.
//!
//! Objects are shared as `Rc<Object>`. [`grab`] and [`release`] are the
//! reference count operations; dropping the last `Rc` runs the kind's
//! `destroy` operation exactly once and then tears down the fd. `Object` is
//! `!Send`, so the whole engine stays on the broker thread.

mod wait_queue;

pub use wait_queue::WaitKey;
pub(crate) use wait_queue::WaitQueue;

use crate::fd::Fd;

use log::debug;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::task::Waker;

/// Operations implemented by each object kind.
///
/// Every method has a default matching an object without any
/// synchronization behavior; kinds override what they support.
pub trait ObjectOps {
    /// Short name of the object kind, used in logs.
    fn type_name(&self) -> &'static str;

    /// Writes a description of the object.
    fn dump(&self, obj: &Object, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let _ = obj;
        f.write_str(self.type_name())
    }

    /// Attaches a waiter to the object.
    fn add_queue(&self, obj: &Rc<Object>, waker: Waker) -> WaitKey {
        obj.enqueue(waker)
    }

    /// Detaches a waiter. Unknown keys are ignored.
    fn remove_queue(&self, obj: &Rc<Object>, key: WaitKey) {
        obj.dequeue(key);
    }

    /// Returns `true` if a waiter on the object may proceed.
    fn signaled(&self, obj: &Rc<Object>) -> bool {
        let _ = obj;
        false
    }

    /// Called once a wait on the object has been satisfied.
    fn satisfied(&self, obj: &Rc<Object>) {
        let _ = obj;
    }

    /// Returns the fd used for I/O on the object.
    fn get_fd(&self, obj: &Object) -> Option<Rc<Fd>> {
        obj.fd().cloned()
    }

    /// Frees kind-specific resources. Runs exactly once, when the last
    /// reference goes away.
    fn destroy(&self, obj: &Object) {
        let _ = obj;
    }
}

/// A broker object.
pub struct Object {
    ops: Box<dyn ObjectOps>,
    fd: Option<Rc<Fd>>,
    queue: RefCell<WaitQueue>,
}

impl Object {
    /// Creates an object without an fd.
    pub fn new(ops: impl ObjectOps + 'static) -> Rc<Self> {
        let obj = Rc::new(Self {
            ops: Box::new(ops),
            fd: None,
            queue: RefCell::new(WaitQueue::default()),
        });

        debug!("created {}", obj.type_name());
        obj
    }

    /// Creates an object together with its fd.
    ///
    /// `make_fd` receives the weak back-reference the fd must keep to its
    /// user.
    pub(crate) fn with_fd(
        ops: Box<dyn ObjectOps>,
        make_fd: impl FnOnce(&Weak<Object>) -> Rc<Fd>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|user| Self {
            ops,
            fd: Some(make_fd(user)),
            queue: RefCell::new(WaitQueue::default()),
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.ops.type_name()
    }

    /// The fd owned by this object, if any.
    pub fn fd(&self) -> Option<&Rc<Fd>> {
        self.fd.as_ref()
    }

    /// The fd used for I/O on this object, as chosen by its kind.
    pub fn get_fd(&self) -> Option<Rc<Fd>> {
        self.ops.get_fd(self)
    }

    pub fn add_queue(self: &Rc<Self>, waker: Waker) -> WaitKey {
        self.ops.add_queue(self, waker)
    }

    pub fn remove_queue(self: &Rc<Self>, key: WaitKey) {
        self.ops.remove_queue(self, key)
    }

    pub fn signaled(self: &Rc<Self>) -> bool {
        self.ops.signaled(self)
    }

    pub fn satisfied(self: &Rc<Self>) {
        self.ops.satisfied(self)
    }

    /// Wakes every waiter so it re-checks [`signaled`](Self::signaled).
    ///
    /// Waiters stay queued; each removes itself once its wait completes.
    /// Returns the number of waiters woken.
    pub fn wake_up(&self) -> usize {
        // No borrow is held while wakers run, they may re-enter the queue.
        let wakers = self.queue.borrow().wakers();
        let count = wakers.len();

        for waker in wakers {
            waker.wake();
        }

        count
    }

    pub fn has_waiters(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Links a waiter into the queue without any kind-specific behavior.
    ///
    /// Building block for [`ObjectOps::add_queue`] implementations.
    pub fn enqueue(&self, waker: Waker) -> WaitKey {
        self.queue.borrow_mut().push(waker)
    }

    /// Unlinks a waiter. Returns `false` if `key` was not queued.
    ///
    /// Building block for [`ObjectOps::remove_queue`] implementations.
    pub fn dequeue(&self, key: WaitKey) -> bool {
        self.queue.borrow_mut().remove(key)
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        debug!("destroying {}", self.type_name());

        self.ops.destroy(self);

        if let Some(fd) = &self.fd {
            fd.detach();
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ops.dump(self, f)
    }
}

/// Takes a new reference to `obj`.
pub fn grab(obj: &Rc<Object>) -> Rc<Object> {
    Rc::clone(obj)
}

/// Drops a reference. The object is destroyed when it was the last one.
pub fn release(obj: Rc<Object>) {
    drop(obj);
}
