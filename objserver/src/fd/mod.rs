//! File descriptor objects.
//!
//! An [`Fd`] is the companion of exactly one [`Object`]: it owns the Unix
//! descriptor behind the object, a pluggable [`FdOps`] implementation for
//! the concrete kind (file, pipe, ...), the per-kind async queues and a
//! slot in the process-wide [`PollSet`].
//!
//! Ownership runs one way. The object holds the only strong reference to
//! its fd; the fd points back through a `Weak`, so an fd can never keep its
//! user alive and can never be shared between two objects.
//!
//! ```text
//!  Object ──Rc──▶ Fd ──Rc──▶ PollSet
//!    ▲            │
//!    └────Weak────┘
//! ```

mod async_io;
mod ops;
mod readiness;

pub use async_io::{
    AsyncEntry, AsyncKind, AsyncQueue, AsyncRequest, AsyncStatus, AsyncTransition, RequestId,
    fd_queue_async,
};
pub use ops::{
    FdOps, default_fd_get_poll_events, no_fd_flush, no_fd_get_file_info, no_fd_queue_async,
};
pub use readiness::{
    check_fd_events, default_fd_add_queue, default_fd_remove_queue, default_fd_signaled,
    default_poll_event, reselect,
};

use crate::error::{Result, Status};
use crate::object::{Object, ObjectOps};
use crate::process::Access;
use crate::select::{Interest, PollEvents, PollSet};

use bitflags::bitflags;
use log::{debug, trace};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

/// Kind of descriptor reported to clients.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdType {
    Invalid = 0,
    Default = 1,
    File = 2,
    Pipe = 3,
    Socket = 4,
    Serial = 5,
    Console = 6,
    Device = 7,
}

impl FdType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => FdType::Invalid,
            1 => FdType::Default,
            2 => FdType::File,
            3 => FdType::Pipe,
            4 => FdType::Socket,
            5 => FdType::Serial,
            6 => FdType::Console,
            7 => FdType::Device,
            _ => return None,
        })
    }
}

bitflags! {
    /// Flags reported alongside the descriptor type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FdFlags: u32 {
        const OVERLAPPED = 0x01;
        const TIMEOUT = 0x02;
        const RECV_SHUTDOWN = 0x04;
        const SEND_SHUTDOWN = 0x08;
    }
}

bitflags! {
    /// Open options of an fd.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileOptions: u32 {
        const WRITE_THROUGH = 0x0000_0002;
        const SEQUENTIAL_ONLY = 0x0000_0004;
        const NO_INTERMEDIATE_BUFFERING = 0x0000_0008;
        const SYNCHRONOUS_IO_ALERT = 0x0000_0010;
        const SYNCHRONOUS_IO_NONALERT = 0x0000_0020;
        const DELETE_ON_CLOSE = 0x0000_1000;
    }
}

/// Protection and mode of a new fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdAttributes {
    pub access: Access,
    pub options: FileOptions,

    /// Status reported when the fd is used while no descriptor is bound.
    pub no_fd_status: Status,
}

impl Default for FdAttributes {
    fn default() -> Self {
        Self {
            access: Access::all(),
            options: FileOptions::empty(),
            no_fd_status: Status::BadDeviceType,
        }
    }
}

/// Metadata returned by the `get_file_info` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub fd_type: FdType,
    pub flags: FdFlags,
    pub attributes: u32,
    pub size: u64,
    pub links: u32,
    pub device: u64,
    pub index: u64,
    pub access_time: i64,
    pub write_time: i64,
    pub change_time: i64,
}

/// File attribute bits carried in [`FileInfo::attributes`].
pub mod attributes {
    pub const READONLY: u32 = 0x0001;
    pub const DIRECTORY: u32 = 0x0010;
    pub const ARCHIVE: u32 = 0x0020;
}

impl FileInfo {
    /// Builds file information from a `stat` of the descriptor.
    pub fn from_stat(fd_type: FdType, flags: FdFlags, st: &libc::stat) -> Self {
        let mut attributes = if (st.st_mode & libc::S_IFMT) == libc::S_IFDIR {
            attributes::DIRECTORY
        } else {
            attributes::ARCHIVE
        };
        if (st.st_mode & libc::S_IWUSR) == 0 {
            attributes |= attributes::READONLY;
        }

        Self {
            fd_type,
            flags,
            attributes,
            size: st.st_size as u64,
            links: st.st_nlink as u32,
            device: st.st_dev as u64,
            index: st.st_ino as u64,
            access_time: st.st_atime as i64,
            write_time: st.st_mtime as i64,
            change_time: st.st_ctime as i64,
        }
    }
}

/// The Unix descriptor slot of an fd. Only ever moves forward.
enum UnixFd {
    Unbound,
    Bound(OwnedFd),
    Closed,
}

/// A file descriptor object.
pub struct Fd {
    ops: Box<dyn FdOps>,
    user: Weak<Object>,
    unix_fd: RefCell<UnixFd>,

    access: Access,
    options: FileOptions,
    no_fd_status: Status,
    cacheable: Cell<bool>,

    poll: Rc<PollSet>,
    poll_index: usize,

    read_q: RefCell<AsyncQueue>,
    write_q: RefCell<AsyncQueue>,
    wait_q: RefCell<AsyncQueue>,
}

/// Allocates an object together with its fd.
///
/// The two are linked before anyone else can see them: the returned object
/// owns the fd, and the fd's user is the returned object. `unix_fd` may be
/// `None` when the descriptor is bound later with [`set_unix_fd`].
///
/// Fails with [`Status::NoMemory`] when the poll table is full, in which
/// case nothing has been allocated.
pub fn alloc_fd_object<O, F>(
    poll: &Rc<PollSet>,
    obj_ops: O,
    fd_ops: F,
    unix_fd: Option<OwnedFd>,
    attrs: FdAttributes,
) -> Result<Rc<Object>>
where
    O: ObjectOps + 'static,
    F: FdOps + 'static,
{
    let poll_index = poll.add_user()?;

    let unix_fd = match unix_fd {
        Some(fd) => UnixFd::Bound(fd),
        None => UnixFd::Unbound,
    };

    let obj = Object::with_fd(Box::new(obj_ops), |user| {
        Rc::new(Fd {
            ops: Box::new(fd_ops),
            user: user.clone(),
            unix_fd: RefCell::new(unix_fd),
            access: attrs.access,
            options: attrs.options,
            no_fd_status: attrs.no_fd_status,
            cacheable: Cell::new(false),
            poll: poll.clone(),
            poll_index,
            read_q: RefCell::new(AsyncQueue::default()),
            write_q: RefCell::new(AsyncQueue::default()),
            wait_q: RefCell::new(AsyncQueue::default()),
        })
    });

    if let Some(fd) = obj.fd() {
        poll.bind_user(poll_index, Rc::downgrade(fd));
        debug!("allocated {} fd {:?} in poll slot {}", obj.type_name(), fd.unix_fd(), poll_index);
    }

    Ok(obj)
}

/// Returns the object owning `fd`.
///
/// `None` once the owning object has been destroyed.
pub fn get_fd_user(fd: &Fd) -> Option<Rc<Object>> {
    fd.user()
}

/// Returns the Unix descriptor bound to `fd`, or `None` while unbound.
pub fn get_unix_fd(fd: &Fd) -> Option<RawFd> {
    fd.unix_fd()
}

/// Binds the Unix descriptor of an object created without one.
///
/// # Panics
///
/// Panics if the object has no fd, if a descriptor was already bound, or if
/// a waiter is already attached. All three are broker bugs.
pub fn set_unix_fd(obj: &Object, unix_fd: OwnedFd) {
    let fd = obj.fd().expect("set_unix_fd on an object without an fd");
    assert!(
        !obj.has_waiters(),
        "set_unix_fd after a waiter attached to the {}",
        obj.type_name()
    );

    let mut slot = fd.unix_fd.borrow_mut();
    assert!(
        matches!(*slot, UnixFd::Unbound),
        "unix fd of the {} bound twice",
        obj.type_name()
    );

    debug!("binding unix fd {} to {}", unix_fd.as_raw_fd(), obj.type_name());
    *slot = UnixFd::Bound(unix_fd);
}

impl Fd {
    /// The object using this fd.
    pub fn user(&self) -> Option<Rc<Object>> {
        self.user.upgrade()
    }

    /// The bound Unix descriptor, if any.
    pub fn unix_fd(&self) -> Option<RawFd> {
        match &*self.unix_fd.borrow() {
            UnixFd::Bound(fd) => Some(fd.as_raw_fd()),
            UnixFd::Unbound | UnixFd::Closed => None,
        }
    }

    /// The bound Unix descriptor, or the fd's `no_fd_status`.
    pub fn require_unix_fd(&self) -> Result<RawFd> {
        self.unix_fd().ok_or(self.no_fd_status)
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn options(&self) -> FileOptions {
        self.options
    }

    /// Returns `true` unless the fd was opened for synchronous I/O.
    pub fn is_overlapped(&self) -> bool {
        !self
            .options
            .intersects(FileOptions::SYNCHRONOUS_IO_ALERT | FileOptions::SYNCHRONOUS_IO_NONALERT)
    }

    /// Flags derived from the fd's own state.
    pub fn flags(&self) -> FdFlags {
        if self.is_overlapped() {
            FdFlags::OVERLAPPED
        } else {
            FdFlags::empty()
        }
    }

    /// Allows clients to cache the descriptor. Cannot be undone.
    pub fn allow_caching(&self) {
        self.cacheable.set(true);
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable.get()
    }

    pub fn fd_type(&self) -> FdType {
        self.ops.fd_type(self)
    }

    /// Current registered poll interest.
    pub fn interest(&self) -> Interest {
        self.poll.interest(self.poll_index)
    }

    /// Sets the events the select loop waits for on this fd.
    ///
    /// A disabled fd stays disabled.
    pub fn set_events(&self, interest: Interest) {
        let current = self.interest();
        if current == Interest::Disabled || current == interest {
            return;
        }

        trace!("fd {:?} interest {:?} -> {:?}", self.unix_fd(), current, interest);
        self.poll.set_interest(self.poll_index, interest);
    }

    /// Returns `true` if the owning object has waiters.
    pub fn has_waiters(&self) -> bool {
        self.user().is_some_and(|user| user.has_waiters())
    }

    /// Returns `true` if anything needs this fd polled: a waiter on the
    /// owning object, or a pending read or write async.
    pub fn has_pending_work(&self) -> bool {
        self.has_waiters() || self.has_pending_asyncs()
    }

    /// Returns `true` if a read or write async is pending.
    pub fn has_pending_asyncs(&self) -> bool {
        self.read_q.borrow().is_waiting() || self.write_q.borrow().is_waiting()
    }

    pub fn async_queue(&self, kind: AsyncKind) -> &RefCell<AsyncQueue> {
        match kind {
            AsyncKind::Read => &self.read_q,
            AsyncKind::Write => &self.write_q,
            AsyncKind::Wait => &self.wait_q,
        }
    }

    /// Completes every async of `kind` with `status`.
    ///
    /// Returns the number of asyncs woken.
    pub fn async_wake_up(&self, kind: AsyncKind, status: Status) -> usize {
        let entries = self.async_queue(kind).borrow_mut().take();
        let count = entries.len();

        for entry in entries {
            entry.complete(status);
        }

        count
    }

    pub fn poll_event(&self, event: PollEvents) {
        self.ops.poll_event(self, event)
    }

    pub fn poll_events(&self) -> PollEvents {
        self.ops.get_poll_events(self)
    }

    pub fn flush(&self) -> Result<()> {
        self.ops.flush(self)
    }

    pub fn file_info(&self) -> Result<FileInfo> {
        self.ops.get_file_info(self)
    }

    pub fn queue_async(
        &self,
        request: AsyncRequest,
        status: AsyncStatus,
        kind: AsyncKind,
        count: u32,
    ) -> Result<AsyncTransition> {
        self.ops.queue_async(self, request, status, kind, count)
    }

    /// Tears the fd down when its user is destroyed: cancels outstanding
    /// asyncs, stops polling and closes the descriptor.
    pub(crate) fn detach(&self) {
        for kind in [AsyncKind::Read, AsyncKind::Write, AsyncKind::Wait] {
            self.async_wake_up(kind, Status::Cancelled);
        }

        self.poll.set_interest(self.poll_index, Interest::Idle);

        let old = self.unix_fd.replace(UnixFd::Closed);
        if let UnixFd::Bound(fd) = old {
            debug!("closing unix fd {}", fd.as_raw_fd());
        }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        self.poll.remove_user(self.poll_index);
    }
}

impl fmt::Debug for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fd unix_fd={} options={:08x} interest={:?}",
            self.unix_fd().unwrap_or(-1),
            self.options.bits(),
            self.interest()
        )
    }
}
