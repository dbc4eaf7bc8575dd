#![allow(dead_code)]

use objserver::fd::{
    AsyncKind, AsyncRequest, AsyncStatus, AsyncTransition, FdAttributes, default_fd_add_queue,
    default_fd_get_poll_events, default_fd_remove_queue, default_fd_signaled, fd_queue_async,
};
use objserver::{Fd, FdOps, FdType, Interest, Object, ObjectOps, PollEvents, PollSet, WaitKey};

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counts how many times it was woken.
#[derive(Default)]
pub struct CountingWaker(AtomicUsize);

impl CountingWaker {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Wake for CountingWaker {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn counting_waker() -> (Arc<CountingWaker>, Waker) {
    let counter = Arc::new(CountingWaker::default());
    let waker = Waker::from(counter.clone());
    (counter, waker)
}

fn set_nonblocking(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        assert!(flags >= 0);
        assert_eq!(libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK), 0);
    }
}

/// A non-blocking pipe, `(read, write)`.
pub fn raw_pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [-1; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

    set_nonblocking(fds[0]);
    set_nonblocking(fds[1]);

    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// A connected pair of Unix stream sockets.
pub fn socketpair() -> (OwnedFd, OwnedFd) {
    let mut fds = [-1; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(rc, 0);

    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

pub fn write_bytes(fd: RawFd, data: &[u8]) -> isize {
    unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) }
}

/// Reads from a non-blocking descriptor. `Some(0)` means end of file,
/// `None` means no data yet.
pub fn try_read(fd: RawFd) -> Option<usize> {
    let mut buf = [0u8; 64];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 { None } else { Some(n as usize) }
}

/// Returns `true` once every writer of the pipe behind `read_end` is closed.
pub fn writers_closed(read_end: &OwnedFd) -> bool {
    try_read(read_end.as_raw_fd()) == Some(0)
}

pub fn temp_path(tag: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock drift")
        .as_nanos();

    std::env::temp_dir().join(format!(
        "objserver-{}-{}-{}.tmp",
        tag,
        std::process::id(),
        unique
    ))
}

/// An object that waits on its fd.
pub struct Waitable;

impl ObjectOps for Waitable {
    fn type_name(&self) -> &'static str {
        "waitable"
    }

    fn add_queue(&self, obj: &Rc<Object>, waker: Waker) -> WaitKey {
        default_fd_add_queue(obj, waker)
    }

    fn remove_queue(&self, obj: &Rc<Object>, key: WaitKey) {
        default_fd_remove_queue(obj, key)
    }

    fn signaled(&self, obj: &Rc<Object>) -> bool {
        default_fd_signaled(obj)
    }
}

/// An fd kind that cares about input and supports asyncs.
pub struct ReadableFd;

impl FdOps for ReadableFd {
    fn fd_type(&self, _fd: &Fd) -> FdType {
        FdType::Default
    }

    fn get_poll_events(&self, fd: &Fd) -> PollEvents {
        PollEvents::IN | default_fd_get_poll_events(fd)
    }

    fn queue_async(
        &self,
        fd: &Fd,
        request: AsyncRequest,
        status: AsyncStatus,
        kind: AsyncKind,
        count: u32,
    ) -> objserver::Result<AsyncTransition> {
        Ok(fd_queue_async(fd, request, status, kind, count))
    }
}

/// An fd kind with nothing but the defaults.
pub struct PlainFd;

impl FdOps for PlainFd {
    fn fd_type(&self, _fd: &Fd) -> FdType {
        FdType::Device
    }
}

pub fn readable_object(poll: &Rc<PollSet>, unix_fd: Option<OwnedFd>) -> Rc<Object> {
    objserver::alloc_fd_object(poll, Waitable, ReadableFd, unix_fd, FdAttributes::default())
        .expect("poll table full")
}

pub fn fd_of(obj: &Object) -> Rc<Fd> {
    obj.fd().cloned().expect("object has no fd")
}

/// Checks that the fd is registered exactly when work is attached to it.
pub fn assert_interest_matches_work(obj: &Object) {
    let fd = fd_of(obj);
    if fd.interest() == Interest::Disabled {
        return;
    }

    let registered = fd.interest() != Interest::Idle;
    let work = obj.has_waiters() || fd.has_pending_asyncs();
    assert_eq!(
        registered,
        work,
        "interest {:?} with waiters={} asyncs={}",
        fd.interest(),
        obj.has_waiters(),
        fd.has_pending_asyncs()
    );
}
