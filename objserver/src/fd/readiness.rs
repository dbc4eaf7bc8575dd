//! The readiness engine.
//!
//! These functions keep an fd's poll interest in step with the work
//! attached to it. The rule they maintain: an fd is registered with the
//! select loop (any interest other than [`Interest::Idle`]) exactly when
//! its object has waiters or a read or write async is pending. A disabled
//! fd is the one exception and stays disabled.
//!
//! Once readiness is known and only waiters remain, the fd is parked as
//! `Watch(empty)`: still registered, but not polled, since the waiters
//! will re-check through `signaled` when they run.

use super::{AsyncKind, Fd, FdType, default_fd_get_poll_events};
use crate::error::Status;
use crate::object::{Object, WaitKey, grab, release};
use crate::select::{Interest, PollEvents, platform};

use log::warn;

use std::rc::Rc;
use std::task::Waker;

/// Returns which of `events` the descriptor reports right now.
///
/// Never blocks. An unbound descriptor reports `ERR`; regular files are
/// always ready for whatever is asked.
pub fn check_fd_events(fd: &Fd, events: PollEvents) -> PollEvents {
    let Some(unix_fd) = fd.unix_fd() else {
        return PollEvents::ERR;
    };
    if fd.fd_type() == FdType::File {
        return events;
    }

    let mut pfd = [libc::pollfd {
        fd: unix_fd,
        events: events.bits(),
        revents: 0,
    }];

    match platform::sys_poll(&mut pfd, 0) {
        Ok(n) if n > 0 => PollEvents::from_bits_truncate(pfd[0].revents),
        _ => PollEvents::empty(),
    }
}

/// Recomputes the interest of `fd` from its current work.
pub fn reselect(fd: &Fd) {
    if fd.interest() == Interest::Disabled {
        return;
    }

    if fd.has_pending_work() {
        fd.set_events(Interest::Watch(fd.poll_events()));
    } else {
        fd.set_events(Interest::Idle);
    }
}

/// `add_queue` for objects that wait on their fd.
///
/// The first waiter starts polling the fd.
pub fn default_fd_add_queue(obj: &Rc<Object>, waker: Waker) -> WaitKey {
    let first = !obj.has_waiters();
    let key = obj.enqueue(waker);

    if first && let Some(fd) = obj.fd() {
        fd.set_events(Interest::Watch(fd.poll_events()));
    }

    key
}

/// `remove_queue` for objects that wait on their fd.
///
/// Removing the last waiter stops polling unless asyncs are pending.
/// Removing an unknown key is a no-op.
pub fn default_fd_remove_queue(obj: &Rc<Object>, key: WaitKey) {
    // Keep the object alive while the queue is inspected, the waiter may
    // have held the last outside reference.
    let obj = grab(obj);

    obj.dequeue(key);
    if !obj.has_waiters()
        && let Some(fd) = obj.fd()
    {
        reselect(fd);
    }

    release(obj);
}

/// `signaled` for objects that wait on their fd.
///
/// Queries readiness with a zero-timeout poll. A ready fd stops being
/// polled for its waiters; a fd that is not ready goes back to being
/// polled for everything its work needs.
pub fn default_fd_signaled(obj: &Rc<Object>) -> bool {
    let Some(fd) = obj.fd() else {
        return false;
    };
    if fd.interest() == Interest::Disabled {
        return false;
    }

    // Regular files are signaled whatever access they were opened with.
    let ready = fd.fd_type() == FdType::File
        || !check_fd_events(fd, fd.poll_events()).is_empty();

    if ready && !fd.has_pending_asyncs() {
        if fd.has_waiters() {
            fd.set_events(Interest::Watch(PollEvents::empty()));
        } else {
            fd.set_events(Interest::Idle);
        }
    } else {
        reselect(fd);
    }

    ready
}

/// `poll_event` for fds without special needs.
///
/// Completes pending reads on input and pending writes on output. An error,
/// hangup or invalid descriptor disables the fd for good, so a dead
/// descriptor cannot spin the select loop. Finally wakes the object's
/// waiters.
pub fn default_poll_event(fd: &Fd, event: PollEvents) {
    let failed = PollEvents::ERR | PollEvents::HUP | PollEvents::NVAL;

    if event.intersects(PollEvents::IN | failed) {
        fd.async_wake_up(AsyncKind::Read, Status::Alerted);
    }
    if event.intersects(PollEvents::OUT | failed) {
        fd.async_wake_up(AsyncKind::Write, Status::Alerted);
    }

    if event.intersects(failed) {
        warn!("disabling fd {:?} after {:?}", fd.unix_fd(), event);
        fd.set_events(Interest::Disabled);
    } else if fd.has_waiters() {
        // Waiters re-check readiness themselves, only async work is polled.
        fd.set_events(Interest::Watch(default_fd_get_poll_events(fd)));
    } else {
        reselect(fd);
    }

    if let Some(user) = fd.user() {
        user.wake_up();
    }
}
