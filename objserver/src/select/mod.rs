//! Process-wide poll table and select loop.
//!
//! Every [`Fd`] owns one slot in the [`PollSet`]. The slot records the
//! fd's current [`Interest`]: whether the descriptor is polled at all, and
//! for which readiness bits. The readiness engine in [`crate::fd`] moves
//! slots between states; the loop here only reads them:
//!
//! - [`PollSet::run_once`] fires expired timeouts, performs one `poll(2)`
//!   over every watched descriptor and hands each readiness report to the
//!   fd's `poll_event` operation,
//! - [`PollSet::main_loop`] repeats that while some fd is polled for
//!   readiness bits or a timeout is pending.
//!
//! The table lives behind `RefCell`s and is shared through `Rc`, so it is
//! confined to the broker thread. No borrow is held while an fd operation
//! runs, which lets `poll_event` re-enter the table to change interest.

mod timer;
pub(crate) mod unix;

pub(crate) use unix as platform;

pub use timer::TimeoutUser;

use crate::error::{Result, Status};
use crate::fd::Fd;
use crate::utils::Slab;
use timer::TimeoutEntry;

use bitflags::bitflags;
use log::{trace, warn};

use std::cell::{Cell, RefCell};
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

bitflags! {
    /// Readiness bits as reported by `poll(2)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollEvents: i16 {
        const IN = libc::POLLIN;
        const PRI = libc::POLLPRI;
        const OUT = libc::POLLOUT;
        const ERR = libc::POLLERR;
        const HUP = libc::POLLHUP;
        const NVAL = libc::POLLNVAL;
    }
}

/// Registered poll interest of one fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interest {
    /// Nothing is waiting on the fd; it is not polled.
    #[default]
    Idle,

    /// The fd is polled for the given bits.
    ///
    /// An empty mask means the fd has waiters but its readiness is already
    /// known, so there is nothing to poll for until someone re-checks.
    Watch(PollEvents),

    /// The descriptor reported an error or hangup and is never polled
    /// again.
    Disabled,
}

impl Interest {
    /// Bits handed to `poll(2)` for this interest.
    pub fn events(self) -> PollEvents {
        match self {
            Interest::Watch(events) => events,
            Interest::Idle | Interest::Disabled => PollEvents::empty(),
        }
    }

    /// Returns `true` if the fd takes part in the next poll.
    pub fn is_watched(self) -> bool {
        matches!(self, Interest::Watch(_))
    }
}

/// One slot of the poll table.
struct PollUser {
    fd: Weak<Fd>,
    interest: Interest,
}

/// The process-wide poll table and timeout queue.
pub struct PollSet {
    users: RefCell<Slab<PollUser>>,
    max_users: usize,

    timeouts: RefCell<BinaryHeap<TimeoutEntry>>,
    timeout_seq: Cell<u64>,
}

impl PollSet {
    /// Creates an empty poll table holding at most `max_users` fds.
    pub fn new(max_users: usize) -> Rc<Self> {
        Rc::new(Self {
            users: RefCell::new(Slab::new(max_users.min(16))),
            max_users,
            timeouts: RefCell::new(BinaryHeap::new()),
            timeout_seq: Cell::new(0),
        })
    }

    /// Reserves a slot for an fd that is about to be created.
    ///
    /// Fails with [`Status::NoMemory`] once the table is full.
    pub(crate) fn add_user(&self) -> Result<usize> {
        let mut users = self.users.borrow_mut();
        if users.len() >= self.max_users {
            return Err(Status::NoMemory);
        }

        Ok(users.insert(PollUser {
            fd: Weak::new(),
            interest: Interest::Idle,
        }))
    }

    /// Attaches the fd created for a slot reserved with
    /// [`add_user`](Self::add_user).
    pub(crate) fn bind_user(&self, index: usize, fd: Weak<Fd>) {
        if let Some(user) = self.users.borrow_mut().get_mut(index) {
            user.fd = fd;
        }
    }

    pub(crate) fn remove_user(&self, index: usize) {
        self.users.borrow_mut().remove(index);
    }

    pub(crate) fn interest(&self, index: usize) -> Interest {
        self.users
            .borrow()
            .get(index)
            .map(|user| user.interest)
            .unwrap_or_default()
    }

    pub(crate) fn set_interest(&self, index: usize, interest: Interest) {
        if let Some(user) = self.users.borrow_mut().get_mut(index) {
            user.interest = interest;
        }
    }

    /// Number of fds currently owning a slot.
    pub fn user_count(&self) -> usize {
        self.users.borrow().len()
    }

    /// Number of fds that take part in the next poll.
    pub fn watched_count(&self) -> usize {
        self.users
            .borrow()
            .iter()
            .filter(|(_, user)| user.interest.is_watched())
            .count()
    }

    /// Schedules `callback` to run once `deadline` has passed.
    pub fn add_timeout_user(
        &self,
        deadline: Instant,
        callback: impl FnOnce() + 'static,
    ) -> TimeoutUser {
        let cancelled = Rc::new(Cell::new(false));
        let seq = self.timeout_seq.get();
        self.timeout_seq.set(seq + 1);

        self.timeouts.borrow_mut().push(TimeoutEntry {
            deadline,
            seq,
            callback: Box::new(callback),
            cancelled: cancelled.clone(),
        });

        TimeoutUser::new(deadline, cancelled)
    }

    /// Cancels a scheduled timeout.
    pub fn remove_timeout_user(&self, user: &TimeoutUser) {
        user.cancel();
    }

    /// Returns `true` if a timeout that has not been cancelled is queued.
    pub fn has_pending_timeouts(&self) -> bool {
        self.timeouts
            .borrow()
            .iter()
            .any(|entry| !entry.cancelled.get())
    }

    /// Runs every expired timeout and returns the time left until the next
    /// one, if any.
    fn process_timeouts(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut expired = Vec::new();

        {
            let mut timeouts = self.timeouts.borrow_mut();
            while let Some(entry) = timeouts.peek() {
                if entry.deadline > now && !entry.cancelled.get() {
                    break;
                }

                if let Some(entry) = timeouts.pop() {
                    if !entry.cancelled.get() {
                        expired.push(entry);
                    }
                }
            }
        }

        // Callbacks may schedule new timeouts, so the heap is not borrowed
        // while they run.
        for entry in expired {
            if !entry.cancelled.get() {
                (entry.callback)();
            }
        }

        self.timeouts
            .borrow()
            .peek()
            .map(|entry| entry.deadline.saturating_duration_since(Instant::now()))
    }

    /// Performs one iteration of the select loop.
    ///
    /// Waits at most `max_wait` (or until the next timeout, whichever comes
    /// first; forever if both are absent) and returns the number of fds
    /// whose `poll_event` ran. Returns immediately with `0` when there is
    /// nothing to wait for.
    pub fn run_once(&self, max_wait: Option<Duration>) -> Result<usize> {
        let next_timeout = self.process_timeouts();

        let timeout = match (next_timeout, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        };

        let mut pollfds = Vec::new();
        let mut fds = Vec::new();

        for (_, user) in self.users.borrow().iter() {
            let Interest::Watch(events) = user.interest else {
                continue;
            };
            let Some(fd) = user.fd.upgrade() else {
                continue;
            };
            let Some(unix_fd) = fd.unix_fd() else {
                continue;
            };

            pollfds.push(libc::pollfd {
                fd: unix_fd,
                events: events.bits(),
                revents: 0,
            });
            fds.push(fd);
        }

        // Parked fds are polled only for errors and hangups; on their own
        // they are no reason to block.
        let active = pollfds.iter().any(|pollfd| pollfd.events != 0);
        if !active && timeout.is_none() {
            return Ok(0);
        }

        let ready = platform::sys_poll(&mut pollfds, platform::poll_timeout_ms(timeout))?;
        if ready == 0 {
            return Ok(0);
        }

        let mut dispatched = 0;
        for (pollfd, fd) in pollfds.iter().zip(fds.iter()) {
            if pollfd.revents == 0 {
                continue;
            }

            let events = PollEvents::from_bits_truncate(pollfd.revents);
            if events.contains(PollEvents::NVAL) {
                warn!("poll reported an invalid descriptor {}", pollfd.fd);
            }

            trace!("fd {} ready: {:?}", pollfd.fd, events);
            fd.poll_event(events);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Runs the select loop until no fd is polled for readiness bits and no
    /// timeout is pending.
    pub fn main_loop(&self) -> Result<()> {
        while self.has_pollable_users() || self.has_pending_timeouts() {
            self.run_once(None)?;
        }

        Ok(())
    }

    /// Returns `true` if some fd with a descriptor is polled for readiness
    /// bits.
    fn has_pollable_users(&self) -> bool {
        self.users.borrow().iter().any(|(_, user)| {
            !user.interest.events().is_empty()
                && user
                    .fd
                    .upgrade()
                    .is_some_and(|fd| fd.unix_fd().is_some())
        })
    }
}

impl fmt::Debug for PollSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollSet")
            .field("users", &self.user_count())
            .field("watched", &self.watched_count())
            .field("max_users", &self.max_users)
            .finish()
    }
}
