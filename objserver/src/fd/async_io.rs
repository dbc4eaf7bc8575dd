use super::{Fd, reselect};
use crate::error::Status;
use crate::process::{AsyncCompletion, Process};

use log::debug;

use std::rc::Weak;

/// The queue an async is registered on.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncKind {
    Read = 1,
    Write = 2,
    Wait = 3,
}

impl AsyncKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(AsyncKind::Read),
            2 => Some(AsyncKind::Write),
            3 => Some(AsyncKind::Wait),
            _ => None,
        }
    }
}

/// Client-chosen identity of an async request (its overlapped address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Status carried by an async registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    /// The operation could not complete yet and must be queued.
    Pending,

    /// The operation finished with the given status code.
    Completed(u32),

    /// The client gave up on the operation.
    Cancelled,
}

impl AsyncStatus {
    pub fn from_code(code: u32) -> Self {
        if code == Status::Pending.code() {
            AsyncStatus::Pending
        } else if code == Status::Cancelled.code() {
            AsyncStatus::Cancelled
        } else {
            AsyncStatus::Completed(code)
        }
    }

    pub fn is_pending(self) -> bool {
        self == AsyncStatus::Pending
    }
}

/// An async request as submitted by a client.
#[derive(Debug, Clone)]
pub struct AsyncRequest {
    pub id: RequestId,

    /// Receives the completion. A request whose process is gone completes
    /// silently.
    pub process: Weak<Process>,
}

impl AsyncRequest {
    /// A request not tied to any process.
    pub fn new(id: RequestId) -> Self {
        Self {
            id,
            process: Weak::new(),
        }
    }

    pub fn for_process(id: RequestId, process: Weak<Process>) -> Self {
        Self { id, process }
    }
}

/// A queued async.
#[derive(Debug, Clone)]
pub struct AsyncEntry {
    pub request: AsyncRequest,
    pub count: u32,
}

impl AsyncEntry {
    /// Posts the completion to the requesting process.
    pub(crate) fn complete(self, status: Status) {
        debug!("async {:?} completed with {}", self.request.id, status);

        if let Some(process) = self.request.process.upgrade() {
            process.queue_apc(AsyncCompletion {
                request: self.request.id,
                status,
            });
        }
    }
}

/// What [`fd_queue_async`] did with a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncTransition {
    /// A new pending entry was queued.
    Queued,

    /// An existing pending entry was refreshed in place.
    Updated,

    /// A finished request removed its entry.
    Removed,

    /// A finished request had no entry; nothing changed.
    Ignored,
}

/// Pending asyncs of one kind on one fd.
///
/// Only pending requests are stored, at most one entry per [`RequestId`].
#[derive(Debug, Default)]
pub struct AsyncQueue {
    entries: Vec<AsyncEntry>,
}

impl AsyncQueue {
    fn position(&self, id: RequestId) -> Option<usize> {
        self.entries.iter().position(|e| e.request.id == id)
    }

    /// Returns `true` if anything is pending.
    pub fn is_waiting(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: RequestId) -> Option<&AsyncEntry> {
        self.position(id).map(|pos| &self.entries[pos])
    }

    /// Removes and returns every entry in submission order.
    pub(crate) fn take(&mut self) -> Vec<AsyncEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Registers or retires an async on one of the fd's queues.
///
/// A pending status queues the request, or refreshes the entry when the
/// same request is already queued. Any other status removes the matching
/// entry and is a no-op without one. Either way the fd's interest is then
/// recomputed, since pending reads and writes decide what gets polled.
pub fn fd_queue_async(
    fd: &Fd,
    request: AsyncRequest,
    status: AsyncStatus,
    kind: AsyncKind,
    count: u32,
) -> AsyncTransition {
    let transition = {
        let mut queue = fd.async_queue(kind).borrow_mut();

        match (queue.position(request.id), status.is_pending()) {
            (Some(pos), true) => {
                let entry = &mut queue.entries[pos];
                entry.request = request;
                entry.count = count;
                AsyncTransition::Updated
            }
            (None, true) => {
                queue.entries.push(AsyncEntry { request, count });
                AsyncTransition::Queued
            }
            (Some(pos), false) => {
                queue.entries.remove(pos);
                AsyncTransition::Removed
            }
            (None, false) => AsyncTransition::Ignored,
        }
    };

    reselect(fd);
    transition
}
