use super::{
    AsyncKind, AsyncRequest, AsyncStatus, AsyncTransition, Fd, FdType, FileInfo,
    default_poll_event,
};
use crate::error::{Result, Status};
use crate::select::PollEvents;

/// Operations implemented by each fd kind.
///
/// Only [`fd_type`](Self::fd_type) is required. The remaining defaults
/// either delegate to the generic readiness engine or report
/// [`Status::ObjectTypeMismatch`] for capabilities the kind lacks.
pub trait FdOps {
    /// Kind of descriptor reported to clients.
    fn fd_type(&self, fd: &Fd) -> FdType;

    /// The select loop saw `event` on the descriptor.
    fn poll_event(&self, fd: &Fd, event: PollEvents) {
        default_poll_event(fd, event)
    }

    /// Readiness bits the fd currently cares about.
    fn get_poll_events(&self, fd: &Fd) -> PollEvents {
        default_fd_get_poll_events(fd)
    }

    fn flush(&self, fd: &Fd) -> Result<()> {
        no_fd_flush(fd)
    }

    fn get_file_info(&self, fd: &Fd) -> Result<FileInfo> {
        no_fd_get_file_info(fd)
    }

    fn queue_async(
        &self,
        fd: &Fd,
        request: AsyncRequest,
        status: AsyncStatus,
        kind: AsyncKind,
        count: u32,
    ) -> Result<AsyncTransition> {
        no_fd_queue_async(fd, request, status, kind, count)
    }
}

/// Poll for input while reads are pending and for output while writes are.
pub fn default_fd_get_poll_events(fd: &Fd) -> PollEvents {
    let mut events = PollEvents::empty();

    if fd.async_queue(AsyncKind::Read).borrow().is_waiting() {
        events |= PollEvents::IN;
    }
    if fd.async_queue(AsyncKind::Write).borrow().is_waiting() {
        events |= PollEvents::OUT;
    }

    events
}

pub fn no_fd_flush(_fd: &Fd) -> Result<()> {
    Err(Status::ObjectTypeMismatch)
}

pub fn no_fd_get_file_info(_fd: &Fd) -> Result<FileInfo> {
    Err(Status::ObjectTypeMismatch)
}

pub fn no_fd_queue_async(
    _fd: &Fd,
    _request: AsyncRequest,
    _status: AsyncStatus,
    _kind: AsyncKind,
    _count: u32,
) -> Result<AsyncTransition> {
    Err(Status::ObjectTypeMismatch)
}
