//! Anonymous pipes.

use crate::error::Result;
use crate::fd::{
    AsyncKind, AsyncRequest, AsyncStatus, AsyncTransition, Fd, FdAttributes, FdOps, FdType,
    FileInfo, FileOptions, alloc_fd_object, default_fd_add_queue, default_fd_get_poll_events,
    default_fd_remove_queue, default_fd_signaled, fd_queue_async,
};
use crate::object::{Object, ObjectOps, WaitKey};
use crate::process::Access;
use crate::select::{PollEvents, PollSet, platform};

use std::fmt;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::task::Waker;

/// Which end of a pipe an object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

impl PipeEnd {
    fn access(self) -> Access {
        let data = match self {
            PipeEnd::Read => Access::READ_DATA,
            PipeEnd::Write => Access::WRITE_DATA,
        };
        data | Access::READ_ATTRIBUTES | Access::SYNCHRONIZE
    }
}

struct PipeObject {
    end: PipeEnd,
}

impl ObjectOps for PipeObject {
    fn type_name(&self) -> &'static str {
        "pipe"
    }

    fn dump(&self, obj: &Object, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipe {:?} end", self.end)?;
        if let Some(fd) = obj.fd() {
            write!(f, " {:?}", fd)?;
        }
        Ok(())
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

struct PipeFd {
    end: PipeEnd,
}

impl FdOps for PipeFd {
    fn fd_type(&self, _fd: &Fd) -> FdType {
        FdType::Pipe
    }

    fn get_poll_events(&self, fd: &Fd) -> PollEvents {
        let own = match self.end {
            PipeEnd::Read => PollEvents::IN,
            PipeEnd::Write => PollEvents::OUT,
        };
        own | default_fd_get_poll_events(fd)
    }

    fn get_file_info(&self, fd: &Fd) -> Result<FileInfo> {
        let st = platform::sys_fstat(fd.require_unix_fd()?)?;
        Ok(FileInfo::from_stat(FdType::Pipe, fd.flags(), &st))
    }

    fn queue_async(
        &self,
        fd: &Fd,
        request: AsyncRequest,
        status: AsyncStatus,
        kind: AsyncKind,
        count: u32,
    ) -> Result<AsyncTransition> {
        Ok(fd_queue_async(fd, request, status, kind, count))
    }
}

/// Wraps one end of an existing pipe (or any stream descriptor behaving
/// like one) into a pipe object.
pub fn create_pipe_end(poll: &Rc<PollSet>, end: PipeEnd, unix_fd: OwnedFd) -> Result<Rc<Object>> {
    let attrs = FdAttributes {
        access: end.access(),
        options: FileOptions::empty(),
        ..FdAttributes::default()
    };

    alloc_fd_object(poll, PipeObject { end }, PipeFd { end }, Some(unix_fd), attrs)
}

/// Creates a non-blocking pipe and returns its `(read, write)` ends.
pub fn create_pipe(poll: &Rc<PollSet>) -> Result<(Rc<Object>, Rc<Object>)> {
    let (read, write) = platform::sys_pipe()?;

    let read = create_pipe_end(poll, PipeEnd::Read, read)?;
    let write = create_pipe_end(poll, PipeEnd::Write, write)?;

    Ok((read, write))
}
