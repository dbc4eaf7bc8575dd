//! Regular files.
//!
//! A regular file is always ready: waits on it are satisfied at once, and
//! reads or writes queued on it complete as soon as they are registered.

use crate::error::{Result, Status};
use crate::fd::{
    AsyncKind, AsyncRequest, AsyncStatus, AsyncTransition, Fd, FdAttributes, FdOps, FdType,
    FileInfo, FileOptions, alloc_fd_object, default_fd_add_queue, default_fd_get_poll_events,
    default_fd_remove_queue, default_fd_signaled, fd_queue_async, reselect,
};
use crate::object::{Object, ObjectOps, WaitKey};
use crate::process::Access;
use crate::select::{PollEvents, PollSet, platform};

use std::fmt;
use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::rc::Rc;
use std::task::Waker;

struct FileObject;

impl ObjectOps for FileObject {
    fn type_name(&self) -> &'static str {
        "file"
    }

    fn dump(&self, obj: &Object, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match obj.fd() {
            Some(fd) => write!(f, "File {:?}", fd),
            None => f.write_str("File"),
        }
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

struct FileFd;

impl FdOps for FileFd {
    fn fd_type(&self, _fd: &Fd) -> FdType {
        FdType::File
    }

    fn get_poll_events(&self, fd: &Fd) -> PollEvents {
        let mut events = default_fd_get_poll_events(fd);

        if fd.access().contains(Access::READ_DATA) {
            events |= PollEvents::IN;
        }
        if fd.access().intersects(Access::WRITE_DATA | Access::APPEND_DATA) {
            events |= PollEvents::OUT;
        }

        events
    }

    fn flush(&self, fd: &Fd) -> Result<()> {
        platform::sys_fsync(fd.require_unix_fd()?)?;
        Ok(())
    }

    fn get_file_info(&self, fd: &Fd) -> Result<FileInfo> {
        let st = platform::sys_fstat(fd.require_unix_fd()?)?;
        Ok(FileInfo::from_stat(FdType::File, fd.flags(), &st))
    }

    fn queue_async(
        &self,
        fd: &Fd,
        request: AsyncRequest,
        status: AsyncStatus,
        kind: AsyncKind,
        count: u32,
    ) -> Result<AsyncTransition> {
        let transition = fd_queue_async(fd, request, status, kind, count);

        if kind != AsyncKind::Wait
            && matches!(transition, AsyncTransition::Queued | AsyncTransition::Updated)
        {
            fd.async_wake_up(kind, Status::Alerted);
            reselect(fd);
        }

        Ok(transition)
    }
}

/// Wraps an open regular file descriptor into a file object.
pub fn create_file(
    poll: &Rc<PollSet>,
    unix_fd: OwnedFd,
    access: Access,
    options: FileOptions,
) -> Result<Rc<Object>> {
    let attrs = FdAttributes {
        access,
        options,
        ..FdAttributes::default()
    };

    let obj = alloc_fd_object(poll, FileObject, FileFd, Some(unix_fd), attrs)?;
    if let Some(fd) = obj.fd() {
        fd.allow_caching();
    }

    Ok(obj)
}

/// Opens `path` with the data access requested in `access`.
pub fn open_file(
    poll: &Rc<PollSet>,
    path: &Path,
    access: Access,
    options: FileOptions,
) -> Result<Rc<Object>> {
    let read = access.contains(Access::READ_DATA);
    let write = access.intersects(Access::WRITE_DATA | Access::APPEND_DATA);

    let file = OpenOptions::new()
        .read(read || !write)
        .write(write)
        .open(path)?;

    create_file(poll, OwnedFd::from(file), access, options)
}
