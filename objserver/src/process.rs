//! Client processes and their handle tables.

use crate::error::{Result, Status};
use crate::fd::RequestId;
use crate::object::Object;
use crate::utils::Slab;

use bitflags::bitflags;
use log::debug;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;

bitflags! {
    /// Access rights granted to a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Access: u32 {
        const READ_DATA = 0x0000_0001;
        const WRITE_DATA = 0x0000_0002;
        const APPEND_DATA = 0x0000_0004;
        const READ_ATTRIBUTES = 0x0000_0080;
        const WRITE_ATTRIBUTES = 0x0000_0100;
        const DELETE = 0x0001_0000;
        const SYNCHRONIZE = 0x0010_0000;
    }
}

/// A process-local handle value.
///
/// Valid handles are non-zero multiples of 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    fn from_index(index: usize) -> Self {
        Handle(((index as u32) + 1) << 2)
    }

    fn index(self) -> Option<usize> {
        if self.0 == 0 || self.0 & 3 != 0 {
            return None;
        }
        Some(((self.0 >> 2) - 1) as usize)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Notification queued for a client process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncCompletion {
    pub request: RequestId,
    pub status: Status,
}

struct HandleEntry {
    obj: Rc<Object>,
    access: Access,

    /// Descriptor number the client reported holding for this handle.
    client_fd: Option<RawFd>,
}

/// A client process as seen by the broker.
pub struct Process {
    pid: u32,
    handles: RefCell<Slab<HandleEntry>>,
    handle_limit: usize,
    apcs: RefCell<VecDeque<AsyncCompletion>>,
    channel: RefCell<Option<OwnedFd>>,
    console: Cell<Option<Handle>>,
}

impl Process {
    pub(crate) fn new(pid: u32, handle_limit: usize) -> Rc<Self> {
        Rc::new(Self {
            pid,
            handles: RefCell::new(Slab::new(handle_limit.min(32))),
            handle_limit,
            apcs: RefCell::new(VecDeque::new()),
            channel: RefCell::new(None),
            console: Cell::new(None),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Allocates a handle to `obj` with the given access.
    ///
    /// Fails with [`Status::TooManyOpenedFiles`] once the table is full.
    pub fn alloc_handle(&self, obj: &Rc<Object>, access: Access) -> Result<Handle> {
        let mut handles = self.handles.borrow_mut();
        if handles.len() >= self.handle_limit {
            return Err(Status::TooManyOpenedFiles);
        }

        let handle = Handle::from_index(handles.insert(HandleEntry {
            obj: obj.clone(),
            access,
            client_fd: None,
        }));

        debug!("process {:04x}: handle {} -> {}", self.pid, handle, obj.type_name());
        Ok(handle)
    }

    /// Resolves `handle`, checking that every bit of `access` was granted.
    pub fn get_handle_obj(&self, handle: Handle, access: Access) -> Result<Rc<Object>> {
        let handles = self.handles.borrow();
        let entry = handle
            .index()
            .and_then(|index| handles.get(index))
            .ok_or(Status::InvalidHandle)?;

        if !entry.access.contains(access) {
            return Err(Status::AccessDenied);
        }

        Ok(entry.obj.clone())
    }

    pub fn get_handle_access(&self, handle: Handle) -> Result<Access> {
        let handles = self.handles.borrow();
        handle
            .index()
            .and_then(|index| handles.get(index))
            .map(|entry| entry.access)
            .ok_or(Status::InvalidHandle)
    }

    /// Closes a handle, releasing its reference to the object.
    pub fn close_handle(&self, handle: Handle) -> Result<()> {
        let entry = handle
            .index()
            .and_then(|index| self.handles.borrow_mut().remove(index))
            .ok_or(Status::InvalidHandle)?;

        debug!("process {:04x}: closed handle {}", self.pid, handle);

        // The object may be destroyed here, outside the table borrow.
        drop(entry);
        Ok(())
    }

    pub fn handle_count(&self) -> usize {
        self.handles.borrow().len()
    }

    pub(crate) fn cached_client_fd(&self, handle: Handle) -> Option<RawFd> {
        let handles = self.handles.borrow();
        handle
            .index()
            .and_then(|index| handles.get(index))
            .and_then(|entry| entry.client_fd)
    }

    pub(crate) fn set_cached_client_fd(&self, handle: Handle, fd: RawFd) -> Result<()> {
        let mut handles = self.handles.borrow_mut();
        let entry = handle
            .index()
            .and_then(|index| handles.get_mut(index))
            .ok_or(Status::InvalidHandle)?;

        entry.client_fd = Some(fd);
        Ok(())
    }

    /// Installs the socket used to pass descriptors to this process.
    pub fn set_channel(&self, socket: OwnedFd) {
        *self.channel.borrow_mut() = Some(socket);
    }

    pub fn channel_fd(&self) -> Option<RawFd> {
        self.channel.borrow().as_ref().map(|fd| fd.as_raw_fd())
    }

    /// The console handle this process inherited, if any.
    pub fn console(&self) -> Option<Handle> {
        self.console.get()
    }

    pub(crate) fn set_console(&self, handle: Handle) {
        self.console.set(Some(handle));
    }

    pub fn queue_apc(&self, apc: AsyncCompletion) {
        self.apcs.borrow_mut().push_back(apc);
    }

    /// Drains the queued completions, oldest first.
    pub fn take_apcs(&self) -> Vec<AsyncCompletion> {
        self.apcs.borrow_mut().drain(..).collect()
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("handles", &self.handle_count())
            .field("apcs", &self.apcs.borrow().len())
            .finish()
    }
}
