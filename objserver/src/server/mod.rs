//! The broker: processes, the poll table and request dispatch.

mod builder;
mod handlers;

pub use builder::ServerBuilder;

use crate::console::ConsoleSubsystem;
use crate::error::Result;
use crate::fd::FileOptions;
use crate::kinds::{file, pipe};
use crate::object::Object;
use crate::process::{Access, Handle, Process};
use crate::select::PollSet;
use crate::transport::FdTransport;

use log::debug;

use std::cell::Cell;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// Tunables of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub max_poll_users: usize,
    pub handle_limit: usize,
    pub trace_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_poll_users: 4096,
            handle_limit: 1024,
            trace_requests: false,
        }
    }
}

/// The object broker.
///
/// Owns the poll table every fd registers with and the collaborators the
/// request handlers consult. A `Server` and everything it creates stay on
/// one thread.
pub struct Server {
    config: ServerConfig,
    poll: Rc<PollSet>,
    console: Box<dyn ConsoleSubsystem>,
    transport: Box<dyn FdTransport>,
    next_pid: Cell<u32>,
}

impl Server {
    fn new(
        config: ServerConfig,
        console: Box<dyn ConsoleSubsystem>,
        transport: Box<dyn FdTransport>,
    ) -> Self {
        Self {
            poll: PollSet::new(config.max_poll_users),
            config,
            console,
            transport,
            next_pid: Cell::new(0x20),
        }
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The poll table shared by every fd of this server.
    pub fn poll(&self) -> &Rc<PollSet> {
        &self.poll
    }

    /// Creates a client process.
    ///
    /// When both a parent and a console handle are given, the console
    /// subsystem decides whether the child may share it.
    pub fn new_process(
        &self,
        parent: Option<&Process>,
        console: Option<Handle>,
    ) -> Result<Rc<Process>> {
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 4);

        let process = Process::new(pid, self.config.handle_limit);

        if let (Some(parent), Some(handle)) = (parent, console) {
            self.console.inherit_console(parent, &process, handle)?;
            process.set_console(handle);
        }

        debug!("created process {:04x}", pid);
        Ok(process)
    }

    /// Opens a regular file.
    pub fn open_file(
        &self,
        path: impl AsRef<Path>,
        access: Access,
        options: FileOptions,
    ) -> Result<Rc<Object>> {
        file::open_file(&self.poll, path.as_ref(), access, options)
    }

    /// Creates a pipe and returns its `(read, write)` ends.
    pub fn create_pipe(&self) -> Result<(Rc<Object>, Rc<Object>)> {
        pipe::create_pipe(&self.poll)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("poll", &self.poll)
            .finish()
    }
}
