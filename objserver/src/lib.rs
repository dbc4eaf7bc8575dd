//! # objserver
//!
//! **objserver** is the object and file-descriptor core of a process
//! synchronization broker: a single process that many clients talk to in
//! order to create, wait on and perform I/O through shared, kernel-like
//! objects.
//!
//! The crate provides:
//!
//! - A **reference-counted object model** with pluggable per-kind
//!   operations ([`ObjectOps`]) and waker-based wait queues
//! - **File descriptor objects** ([`Fd`]) pairing each object with the Unix
//!   descriptor it owns and its per-kind [`FdOps`]
//! - A **readiness engine** mapping waiters and pending asyncs onto
//!   level-triggered `poll(2)` interest
//! - A **select loop** ([`PollSet`]) with cancellable timeouts
//! - **Request handlers** and a fixed-size **wire protocol**, including
//!   descriptor hand-off over `SCM_RIGHTS`
//!
//! Everything runs on one thread. Objects are shared through `Rc` and are
//! `!Send`, so the compiler keeps the engine single-threaded.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use objserver::{Access, Server};
//!
//! let server = Server::builder().trace_requests(true).build();
//! let process = server.new_process(None, None)?;
//!
//! let (read, _write) = server.create_pipe()?;
//! let handle = process.alloc_handle(&read, Access::READ_DATA)?;
//!
//! let reply = server.dispatch(&process, &request_bytes);
//! ```
//!
//! ## Modules
//!
//! - [`fd`]: Fd objects, the readiness engine and async queues
//! - [`select`]: Poll table, timeouts and the select loop
//! - [`protocol`]: Request and reply wire structures
//! - [`kinds`]: Regular files and pipes

mod console;
mod error;
mod object;
mod process;
mod server;
mod transport;
mod utils;

pub mod fd;
pub mod kinds;
pub mod protocol;
pub mod select;

pub use console::{ConsoleSubsystem, NoConsole};
pub use error::{Result, STATUS_SUCCESS, Status};
pub use fd::{Fd, FdOps, FdType, alloc_fd_object, get_fd_user, get_unix_fd, set_unix_fd};
pub use object::{Object, ObjectOps, WaitKey, grab, release};
pub use process::{Access, AsyncCompletion, Handle, Process};
pub use select::{Interest, PollEvents, PollSet, TimeoutUser};
pub use server::{Server, ServerBuilder, ServerConfig};
pub use transport::{FdTransport, UnixTransport, receive_client_fd};

pub use objserver_macros::*;
