//! Descriptor hand-off to client processes.
//!
//! The readiness engine never touches ancillary-data sockets itself; the
//! `get_handle_fd` handler goes through an [`FdTransport`].

use crate::error::{Result, Status};
use crate::process::{Handle, Process};
use crate::select::platform;

use log::{debug, error};

use std::os::fd::{OwnedFd, RawFd};

/// Passes a descriptor to a client process.
pub trait FdTransport {
    /// Sends a duplicate of `fd` to `process`, tagged with `handle`.
    fn send_client_fd(&self, process: &Process, fd: RawFd, handle: Handle) -> Result<()>;
}

/// Sends descriptors as `SCM_RIGHTS` over the process channel socket.
///
/// The message data is the handle value, so the client can pair the
/// received descriptor with the handle it asked about.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixTransport;

impl FdTransport for UnixTransport {
    fn send_client_fd(&self, process: &Process, fd: RawFd, handle: Handle) -> Result<()> {
        let Some(channel) = process.channel_fd() else {
            error!("process {:04x} has no channel to receive fd {}", process.pid(), fd);
            return Err(Status::InvalidHandle);
        };

        match platform::sys_send_fd(channel, fd, handle.raw()) {
            Ok(()) => {
                debug!("sent fd {} for handle {} to process {:04x}", fd, handle, process.pid());
                Ok(())
            }
            Err(err) => {
                error!("failed to send fd {} to process {:04x}: {}", fd, process.pid(), err);
                Err(err.into())
            }
        }
    }
}

/// Client side of [`UnixTransport`]: receives one descriptor and the handle
/// it belongs to.
pub fn receive_client_fd(socket: RawFd) -> Result<(Handle, OwnedFd)> {
    let (handle, fd) = platform::sys_recv_fd(socket)?;
    Ok((Handle::from_raw(handle), fd))
}
