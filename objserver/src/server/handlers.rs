use super::Server;
use crate::error::{Result, Status};
use crate::fd::{
    AsyncKind, AsyncRequest, AsyncStatus, AsyncTransition, Fd, FdFlags, FdType, RequestId,
};
use crate::process::{Access, Handle, Process};
use crate::protocol::{
    self, CloseHandleRequest, FlushFileRequest, GetFileInfoReply, GetFileInfoRequest,
    GetHandleFdReply, GetHandleFdRequest, RegisterAsyncRequest, RequestCode, SetHandleFdRequest,
};

use log::trace;

use std::rc::Rc;

/// Resolves a handle to the fd of its object.
fn get_handle_fd_obj(process: &Process, handle: Handle, access: Access) -> Result<Rc<Fd>> {
    process
        .get_handle_obj(handle, access)?
        .get_fd()
        .ok_or(Status::ObjectTypeMismatch)
}

impl Server {
    /// Flushes buffered data of the file behind `handle`.
    pub fn flush_file(&self, process: &Rc<Process>, req: &FlushFileRequest) -> Result<()> {
        let fd = get_handle_fd_obj(process, Handle::from_raw(req.handle), Access::empty())?;
        fd.flush()
    }

    /// Gives the client access to the descriptor behind `handle`.
    ///
    /// If the client reported holding a descriptor for the handle, the reply
    /// names it. Otherwise the descriptor is passed through the transport
    /// and the reply carries `-1`. Console handles without an fd are
    /// reported as such, with no descriptor.
    pub fn get_handle_fd(
        &self,
        process: &Rc<Process>,
        req: &GetHandleFdRequest,
    ) -> Result<GetHandleFdReply> {
        let handle = Handle::from_raw(req.handle);
        let obj = process.get_handle_obj(handle, Access::from_bits_truncate(req.access))?;
        let access = process.get_handle_access(handle)?;

        let Some(fd) = obj.get_fd() else {
            if self.console.is_console_object(&obj) {
                return Ok(GetHandleFdReply {
                    fd: -1,
                    fd_type: FdType::Console as u32,
                    flags: FdFlags::empty().bits(),
                    cacheable: 0,
                    access: access.bits(),
                    options: 0,
                });
            }
            return Err(Status::ObjectTypeMismatch);
        };

        let unix_fd = fd.require_unix_fd()?;

        // Only cacheable descriptors may be served from the client's cache.
        let cached = process
            .cached_client_fd(handle)
            .filter(|_| fd.is_cacheable());

        let client_fd = match cached {
            Some(client_fd) => client_fd,
            None => {
                self.transport.send_client_fd(process, unix_fd, handle)?;
                -1
            }
        };

        Ok(GetHandleFdReply {
            fd: client_fd,
            fd_type: fd.fd_type() as u32,
            flags: fd.flags().bits(),
            cacheable: fd.is_cacheable() as u32,
            access: access.bits(),
            options: fd.options().bits(),
        })
    }

    pub fn get_file_info(
        &self,
        process: &Rc<Process>,
        req: &GetFileInfoRequest,
    ) -> Result<GetFileInfoReply> {
        let fd = get_handle_fd_obj(process, Handle::from_raw(req.handle), Access::empty())?;
        let info = fd.file_info()?;

        Ok(GetFileInfoReply {
            fd_type: info.fd_type as u32,
            flags: info.flags.bits(),
            attributes: info.attributes,
            links: info.links,
            size: info.size,
            device: info.device,
            index: info.index,
            access_time: info.access_time,
            write_time: info.write_time,
            change_time: info.change_time,
        })
    }

    /// Registers, refreshes or retires an async read or write.
    pub fn register_async(
        &self,
        process: &Rc<Process>,
        req: &RegisterAsyncRequest,
    ) -> Result<AsyncTransition> {
        let (kind, access) = match AsyncKind::from_u32(req.kind) {
            Some(AsyncKind::Read) => (AsyncKind::Read, Access::READ_DATA),
            Some(AsyncKind::Write) => (AsyncKind::Write, Access::WRITE_DATA),
            _ => return Err(Status::InvalidParameter),
        };

        let fd = get_handle_fd_obj(process, Handle::from_raw(req.handle), access)?;
        fd.require_unix_fd()?;

        let request = AsyncRequest::for_process(RequestId(req.overlapped), Rc::downgrade(process));
        fd.queue_async(request, AsyncStatus::from_code(req.status), kind, req.count)
    }

    /// Records the descriptor number the client holds for `handle`.
    ///
    /// Only cacheable fds may be cached; anything else has to go through
    /// the transport on every `get_handle_fd`.
    pub fn set_handle_fd(&self, process: &Rc<Process>, req: &SetHandleFdRequest) -> Result<()> {
        if req.fd < 0 {
            return Err(Status::InvalidParameter);
        }

        let handle = Handle::from_raw(req.handle);
        let fd = get_handle_fd_obj(process, handle, Access::empty())?;
        if !fd.is_cacheable() {
            return Err(Status::ObjectTypeMismatch);
        }
        process.set_cached_client_fd(handle, req.fd)
    }

    pub fn close_handle(&self, process: &Rc<Process>, req: &CloseHandleRequest) -> Result<()> {
        process.close_handle(Handle::from_raw(req.handle))
    }

    /// Decodes one request message, runs its handler and encodes the reply.
    pub fn dispatch(&self, process: &Rc<Process>, message: &[u8]) -> Vec<u8> {
        let result = self.handle_request(process, message);

        if self.config.trace_requests {
            match &result {
                Ok(body) => trace!("{:04x}: reply ok, {} bytes", process.pid(), body.len()),
                Err(status) => trace!("{:04x}: reply {}", process.pid(), status),
            }
        }

        protocol::encode_reply(result)
    }

    fn handle_request(&self, process: &Rc<Process>, message: &[u8]) -> Result<Vec<u8>> {
        let (header, body) = protocol::split_request(message)?;
        let code = RequestCode::from_u32(header.req).ok_or(Status::InvalidParameter)?;

        if self.config.trace_requests {
            trace!("{:04x}: {:?} ({} bytes)", process.pid(), code, body.len());
        }

        match code {
            RequestCode::FlushFile => {
                self.flush_file(process, &protocol::decode(body)?)?;
                Ok(Vec::new())
            }
            RequestCode::GetHandleFd => {
                let reply = self.get_handle_fd(process, &protocol::decode(body)?)?;
                Ok(bytemuck::bytes_of(&reply).to_vec())
            }
            RequestCode::GetFileInfo => {
                let reply = self.get_file_info(process, &protocol::decode(body)?)?;
                Ok(bytemuck::bytes_of(&reply).to_vec())
            }
            RequestCode::RegisterAsync => {
                self.register_async(process, &protocol::decode(body)?)?;
                Ok(Vec::new())
            }
            RequestCode::SetHandleFd => {
                self.set_handle_fd(process, &protocol::decode(body)?)?;
                Ok(Vec::new())
            }
            RequestCode::CloseHandle => {
                self.close_handle(process, &protocol::decode(body)?)?;
                Ok(Vec::new())
            }
        }
    }
}
