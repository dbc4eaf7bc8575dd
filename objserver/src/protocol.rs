//! Wire format of fd requests.
//!
//! A request is a [`RequestHeader`] followed by exactly `request_size` bytes
//! of body; a reply is a [`ReplyHeader`] followed by `reply_size` bytes.
//! Bodies are fixed-size `#[repr(C)]` structs in native byte order, read and
//! written with `bytemuck`.

use crate::error::{Result, STATUS_SUCCESS, Status};

use bytemuck::{Pod, Zeroable};

use std::mem::size_of;

/// Request numbers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    FlushFile = 1,
    GetHandleFd = 2,
    GetFileInfo = 3,
    RegisterAsync = 4,
    SetHandleFd = 5,
    CloseHandle = 6,
}

impl RequestCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => RequestCode::FlushFile,
            2 => RequestCode::GetHandleFd,
            3 => RequestCode::GetFileInfo,
            4 => RequestCode::RegisterAsync,
            5 => RequestCode::SetHandleFd,
            6 => RequestCode::CloseHandle,
            _ => return None,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RequestHeader {
    pub req: u32,
    pub request_size: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ReplyHeader {
    /// [`STATUS_SUCCESS`] or a [`Status`] code.
    pub error: u32,
    pub reply_size: u32,
}

/// A request body, tied to its request number.
pub trait Request: Pod {
    const CODE: RequestCode;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FlushFileRequest {
    pub handle: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GetHandleFdRequest {
    pub handle: u32,
    pub access: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GetHandleFdReply {
    /// Descriptor the client already holds for the handle, or -1 when it
    /// was passed over the channel (or there is none).
    pub fd: i32,
    pub fd_type: u32,
    pub flags: u32,
    pub cacheable: u32,

    /// Access granted to the handle.
    pub access: u32,

    /// Open options of the fd.
    pub options: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GetFileInfoRequest {
    pub handle: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GetFileInfoReply {
    pub fd_type: u32,
    pub flags: u32,
    pub attributes: u32,
    pub links: u32,
    pub size: u64,
    pub device: u64,
    pub index: u64,
    pub access_time: i64,
    pub write_time: i64,
    pub change_time: i64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RegisterAsyncRequest {
    pub handle: u32,
    pub kind: u32,
    /// Client address of the overlapped structure; identifies the request.
    pub overlapped: u64,
    pub status: u32,
    pub count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SetHandleFdRequest {
    pub handle: u32,
    pub fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CloseHandleRequest {
    pub handle: u32,
}

impl Request for FlushFileRequest {
    const CODE: RequestCode = RequestCode::FlushFile;
}

impl Request for GetHandleFdRequest {
    const CODE: RequestCode = RequestCode::GetHandleFd;
}

impl Request for GetFileInfoRequest {
    const CODE: RequestCode = RequestCode::GetFileInfo;
}

impl Request for RegisterAsyncRequest {
    const CODE: RequestCode = RequestCode::RegisterAsync;
}

impl Request for SetHandleFdRequest {
    const CODE: RequestCode = RequestCode::SetHandleFd;
}

impl Request for CloseHandleRequest {
    const CODE: RequestCode = RequestCode::CloseHandle;
}

/// Reads a fixed-size body. The slice must be exactly `size_of::<T>()`.
pub fn decode<T: Pod>(bytes: &[u8]) -> Result<T> {
    if bytes.len() != size_of::<T>() {
        return Err(Status::InvalidParameter);
    }

    bytemuck::try_pod_read_unaligned(bytes).map_err(|_| Status::InvalidParameter)
}

/// Encodes a complete request message.
pub fn encode_request<R: Request>(request: &R) -> Vec<u8> {
    let header = RequestHeader {
        req: R::CODE as u32,
        request_size: size_of::<R>() as u32,
    };

    let mut out = Vec::with_capacity(size_of::<RequestHeader>() + size_of::<R>());
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(bytemuck::bytes_of(request));
    out
}

/// Splits a request message into its header and body.
pub fn split_request(bytes: &[u8]) -> Result<(RequestHeader, &[u8])> {
    let header_len = size_of::<RequestHeader>();
    if bytes.len() < header_len {
        return Err(Status::InvalidParameter);
    }

    let header: RequestHeader = decode(&bytes[..header_len])?;
    let body = &bytes[header_len..];
    if body.len() != header.request_size as usize {
        return Err(Status::InvalidParameter);
    }

    Ok((header, body))
}

/// Encodes a reply message from a handler outcome.
///
/// Errors carry no body.
pub fn encode_reply(result: Result<Vec<u8>>) -> Vec<u8> {
    let (error, body) = match result {
        Ok(body) => (STATUS_SUCCESS, body),
        Err(status) => (status.code(), Vec::new()),
    };

    let header = ReplyHeader {
        error,
        reply_size: body.len() as u32,
    };

    let mut out = Vec::with_capacity(size_of::<ReplyHeader>() + body.len());
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(&body);
    out
}

/// Splits a reply message, turning an error header into `Err`.
pub fn split_reply(bytes: &[u8]) -> Result<&[u8]> {
    let header_len = size_of::<ReplyHeader>();
    if bytes.len() < header_len {
        return Err(Status::InvalidParameter);
    }

    let header: ReplyHeader = decode(&bytes[..header_len])?;
    if header.error != STATUS_SUCCESS {
        return Err(Status::from_code(header.error).unwrap_or(Status::Unsuccessful));
    }

    let body = &bytes[header_len..];
    if body.len() != header.reply_size as usize {
        return Err(Status::InvalidParameter);
    }

    Ok(body)
}
