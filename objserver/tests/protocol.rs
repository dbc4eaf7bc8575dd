use objserver::fd::AsyncKind;
use objserver::protocol::{
    self, CloseHandleRequest, FlushFileRequest, GetHandleFdReply, GetHandleFdRequest,
    RegisterAsyncRequest, ReplyHeader, RequestCode, RequestHeader, SetHandleFdRequest,
};
use objserver::{Access, FdType, STATUS_SUCCESS, Server, Status};

use std::mem::size_of;

fn reply_header(reply: &[u8]) -> ReplyHeader {
    protocol::decode(&reply[..size_of::<ReplyHeader>()]).unwrap()
}

#[objserver::test]
fn request_encoding_carries_code_and_size() {
    let bytes = protocol::encode_request(&GetHandleFdRequest {
        handle: 4,
        access: 1,
    });

    let (header, body) = protocol::split_request(&bytes).unwrap();
    assert_eq!(header.req, RequestCode::GetHandleFd as u32);
    assert_eq!(header.request_size as usize, size_of::<GetHandleFdRequest>());
    assert_eq!(
        protocol::decode::<GetHandleFdRequest>(body).unwrap(),
        GetHandleFdRequest {
            handle: 4,
            access: 1,
        }
    );
}

#[objserver::test]
fn decode_requires_exact_size() {
    assert_eq!(
        protocol::decode::<FlushFileRequest>(&[0u8; 3]),
        Err(Status::InvalidParameter)
    );
    assert_eq!(
        protocol::decode::<FlushFileRequest>(&[0u8; 5]),
        Err(Status::InvalidParameter)
    );
}

#[objserver::test]
fn dispatch_reports_handler_errors_in_header() {
    let server = Server::builder().trace_requests(true).build();
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::all()).unwrap();

    let reply = server.dispatch(
        &process,
        &protocol::encode_request(&FlushFileRequest {
            handle: handle.raw(),
        }),
    );

    let header = reply_header(&reply);
    assert_eq!(header.error, Status::ObjectTypeMismatch.code());
    assert_eq!(header.reply_size, 0);
    assert_eq!(reply.len(), size_of::<ReplyHeader>());
    assert_eq!(protocol::split_reply(&reply), Err(Status::ObjectTypeMismatch));
}

#[objserver::test]
fn dispatch_returns_reply_body() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let path = std::env::temp_dir().join(format!("objserver-dispatch-{}", std::process::id()));
    std::fs::write(&path, b"").unwrap();
    let file = server
        .open_file(&path, Access::READ_DATA, Default::default())
        .unwrap();
    let handle = process.alloc_handle(&file, Access::READ_DATA).unwrap();

    let cached = server.dispatch(
        &process,
        &protocol::encode_request(&SetHandleFdRequest {
            handle: handle.raw(),
            fd: 17,
        }),
    );
    assert_eq!(reply_header(&cached).error, STATUS_SUCCESS);

    let reply = server.dispatch(
        &process,
        &protocol::encode_request(&GetHandleFdRequest {
            handle: handle.raw(),
            access: Access::READ_DATA.bits(),
        }),
    );

    let body = protocol::split_reply(&reply).unwrap();
    let reply: GetHandleFdReply = protocol::decode(body).unwrap();
    assert_eq!(reply.fd, 17);
    assert_eq!(reply.fd_type, FdType::File as u32);
    assert_eq!(reply.access, Access::READ_DATA.bits());

    let _ = std::fs::remove_file(path);
}

#[objserver::test]
fn dispatch_register_async_and_close() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::READ_DATA).unwrap();
    drop(read);

    let reply = server.dispatch(
        &process,
        &protocol::encode_request(&RegisterAsyncRequest {
            handle: handle.raw(),
            kind: AsyncKind::Read as u32,
            overlapped: 0x1234,
            status: Status::Pending.code(),
            count: 1,
        }),
    );
    assert_eq!(protocol::split_reply(&reply), Ok(&[][..]));

    let close = protocol::encode_request(&CloseHandleRequest {
        handle: handle.raw(),
    });
    assert_eq!(reply_header(&server.dispatch(&process, &close)).error, STATUS_SUCCESS);
    assert_eq!(process.handle_count(), 0);

    // The pending read was cancelled when the pipe end went away.
    let apcs = process.take_apcs();
    assert_eq!(apcs.len(), 1);
    assert_eq!(apcs[0].status, Status::Cancelled);

    assert_eq!(
        reply_header(&server.dispatch(&process, &close)).error,
        Status::InvalidHandle.code()
    );
}

#[objserver::test]
fn dispatch_rejects_malformed_messages() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let short = server.dispatch(&process, &[1, 0, 0]);
    assert_eq!(reply_header(&short).error, Status::InvalidParameter.code());

    let unknown = RequestHeader {
        req: 0xdead,
        request_size: 0,
    };
    let reply = server.dispatch(&process, bytemuck::bytes_of(&unknown));
    assert_eq!(reply_header(&reply).error, Status::InvalidParameter.code());

    let mut truncated = protocol::encode_request(&GetHandleFdRequest {
        handle: 4,
        access: 0,
    });
    truncated.pop();
    let reply = server.dispatch(&process, &truncated);
    assert_eq!(reply_header(&reply).error, Status::InvalidParameter.code());

    let wrong_body = RequestHeader {
        req: RequestCode::FlushFile as u32,
        request_size: 8,
    };
    let mut message = bytemuck::bytes_of(&wrong_body).to_vec();
    message.extend_from_slice(&[0u8; 8]);
    let reply = server.dispatch(&process, &message);
    assert_eq!(reply_header(&reply).error, Status::InvalidParameter.code());
}

#[objserver::test]
fn status_codes_round_trip_through_the_wire() {
    for status in [
        Status::ObjectTypeMismatch,
        Status::InvalidHandle,
        Status::AccessDenied,
        Status::NoMemory,
        Status::TooManyOpenedFiles,
    ] {
        assert_eq!(Status::from_code(status.code()), Some(status));
    }

    assert_eq!(Status::from_code(STATUS_SUCCESS), None);
    assert_eq!(Status::ObjectTypeMismatch.code(), 0xc000_0024);
}
