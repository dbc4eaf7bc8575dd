mod common;

use common::{fd_of, raw_pipe, temp_path, writers_closed};
use objserver::fd::{AsyncKind, AsyncTransition, FdAttributes, FileOptions, attributes};
use objserver::kinds::pipe::{PipeEnd, create_pipe_end};
use objserver::protocol::{
    CloseHandleRequest, FlushFileRequest, GetFileInfoRequest, GetHandleFdRequest,
    RegisterAsyncRequest, SetHandleFdRequest,
};
use objserver::{
    Access, ConsoleSubsystem, FdTransport, FdType, Handle, Interest, Object, ObjectOps,
    PollEvents, Process, Result, Server, Status, alloc_fd_object,
};

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;

struct ConsoleObject;

impl ObjectOps for ConsoleObject {
    fn type_name(&self) -> &'static str {
        "console"
    }
}

struct Plain;

impl ObjectOps for Plain {
    fn type_name(&self) -> &'static str {
        "plain"
    }
}

#[derive(Clone, Default)]
struct TestConsole {
    inherited: Rc<RefCell<Vec<(u32, u32, Handle)>>>,
    refuse: bool,
}

impl ConsoleSubsystem for TestConsole {
    fn is_console_object(&self, obj: &Object) -> bool {
        obj.type_name() == "console"
    }

    fn inherit_console(&self, parent: &Process, process: &Process, handle: Handle) -> Result<()> {
        if self.refuse {
            return Err(Status::AccessDenied);
        }
        self.inherited
            .borrow_mut()
            .push((parent.pid(), process.pid(), handle));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Rc<RefCell<Vec<(RawFd, Handle)>>>,
}

impl FdTransport for RecordingTransport {
    fn send_client_fd(&self, _process: &Process, fd: RawFd, handle: Handle) -> Result<()> {
        self.sent.borrow_mut().push((fd, handle));
        Ok(())
    }
}

fn server_with(transport: &RecordingTransport) -> Server {
    Server::builder()
        .console(TestConsole::default())
        .transport(transport.clone())
        .build()
}

#[objserver::test]
fn console_handle_without_fd_reports_console_type() {
    let server = server_with(&RecordingTransport::default());
    let process = server.new_process(None, None).unwrap();

    let console = Object::new(ConsoleObject);
    let handle = process.alloc_handle(&console, Access::READ_DATA).unwrap();

    let reply = server
        .get_handle_fd(
            &process,
            &GetHandleFdRequest {
                handle: handle.raw(),
                access: 0,
            },
        )
        .unwrap();

    assert_eq!(reply.fd, -1);
    assert_eq!(reply.fd_type, FdType::Console as u32);
}

#[objserver::test]
fn handle_without_fd_is_type_mismatch() {
    let server = server_with(&RecordingTransport::default());
    let process = server.new_process(None, None).unwrap();

    let handle = process
        .alloc_handle(&Object::new(Plain), Access::all())
        .unwrap();

    let request = GetHandleFdRequest {
        handle: handle.raw(),
        access: 0,
    };
    assert_eq!(
        server.get_handle_fd(&process, &request).err(),
        Some(Status::ObjectTypeMismatch)
    );
    assert_eq!(
        server
            .flush_file(&process, &FlushFileRequest { handle: handle.raw() })
            .err(),
        Some(Status::ObjectTypeMismatch)
    );
}

#[objserver::test]
fn flush_on_pipe_is_type_mismatch_and_changes_nothing() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::all()).unwrap();
    let fd = fd_of(&read);
    let bound = fd.unix_fd();

    let result = server.flush_file(&process, &FlushFileRequest { handle: handle.raw() });

    assert_eq!(result, Err(Status::ObjectTypeMismatch));
    assert_eq!(fd.interest(), Interest::Idle);
    assert_eq!(fd.unix_fd(), bound);
    assert!(bound.is_some());
}

#[objserver::test]
fn flush_on_regular_file_succeeds() {
    let path = temp_path("flush");
    std::fs::write(&path, b"").unwrap();

    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();
    let file = server
        .open_file(&path, Access::WRITE_DATA, Default::default())
        .unwrap();
    let handle = process.alloc_handle(&file, Access::WRITE_DATA).unwrap();

    assert_eq!(
        server.flush_file(&process, &FlushFileRequest { handle: handle.raw() }),
        Ok(())
    );

    let _ = std::fs::remove_file(path);
}

#[objserver::test]
fn file_info_of_regular_file() {
    let path = temp_path("info");
    std::fs::write(&path, b"hello world").unwrap();

    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();
    let file = server
        .open_file(&path, Access::READ_DATA, Default::default())
        .unwrap();
    let handle = process.alloc_handle(&file, Access::READ_DATA).unwrap();

    let info = server
        .get_file_info(&process, &GetFileInfoRequest { handle: handle.raw() })
        .unwrap();

    assert_eq!(info.fd_type, FdType::File as u32);
    assert_eq!(info.size, 11);
    assert_eq!(info.links, 1);
    assert_ne!(info.attributes & attributes::ARCHIVE, 0);
    assert_eq!(info.attributes & attributes::DIRECTORY, 0);

    let _ = std::fs::remove_file(path);
}

#[objserver::test]
fn file_info_of_pipe() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let (_read, write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&write, Access::all()).unwrap();

    let info = server
        .get_file_info(&process, &GetFileInfoRequest { handle: handle.raw() })
        .unwrap();
    assert_eq!(info.fd_type, FdType::Pipe as u32);
}

#[objserver::test]
fn get_handle_fd_passes_descriptor_until_client_caches_it() {
    let transport = RecordingTransport::default();
    let server = server_with(&transport);
    let process = server.new_process(None, None).unwrap();

    let path = temp_path("cache");
    std::fs::write(&path, b"").unwrap();
    let file = server
        .open_file(&path, Access::READ_DATA, FileOptions::WRITE_THROUGH)
        .unwrap();
    let handle = process
        .alloc_handle(&file, Access::READ_DATA | Access::SYNCHRONIZE)
        .unwrap();
    let request = GetHandleFdRequest {
        handle: handle.raw(),
        access: Access::READ_DATA.bits(),
    };

    let reply = server.get_handle_fd(&process, &request).unwrap();
    assert_eq!(reply.fd, -1);
    assert_eq!(reply.fd_type, FdType::File as u32);
    assert_eq!(reply.cacheable, 1);
    assert_eq!(reply.access, (Access::READ_DATA | Access::SYNCHRONIZE).bits());
    assert_eq!(reply.options, FileOptions::WRITE_THROUGH.bits());
    assert_eq!(*transport.sent.borrow(), vec![(fd_of(&file).unix_fd().unwrap(), handle)]);

    server
        .set_handle_fd(
            &process,
            &SetHandleFdRequest {
                handle: handle.raw(),
                fd: 42,
            },
        )
        .unwrap();

    let reply = server.get_handle_fd(&process, &request).unwrap();
    assert_eq!(reply.fd, 42);
    assert_eq!(transport.sent.borrow().len(), 1);

    let _ = std::fs::remove_file(path);
}

#[objserver::test]
fn pipe_descriptors_are_never_served_from_client_cache() {
    let transport = RecordingTransport::default();
    let server = server_with(&transport);
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::READ_DATA).unwrap();

    assert_eq!(
        server.set_handle_fd(
            &process,
            &SetHandleFdRequest {
                handle: handle.raw(),
                fd: 99,
            },
        ),
        Err(Status::ObjectTypeMismatch)
    );

    let request = GetHandleFdRequest {
        handle: handle.raw(),
        access: Access::READ_DATA.bits(),
    };
    for _ in 0..2 {
        let reply = server.get_handle_fd(&process, &request).unwrap();
        assert_eq!(reply.fd, -1);
        assert_eq!(reply.cacheable, 0);
    }
    assert_eq!(transport.sent.borrow().len(), 2);
}

#[objserver::test]
fn get_handle_fd_checks_access() {
    let server = server_with(&RecordingTransport::default());
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::READ_DATA).unwrap();

    let request = GetHandleFdRequest {
        handle: handle.raw(),
        access: Access::WRITE_DATA.bits(),
    };
    assert_eq!(
        server.get_handle_fd(&process, &request).err(),
        Some(Status::AccessDenied)
    );

    let request = GetHandleFdRequest {
        handle: 0x400,
        access: 0,
    };
    assert_eq!(
        server.get_handle_fd(&process, &request).err(),
        Some(Status::InvalidHandle)
    );
}

#[objserver::test]
fn get_handle_fd_on_unbound_fd_reports_no_fd_status() {
    let server = server_with(&RecordingTransport::default());
    let process = server.new_process(None, None).unwrap();

    let obj = alloc_fd_object(
        server.poll(),
        common::Waitable,
        common::ReadableFd,
        None,
        FdAttributes::default(),
    )
    .unwrap();
    let handle = process.alloc_handle(&obj, Access::all()).unwrap();

    let request = GetHandleFdRequest {
        handle: handle.raw(),
        access: 0,
    };
    assert_eq!(
        server.get_handle_fd(&process, &request).err(),
        Some(Status::BadDeviceType)
    );
}

#[objserver::test]
fn register_async_validates_kind_access_and_binding() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::READ_DATA).unwrap();

    let mut request = RegisterAsyncRequest {
        handle: handle.raw(),
        kind: AsyncKind::Wait as u32,
        overlapped: 0x7000,
        status: Status::Pending.code(),
        count: 0,
    };
    assert_eq!(
        server.register_async(&process, &request),
        Err(Status::InvalidParameter)
    );

    request.kind = AsyncKind::Write as u32;
    assert_eq!(
        server.register_async(&process, &request),
        Err(Status::AccessDenied)
    );

    let unbound = alloc_fd_object(
        server.poll(),
        common::Waitable,
        common::ReadableFd,
        None,
        FdAttributes::default(),
    )
    .unwrap();
    let unbound = process.alloc_handle(&unbound, Access::all()).unwrap();
    request.handle = unbound.raw();
    request.kind = AsyncKind::Read as u32;
    assert_eq!(
        server.register_async(&process, &request),
        Err(Status::BadDeviceType)
    );
}

#[objserver::test]
fn register_async_queues_and_retires() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::READ_DATA).unwrap();
    let fd = fd_of(&read);

    let mut request = RegisterAsyncRequest {
        handle: handle.raw(),
        kind: AsyncKind::Read as u32,
        overlapped: 0x7000,
        status: Status::Pending.code(),
        count: 64,
    };
    assert_eq!(
        server.register_async(&process, &request),
        Ok(AsyncTransition::Queued)
    );
    assert_eq!(fd.interest(), Interest::Watch(PollEvents::IN));

    request.status = 0;
    assert_eq!(
        server.register_async(&process, &request),
        Ok(AsyncTransition::Removed)
    );
    assert_eq!(fd.async_queue(AsyncKind::Read).borrow().len(), 0);
    assert_eq!(fd.interest(), Interest::Idle);
}

#[objserver::test]
fn closing_last_handle_destroys_object() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let (read, write) = raw_pipe();
    let obj = create_pipe_end(server.poll(), PipeEnd::Write, write).unwrap();
    let handle = process.alloc_handle(&obj, Access::WRITE_DATA).unwrap();
    drop(obj);

    assert!(!writers_closed(&read));

    let request = CloseHandleRequest { handle: handle.raw() };
    assert_eq!(server.close_handle(&process, &request), Ok(()));
    assert!(writers_closed(&read));

    assert_eq!(
        server.close_handle(&process, &request),
        Err(Status::InvalidHandle)
    );
}

#[objserver::test]
fn set_handle_fd_rejects_bad_input() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let (read, _write) = server.create_pipe().unwrap();
    let handle = process.alloc_handle(&read, Access::READ_DATA).unwrap();

    let negative = SetHandleFdRequest {
        handle: handle.raw(),
        fd: -1,
    };
    assert_eq!(
        server.set_handle_fd(&process, &negative),
        Err(Status::InvalidParameter)
    );

    let unknown = SetHandleFdRequest { handle: 0x40, fd: 3 };
    assert_eq!(
        server.set_handle_fd(&process, &unknown),
        Err(Status::InvalidHandle)
    );
}

#[objserver::test]
fn handles_are_small_multiples_of_four() {
    let server = Server::builder().handle_limit(2).build();
    let process = server.new_process(None, None).unwrap();

    let obj = Object::new(Plain);
    let first = process.alloc_handle(&obj, Access::all()).unwrap();
    let second = process.alloc_handle(&obj, Access::all()).unwrap();

    assert_eq!(first.raw(), 4);
    assert_eq!(second.raw(), 8);
    assert_eq!(
        process.alloc_handle(&obj, Access::all()).err(),
        Some(Status::TooManyOpenedFiles)
    );

    process.close_handle(first).unwrap();
    assert_eq!(process.alloc_handle(&obj, Access::all()).unwrap().raw(), 4);
}

#[objserver::test]
fn freed_handles_are_reused_lowest_first() {
    let server = Server::builder().build();
    let process = server.new_process(None, None).unwrap();

    let obj = Object::new(Plain);
    let handles: Vec<_> = (0..3)
        .map(|_| process.alloc_handle(&obj, Access::all()).unwrap())
        .collect();
    assert_eq!(handles.iter().map(|h| h.raw()).collect::<Vec<_>>(), [4, 8, 12]);

    process.close_handle(handles[0]).unwrap();
    process.close_handle(handles[2]).unwrap();

    assert_eq!(process.alloc_handle(&obj, Access::all()).unwrap().raw(), 4);
    assert_eq!(process.alloc_handle(&obj, Access::all()).unwrap().raw(), 12);
    assert_eq!(process.alloc_handle(&obj, Access::all()).unwrap().raw(), 16);
}

#[objserver::test]
fn new_process_inherits_console_through_subsystem() {
    let console = TestConsole::default();
    let server = Server::builder().console(console.clone()).build();

    let parent = server.new_process(None, None).unwrap();
    let console_obj = Object::new(ConsoleObject);
    let console_handle = parent.alloc_handle(&console_obj, Access::all()).unwrap();

    let child = server
        .new_process(Some(&parent), Some(console_handle))
        .unwrap();

    assert_eq!(child.console(), Some(console_handle));
    assert_eq!(
        *console.inherited.borrow(),
        vec![(parent.pid(), child.pid(), console_handle)]
    );
    assert_ne!(parent.pid(), child.pid());
}

#[objserver::test]
fn refused_console_inheritance_fails_process_creation() {
    let console = TestConsole {
        refuse: true,
        ..TestConsole::default()
    };
    let server = Server::builder().console(console).build();

    let parent = server.new_process(None, None).unwrap();
    let result = server.new_process(Some(&parent), Some(Handle::from_raw(4)));

    assert_eq!(result.err(), Some(Status::AccessDenied));
}
