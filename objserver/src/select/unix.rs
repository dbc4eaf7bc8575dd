use libc::{
    F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, SCM_RIGHTS, SOL_SOCKET, c_int,
    c_void, cmsghdr, fcntl, fstat, fsync, iovec, msghdr, nfds_t, pipe, poll, pollfd, recvmsg,
    sendmsg,
};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, mem, ptr};

/// Converts an optional timeout into the millisecond argument of `poll(2)`.
///
/// `None` means "block forever". Sub-millisecond remainders are rounded
/// up so a pending timeout never turns into a zero-timeout busy loop.
pub(crate) fn poll_timeout_ms(timeout: Option<Duration>) -> c_int {
    match timeout {
        None => -1,
        Some(timeout) => timeout
            .as_nanos()
            .div_ceil(1_000_000)
            .min(c_int::MAX as u128) as c_int,
    }
}

/// Polls the given descriptors.
///
/// Returns the number of entries with non-zero `revents`. An interrupted
/// call reports zero ready descriptors instead of an error.
pub(crate) fn sys_poll(fds: &mut [pollfd], timeout_ms: c_int) -> io::Result<usize> {
    let rc = unsafe { poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms) };

    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(rc as usize)
}

/// Returns the `stat` of an open descriptor.
pub(crate) fn sys_fstat(fd: RawFd) -> io::Result<libc::stat> {
    let mut st: libc::stat = unsafe { mem::zeroed() };

    let rc = unsafe { fstat(fd, &mut st) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(st)
    }
}

/// Flushes a descriptor's data to stable storage.
pub(crate) fn sys_fsync(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { fsync(fd) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Marks a file descriptor close-on-exec.
pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking, close-on-exec pipe.
///
/// Returns `(read_end, write_end)`.
pub(crate) fn sys_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1; 2];

    let rc = unsafe { pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe(2) succeeded, both descriptors are fresh and owned here.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    for fd in [fds[0], fds[1]] {
        sys_set_nonblocking(fd)?;
        sys_set_cloexec(fd)?;
    }

    Ok((read, write))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

/// Control buffer large enough for one `SCM_RIGHTS` descriptor, aligned for
/// `cmsghdr`.
fn control_buffer() -> Vec<u64> {
    let space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    vec![0u64; space.div_ceil(mem::size_of::<u64>())]
}

/// Sends `data` over a Unix socket with `fd` attached as `SCM_RIGHTS`
/// ancillary data.
pub(crate) fn sys_send_fd(socket: RawFd, fd: RawFd, data: u32) -> io::Result<()> {
    let mut payload = data.to_ne_bytes();
    let mut iov = iovec {
        iov_base: payload.as_mut_ptr() as *mut c_void,
        iov_len: payload.len(),
    };

    let mut control = control_buffer();

    let mut msg: msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut c_void;
    msg.msg_controllen = (control.len() * mem::size_of::<u64>()) as _;

    unsafe {
        let cmsg: *mut cmsghdr = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = SOL_SOCKET;
        (*cmsg).cmsg_type = SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
        ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);
        msg.msg_controllen = (*cmsg).cmsg_len as _;
    }

    loop {
        let rc = unsafe { sendmsg(socket, &msg, SEND_FLAGS) };
        if rc >= 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Receives the message produced by [`sys_send_fd`].
///
/// Returns the data word and the attached descriptor.
pub(crate) fn sys_recv_fd(socket: RawFd) -> io::Result<(u32, OwnedFd)> {
    let mut payload = [0u8; 4];
    let mut iov = iovec {
        iov_base: payload.as_mut_ptr() as *mut c_void,
        iov_len: payload.len(),
    };

    let mut control = control_buffer();

    let mut msg: msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut c_void;
    msg.msg_controllen = (control.len() * mem::size_of::<u64>()) as _;

    let received = loop {
        let rc = unsafe { recvmsg(socket, &mut msg, 0) };
        if rc >= 0 {
            break rc as usize;
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    if received < payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short descriptor message",
        ));
    }

    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    while !cmsg.is_null() {
        let (level, kind) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type) };

        if level == SOL_SOCKET && kind == SCM_RIGHTS {
            let fd = unsafe { ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const RawFd) };
            // SAFETY: the kernel installed a fresh descriptor for us.
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            return Ok((u32::from_ne_bytes(payload), fd));
        }

        cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "message carried no descriptor",
    ))
}
