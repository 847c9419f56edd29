//! Owned non-blocking TCP socket handle.
//!
//! Thin wrapper over the libc socket calls. Every socket produced here is in
//! non-blocking mode; "would block" results surface as
//! [`io::ErrorKind::WouldBlock`] and are handled by the update loop.

use crate::net::utils::{raw_to_socketaddr, socketaddr_to_raw};

use libc::{
    F_GETFL, F_SETFL, IPPROTO_TCP, O_NONBLOCK, SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET,
    TCP_NODELAY, c_int, c_void, fcntl, sockaddr, sockaddr_storage, socklen_t,
};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

#[derive(Debug)]
pub(crate) struct Socket {
    file_descriptor: RawFd,
}

impl Socket {
    /// Opens a non-blocking stream socket of the same family as `address`.
    pub(crate) fn new(address: &SocketAddr) -> io::Result<Self> {
        let domain = match address {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };

        let file_descriptor = cvt(unsafe { libc::socket(domain, SOCK_STREAM, 0) })?;
        let socket = Self { file_descriptor };
        socket.prepare()?;

        Ok(socket)
    }

    fn prepare(&self) -> io::Result<()> {
        self.set_nonblocking()?;

        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        self.setsockopt(SOL_SOCKET, libc::SO_NOSIGPIPE, 1 as c_int)?;

        Ok(())
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.file_descriptor
    }

    pub(crate) fn set_nonblocking(&self) -> io::Result<()> {
        let flags = cvt(unsafe { fcntl(self.file_descriptor, F_GETFL) })?;
        cvt(unsafe { fcntl(self.file_descriptor, F_SETFL, flags | O_NONBLOCK) })?;

        Ok(())
    }

    pub(crate) fn set_nodelay(&self, enabled: bool) -> io::Result<()> {
        self.setsockopt(IPPROTO_TCP, TCP_NODELAY, enabled as c_int)
    }

    pub(crate) fn set_reuse_address(&self) -> io::Result<()> {
        self.setsockopt(SOL_SOCKET, SO_REUSEADDR, 1 as c_int)
    }

    pub(crate) fn bind(&self, address: &SocketAddr) -> io::Result<()> {
        let (storage, length) = socketaddr_to_raw(address);
        cvt(unsafe {
            libc::bind(
                self.file_descriptor,
                &storage as *const sockaddr_storage as *const sockaddr,
                length,
            )
        })?;

        Ok(())
    }

    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        cvt(unsafe { libc::listen(self.file_descriptor, backlog) })?;
        Ok(())
    }

    /// Starts a non-blocking connect. An in-progress connect is a success;
    /// completion is detected later through write readiness.
    pub(crate) fn connect(&self, address: &SocketAddr) -> io::Result<()> {
        let (storage, length) = socketaddr_to_raw(address);
        let result = unsafe {
            libc::connect(
                self.file_descriptor,
                &storage as *const sockaddr_storage as *const sockaddr,
                length,
            )
        };

        if result == 0 {
            return Ok(());
        }

        let error = io::Error::last_os_error();
        match error.raw_os_error() {
            Some(libc::EINPROGRESS) | Some(libc::EINTR) => Ok(()),
            _ => Err(error),
        }
    }

    /// Accepts one pending connection, `Ok(None)` once the backlog is empty.
    pub(crate) fn accept(&self) -> io::Result<Option<(Socket, SocketAddr)>> {
        loop {
            let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
            let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

            let file_descriptor = unsafe {
                libc::accept(
                    self.file_descriptor,
                    &mut storage as *mut sockaddr_storage as *mut sockaddr,
                    &mut length,
                )
            };

            if file_descriptor < 0 {
                let error = io::Error::last_os_error();
                match error.kind() {
                    io::ErrorKind::WouldBlock => return Ok(None),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => continue,
                    _ => return Err(error),
                }
            }

            let socket = Socket { file_descriptor };
            socket.prepare()?;

            let peer = raw_to_socketaddr(&storage).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "unsupported peer address family")
            })?;

            return Ok(Some((socket, peer)));
        }
    }

    /// Reads and clears the pending socket error (`SO_ERROR`).
    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut value: c_int = 0;
        let mut length = mem::size_of::<c_int>() as socklen_t;

        cvt(unsafe {
            libc::getsockopt(
                self.file_descriptor,
                SOL_SOCKET,
                SO_ERROR,
                &mut value as *mut c_int as *mut c_void,
                &mut length,
            )
        })?;

        if value == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(value)))
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

        cvt(unsafe {
            libc::getsockname(
                self.file_descriptor,
                &mut storage as *mut sockaddr_storage as *mut sockaddr,
                &mut length,
            )
        })?;

        raw_to_socketaddr(&storage).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unsupported local address family")
        })
    }

    pub(crate) fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let result = unsafe {
            libc::recv(
                self.file_descriptor,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                0,
            )
        };

        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(result as usize)
    }

    pub(crate) fn send(&self, buffer: &[u8]) -> io::Result<usize> {
        let result = unsafe {
            libc::send(
                self.file_descriptor,
                buffer.as_ptr() as *const c_void,
                buffer.len(),
                SEND_FLAGS,
            )
        };

        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(result as usize)
    }

    fn setsockopt<T>(&self, level: c_int, name: c_int, value: T) -> io::Result<()> {
        cvt(unsafe {
            libc::setsockopt(
                self.file_descriptor,
                level,
                name,
                &value as *const T as *const c_void,
                mem::size_of::<T>() as socklen_t,
            )
        })?;

        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.file_descriptor);
        }
    }
}

fn cvt(result: c_int) -> io::Result<c_int> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}
