use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::RawFd;

use crate::{Status, Stream};

const RECEIVE_CHUNK: usize = 65536;
const SEND_CHUNK: usize = 65536;

/// Upper bound on a single buffered payload: 1 GiB.
pub const MAXIMUM_PAYLOAD_SIZE: usize = 1 << 30;

/// A TCP stream socket wrapping a raw descriptor. Transfers report status
/// codes rather than errors; the descriptor closes on drop.
pub struct Socket {
    fd: RawFd,
    listening: bool,
    connected: bool,
}

impl Socket {
    /// Open a listening socket with SO_REUSEADDR and a SOMAXCONN backlog.
    /// `service` is a decimal port; "0" asks the kernel for a free one.
    pub fn listen(host: &str, service: &str) -> io::Result<Socket> {
        let mut last = None;
        for addr in resolve(host, service)? {
            match listen_on(&addr) {
                Ok(fd) => {
                    return Ok(Socket {
                        fd,
                        listening: true,
                        connected: false,
                    })
                }
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(no_usable_address))
    }

    /// Connect to a remote listener. The connect itself is blocking; switch
    /// the socket to non-blocking afterwards for event-driven use.
    pub fn connect(host: &str, service: &str) -> io::Result<Socket> {
        let mut last = None;
        for addr in resolve(host, service)? {
            match connect_to(&addr) {
                Ok(fd) => {
                    return Ok(Socket {
                        fd,
                        listening: false,
                        connected: true,
                    })
                }
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(no_usable_address))
    }

    pub fn accept(&self) -> io::Result<Socket> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept(
                self.fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut length,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Socket {
            fd,
            listening: false,
            connected: true,
        })
    }

    pub fn descriptor(&self) -> RawFd {
        self.fd
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_non_blocking(&self) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL, 0) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// True when the kernel reports no pending error on the socket.
    pub fn is_good(&self) -> bool {
        let mut error: libc::c_int = 0;
        let mut length = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut error as *mut _ as *mut libc::c_void,
                &mut length,
            )
        };
        rc == 0 && error == 0
    }

    pub fn local_port(&self) -> io::Result<u16> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                self.fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut length,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let addr = unsafe { *(&storage as *const _ as *const libc::sockaddr_in) };
                Ok(u16::from_be(addr.sin_port))
            }
            libc::AF_INET6 => {
                let addr = unsafe { *(&storage as *const _ as *const libc::sockaddr_in6) };
                Ok(u16::from_be(addr.sin6_port))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "unknown socket address family",
            )),
        }
    }

    /// Block up to `timeout_ms` for the socket to become readable.
    pub fn wait_receive(&self, timeout_ms: i32) -> bool {
        self.wait(libc::POLLIN, timeout_ms)
    }

    /// Block up to `timeout_ms` for the socket to become writable.
    pub fn wait_send(&self, timeout_ms: i32) -> bool {
        self.wait(libc::POLLOUT, timeout_ms)
    }

    fn wait(&self, events: libc::c_short, timeout_ms: i32) -> bool {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: events | libc::POLLHUP | libc::POLLERR,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        ready > 0 && pollfd.revents & events != 0
    }

    pub fn close(&mut self) {
        if self.fd != -1 {
            unsafe { libc::close(self.fd) };
        }
        self.fd = -1;
        self.listening = false;
        self.connected = false;
    }

    fn receive_impl(&mut self, payload: &mut Vec<u8>) -> Status {
        let mut chunk = [0u8; RECEIVE_CHUNK];
        loop {
            let want = RECEIVE_CHUNK.min(MAXIMUM_PAYLOAD_SIZE - payload.len());
            let bytes =
                unsafe { libc::recv(self.fd, chunk.as_mut_ptr() as *mut libc::c_void, want, 0) };
            match bytes {
                -1 => return errno_status(),
                0 => return Status::Disconnect,
                n => {
                    payload.extend_from_slice(&chunk[..n as usize]);
                    if payload.len() >= MAXIMUM_PAYLOAD_SIZE {
                        return Status::Overflow;
                    }
                }
            }
        }
    }

    fn send_impl(&mut self, payload: &mut Vec<u8>) -> Status {
        if payload.len() > MAXIMUM_PAYLOAD_SIZE {
            return Status::Overflow;
        }
        loop {
            if payload.is_empty() {
                return Status::Success;
            }
            let want = SEND_CHUNK.min(payload.len());
            let bytes = unsafe {
                libc::send(
                    self.fd,
                    payload.as_ptr() as *const libc::c_void,
                    want,
                    libc::MSG_NOSIGNAL,
                )
            };
            match bytes {
                -1 => return errno_status(),
                0 => return Status::Error,
                n => {
                    payload.drain(..n as usize);
                }
            }
        }
    }
}

impl Stream for Socket {
    fn receive(&mut self, payload: &mut Vec<u8>) -> Status {
        self.receive_impl(payload)
    }

    fn send(&mut self, payload: &mut Vec<u8>) -> Status {
        self.send_impl(payload)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

fn errno_status() -> Status {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
        Status::Blocked
    } else if errno == libc::EINTR {
        Status::Interrupted
    } else {
        Status::Error
    }
}

fn resolve(host: &str, service: &str) -> io::Result<Vec<SocketAddr>> {
    let port: u16 = service
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "service must be a port number"))?;
    Ok((host, port).to_socket_addrs()?.collect())
}

fn no_usable_address() -> io::Error {
    io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable address")
}

fn listen_on(addr: &SocketAddr) -> io::Result<RawFd> {
    let fd = open_socket(addr)?;
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(close_with_error(fd));
    }
    let (storage, length) = sockaddr_of(addr);
    if unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, length) } == -1 {
        return Err(close_with_error(fd));
    }
    if unsafe { libc::listen(fd, libc::SOMAXCONN) } == -1 {
        return Err(close_with_error(fd));
    }
    Ok(fd)
}

fn connect_to(addr: &SocketAddr) -> io::Result<RawFd> {
    let fd = open_socket(addr)?;
    let (storage, length) = sockaddr_of(addr);
    if unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, length) } == -1 {
        return Err(close_with_error(fd));
    }
    Ok(fd)
}

fn open_socket(addr: &SocketAddr) -> io::Result<RawFd> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn close_with_error(fd: RawFd) -> io::Error {
    let error = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    error
}

fn sockaddr_of(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe { std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin) };
            (
                storage,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe { std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6) };
            (
                storage,
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }
}
