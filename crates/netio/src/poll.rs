use std::io;
use std::os::unix::io::RawFd;

/// Upper bound on ready entries reported per wait.
pub const MAX_EVENTS: usize = 256;

/// A readiness multiplexer. The server loop is written against this trait
/// so a kqueue or completion-port backend could stand in for epoll.
pub trait Poller {
    /// Wait up to `timeout_ms` (-1 blocks indefinitely) and return the
    /// number of ready entries.
    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize>;

    fn descriptor(&self, index: usize) -> RawFd;
    fn is_readable(&self, index: usize) -> bool;
    fn is_writable(&self, index: usize) -> bool;
    fn has_errors(&self, index: usize) -> bool;

    fn add_readable(&mut self, fd: RawFd) -> io::Result<()>;
    fn add_writable(&mut self, fd: RawFd) -> io::Result<()>;
    fn add_duplex(&mut self, fd: RawFd) -> io::Result<()>;

    /// Re-arm the descriptor behind ready entry `index` for reads only.
    fn set_readable(&mut self, index: usize) -> io::Result<()>;
    /// Re-arm the descriptor behind ready entry `index` for writes only.
    fn set_writable(&mut self, index: usize) -> io::Result<()>;

    fn remove(&mut self, fd: RawFd) -> io::Result<()>;
}

/// The Linux epoll backend.
pub struct Epoll {
    fd: RawFd,
    events: Vec<libc::epoll_event>,
    ready: usize,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let fd = unsafe { libc::epoll_create1(0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Epoll {
            fd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
            ready: 0,
        })
    }

    fn control(&self, op: libc::c_int, fd: RawFd, flags: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: flags | (libc::EPOLLERR | libc::EPOLLHUP) as u32,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.fd, op, fd, &mut event) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn flags(&self, index: usize) -> u32 {
        if index >= self.ready {
            return 0;
        }
        self.events[index].events
    }
}

impl Poller for Epoll {
    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        let ready = unsafe {
            libc::epoll_wait(
                self.fd,
                self.events.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                timeout_ms,
            )
        };
        if ready == -1 {
            self.ready = 0;
            return Err(io::Error::last_os_error());
        }
        self.ready = ready as usize;
        Ok(self.ready)
    }

    fn descriptor(&self, index: usize) -> RawFd {
        if index >= self.ready {
            return -1;
        }
        self.events[index].u64 as RawFd
    }

    fn is_readable(&self, index: usize) -> bool {
        self.flags(index) & libc::EPOLLIN as u32 != 0
    }

    fn is_writable(&self, index: usize) -> bool {
        self.flags(index) & libc::EPOLLOUT as u32 != 0
    }

    fn has_errors(&self, index: usize) -> bool {
        self.flags(index) & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0
    }

    fn add_readable(&mut self, fd: RawFd) -> io::Result<()> {
        self.control(libc::EPOLL_CTL_ADD, fd, libc::EPOLLIN as u32)
    }

    fn add_writable(&mut self, fd: RawFd) -> io::Result<()> {
        self.control(libc::EPOLL_CTL_ADD, fd, libc::EPOLLOUT as u32)
    }

    fn add_duplex(&mut self, fd: RawFd) -> io::Result<()> {
        self.control(
            libc::EPOLL_CTL_ADD,
            fd,
            (libc::EPOLLIN | libc::EPOLLOUT) as u32,
        )
    }

    fn set_readable(&mut self, index: usize) -> io::Result<()> {
        self.control(
            libc::EPOLL_CTL_MOD,
            self.descriptor(index),
            libc::EPOLLIN as u32,
        )
    }

    fn set_writable(&mut self, index: usize) -> io::Result<()> {
        self.control(
            libc::EPOLL_CTL_MOD,
            self.descriptor(index),
            libc::EPOLLOUT as u32,
        )
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
