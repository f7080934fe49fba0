use std::io;
use std::mem;
use std::os::unix::io::RawFd;

/// A non-blocking descriptor delivering SIGINT, SIGTERM and SIGKILL as
/// readiness events. The signals are blocked for normal delivery so they
/// only arrive here. SIGKILL cannot actually be caught; requesting it is
/// best effort.
pub struct SignalFd {
    fd: RawFd,
}

impl SignalFd {
    pub fn new() -> io::Result<SignalFd> {
        unsafe {
            let mut set: libc::sigset_t = mem::zeroed();
            if libc::sigemptyset(&mut set) == -1 {
                return Err(io::Error::last_os_error());
            }
            for signal in [libc::SIGINT, libc::SIGTERM, libc::SIGKILL] {
                libc::sigaddset(&mut set, signal);
            }
            if libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) == -1 {
                return Err(io::Error::last_os_error());
            }
            let fd = libc::signalfd(-1, &set, libc::SFD_NONBLOCK);
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(SignalFd { fd })
        }
    }

    pub fn descriptor(&self) -> RawFd {
        self.fd
    }

    /// Consume one pending signal, returning its number.
    pub fn drain(&self) -> Option<i32> {
        let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
        let bytes = unsafe {
            libc::read(
                self.fd,
                &mut info as *mut _ as *mut libc::c_void,
                mem::size_of::<libc::signalfd_siginfo>(),
            )
        };
        if bytes == mem::size_of::<libc::signalfd_siginfo>() as isize {
            Some(info.ssi_signo as i32)
        } else {
            None
        }
    }

    pub fn is_termination(signal: i32) -> bool {
        signal == libc::SIGINT || signal == libc::SIGTERM || signal == libc::SIGKILL
    }
}

impl Drop for SignalFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
