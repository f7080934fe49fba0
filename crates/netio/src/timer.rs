use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// A non-blocking monotonic timer descriptor firing at a fixed period.
pub struct TimerFd {
    fd: RawFd,
}

impl TimerFd {
    pub fn new() -> io::Result<TimerFd> {
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(TimerFd { fd })
    }

    pub fn descriptor(&self) -> RawFd {
        self.fd
    }

    /// Arm the timer to fire every `period`, starting one period from now.
    pub fn schedule(&self, period: Duration) -> io::Result<()> {
        let spec = libc::timespec {
            tv_sec: period.as_secs() as libc::time_t,
            tv_nsec: period.subsec_nanos() as libc::c_long,
        };
        let schedule = libc::itimerspec {
            it_interval: spec,
            it_value: spec,
        };
        let rc = unsafe { libc::timerfd_settime(self.fd, 0, &schedule, std::ptr::null_mut()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Consume the pending expiration count. Returns false when nothing
    /// could be read.
    pub fn drain(&self) -> bool {
        let mut expirations: u64 = 0;
        let bytes = unsafe {
            libc::read(
                self.fd,
                &mut expirations as *mut _ as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        bytes == std::mem::size_of::<u64>() as isize
    }
}

impl Drop for TimerFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
