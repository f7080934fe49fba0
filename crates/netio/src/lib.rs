//! Non-blocking I/O primitives: sockets with status-code results, cursor
//! driven read buffering, write buffering, a readiness multiplexer
//! abstraction with an epoll backend, and timer/signal descriptors.

mod socket;
pub use socket::{Socket, MAXIMUM_PAYLOAD_SIZE};

mod reader;
pub use reader::Reader;

mod writer;
pub use writer::Writer;

mod poll;
pub use poll::{Epoll, Poller, MAX_EVENTS};

mod timer;
pub use timer::TimerFd;

mod signal;
pub use signal::SignalFd;

/// Outcome of one non-blocking transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No transfer attempted yet.
    Idle,
    /// The buffer was fully drained into the kernel.
    Success,
    /// The kernel has nothing more to give or take right now.
    Blocked,
    /// The call was interrupted by a signal.
    Interrupted,
    /// The peer closed the connection.
    Disconnect,
    /// The payload exceeded the maximum size.
    Overflow,
    /// Any other socket failure.
    Error,
}

/// A byte stream with non-blocking transfer semantics. `Socket` is the
/// real implementation; tests script one to drive the framing layer.
pub trait Stream {
    /// Drain the kernel into `payload` until it blocks.
    fn receive(&mut self, payload: &mut Vec<u8>) -> Status;

    /// Feed `payload` into the kernel until it blocks, draining the fed
    /// prefix from the front of the buffer.
    fn send(&mut self, payload: &mut Vec<u8>) -> Status;
}
