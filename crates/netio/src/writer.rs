use crate::{Status, Stream};

/// A send buffer drained non-blockingly from the front.
pub struct Writer {
    buffer: Vec<u8>,
    status: Status,
}

impl Default for Writer {
    fn default() -> Self {
        Writer::new()
    }
}

impl Writer {
    pub fn new() -> Writer {
        Writer {
            buffer: Vec::new(),
            status: Status::Idle,
        }
    }

    pub fn write(&mut self, payload: &[u8]) {
        self.buffer.extend_from_slice(payload);
    }

    /// One non-blocking drain of the buffer into the stream.
    pub fn send_some<S: Stream>(&mut self, stream: &mut S) {
        self.status = stream.send(&mut self.buffer);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.status = Status::Idle;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn has_errors(&self) -> bool {
        !matches!(self.status, Status::Success | Status::Blocked | Status::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sends at most `limit` bytes per call, then reports a would-block.
    struct Trickle {
        limit: usize,
        sent: Vec<u8>,
    }

    impl Stream for Trickle {
        fn receive(&mut self, _payload: &mut Vec<u8>) -> Status {
            Status::Blocked
        }

        fn send(&mut self, payload: &mut Vec<u8>) -> Status {
            if payload.is_empty() {
                return Status::Success;
            }
            let take = self.limit.min(payload.len());
            self.sent.extend(payload.drain(..take));
            if payload.is_empty() {
                Status::Success
            } else {
                Status::Blocked
            }
        }
    }

    #[test]
    fn drains_across_multiple_sends() {
        let mut writer = Writer::new();
        let mut stream = Trickle {
            limit: 4,
            sent: Vec::new(),
        };

        writer.write(b"hello ");
        writer.write(b"world");
        assert!(!writer.is_empty());

        writer.send_some(&mut stream);
        assert!(!writer.is_empty());
        assert!(!writer.has_errors());

        while !writer.is_empty() {
            writer.send_some(&mut stream);
        }
        assert_eq!(stream.sent, b"hello world");
        assert_eq!(writer.status(), Status::Success);
    }
}
