use memchr::memmem;

use crate::{Status, Stream};

/// A growable receive buffer with token-scanning cursors.
///
/// `base` marks the start of unconsumed bytes. `peek` remembers where a
/// searched-for token was found and `next_base` where consumption should
/// resume past it, so a successful `peek` followed by `consume_token`
/// yields the bytes up to the token and skips the token itself.
pub struct Reader {
    buffer: Vec<u8>,
    status: Status,
    peek: usize,
    base: usize,
    next_base: usize,
}

impl Default for Reader {
    fn default() -> Self {
        Reader::new()
    }
}

impl Reader {
    pub fn new() -> Reader {
        Reader {
            buffer: Vec::new(),
            status: Status::Idle,
            peek: 0,
            base: 0,
            next_base: 0,
        }
    }

    /// One non-blocking drain of the stream into the buffer.
    pub fn read_some<S: Stream>(&mut self, stream: &mut S) {
        self.status = stream.receive(&mut self.buffer);
    }

    /// Search for `token` in the unconsumed bytes. On a hit the position
    /// is remembered without consuming anything.
    pub fn peek(&mut self, token: &[u8]) -> bool {
        match memmem::find(&self.buffer[self.base..], token) {
            Some(relative) => {
                self.peek = self.base + relative;
                self.next_base = self.peek + token.len();
                true
            }
            None => {
                self.peek = self.base;
                self.next_base = self.base;
                false
            }
        }
    }

    /// The bytes between `base` and the last peeked token, consuming them
    /// and the token.
    pub fn consume_token(&mut self) -> &[u8] {
        let (start, end) = (self.base, self.peek);
        self.base = self.next_base;
        self.peek = self.base;
        &self.buffer[start..end]
    }

    /// Up to `length` unconsumed bytes, consuming them.
    pub fn consume_length(&mut self, length: usize) -> &[u8] {
        let start = self.base;
        let end = self.buffer.len().min(self.base + length);
        self.base = end;
        self.peek = end;
        self.next_base = end;
        &self.buffer[start..end]
    }

    /// Drop consumed bytes but keep the unconsumed tail, so that bytes of
    /// a pipelined follow-up request survive a connection restart.
    pub fn compact(&mut self) {
        self.buffer.drain(..self.base);
        self.base = 0;
        self.peek = 0;
        self.next_base = 0;
        self.status = Status::Idle;
    }

    /// Discard everything, including unconsumed bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.base = 0;
        self.peek = 0;
        self.next_base = 0;
        self.status = Status::Idle;
    }

    /// Unconsumed bytes remaining in the buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.base
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Anything other than a clean would-block is an error condition.
    pub fn has_errors(&self) -> bool {
        !matches!(self.status, Status::Blocked | Status::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Script(Vec<Vec<u8>>);

    impl Stream for Script {
        fn receive(&mut self, payload: &mut Vec<u8>) -> Status {
            match self.0.pop() {
                Some(chunk) => {
                    payload.extend_from_slice(&chunk);
                    Status::Blocked
                }
                None => Status::Disconnect,
            }
        }

        fn send(&mut self, _payload: &mut Vec<u8>) -> Status {
            Status::Success
        }
    }

    #[test]
    fn peeks_and_consumes_tokens() {
        let mut reader = Reader::new();
        let mut stream = Script(vec![b"GET /keys HTTP/1.1\r\n".to_vec()]);
        reader.read_some(&mut stream);
        assert!(!reader.has_errors());

        assert!(reader.peek(b" "));
        assert_eq!(reader.consume_token(), b"GET");
        assert!(reader.peek(b" "));
        assert_eq!(reader.consume_token(), b"/keys");
        assert!(reader.peek(b"\r\n"));
        assert_eq!(reader.consume_token(), b"HTTP/1.1");
        assert_eq!(reader.pending(), 0);

        // A miss leaves the cursors untouched.
        assert!(!reader.peek(b"\r\n"));
    }

    #[test]
    fn consumes_bounded_lengths() {
        let mut reader = Reader::new();
        let mut stream = Script(vec![b"abcdefgh".to_vec()]);
        reader.read_some(&mut stream);

        assert_eq!(reader.consume_length(3), b"abc");
        assert_eq!(reader.consume_length(100), b"defgh");
        assert_eq!(reader.consume_length(4), b"");
    }

    #[test]
    fn compact_preserves_unconsumed_bytes() {
        let mut reader = Reader::new();
        let mut stream = Script(vec![b"first|second".to_vec()]);
        reader.read_some(&mut stream);

        assert!(reader.peek(b"|"));
        assert_eq!(reader.consume_token(), b"first");
        reader.compact();

        assert_eq!(reader.pending(), 6);
        assert_eq!(reader.consume_length(6), b"second");
    }

    #[test]
    fn disconnect_is_an_error_condition() {
        let mut reader = Reader::new();
        let mut stream = Script(Vec::new());
        assert!(!reader.has_errors());
        reader.read_some(&mut stream);
        assert!(reader.has_errors());
        assert_eq!(reader.status(), Status::Disconnect);
    }
}
