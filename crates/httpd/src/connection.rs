use netio::{Reader, Stream, Writer};
use std::time::{Duration, Instant};

use crate::message::{Payload, CRLF};
use crate::{reason_phrase, Method, Request, Response, PROTOCOL};

/// Idle timeout and timer tick period of the server loop.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of headers accepted per message.
pub const MAX_HEADERS: usize = 128;

/// Parse progress of the in-flight message on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Method,
    Url,
    Protocol,
    Status,
    Message,
    Header,
    Body,
    End,
    Failed,
}

/// One HTTP conversation bound to a stream, owning the buffered reader and
/// writer. Parsing is strictly incremental: every parse call advances as
/// far as the buffered bytes allow and preserves the stage for the next
/// readiness event.
pub struct Connection<S: Stream> {
    stream: S,
    reader: Reader,
    writer: Writer,
    request: Request,
    response: Response,
    stage: Stage,
    header_count: usize,
    expires_at: Instant,
    timeout: Duration,
}

impl<S: Stream> Connection<S> {
    pub fn new(stream: S, timeout: Duration) -> Connection<S> {
        Connection {
            stream,
            reader: Reader::new(),
            writer: Writer::new(),
            request: Request::new(),
            response: Response::new(),
            stage: Stage::Start,
            header_count: 0,
            expires_at: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn read_some(&mut self) {
        self.reader.read_some(&mut self.stream);
    }

    pub fn send_some(&mut self) {
        self.writer.send_some(&mut self.stream);
    }

    /// Buffer outgoing bytes for later non-blocking sends.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.writer.write(bytes);
    }

    /// Buffer a response and remember it for logging and keep-alive checks.
    pub fn queue_response(&mut self, response: Response) {
        self.writer.write(&response.to_bytes());
        self.response = response;
    }

    pub fn writer_is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    pub fn reader_has_errors(&self) -> bool {
        self.reader.has_errors()
    }

    pub fn reader_status(&self) -> netio::Status {
        self.reader.status()
    }

    pub fn writer_has_errors(&self) -> bool {
        self.writer.has_errors()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at < now
    }

    pub fn refresh_expiry(&mut self) {
        self.expires_at = Instant::now() + self.timeout;
    }

    /// Whether the parsed request asked to reuse the connection.
    pub fn keep_alive(&self) -> bool {
        self.request.header("connection") == Some("keep-alive")
    }

    /// Re-arm for the next exchange on the same connection. Unconsumed
    /// bytes of pipelined follow-up requests remain buffered.
    pub fn restart(&mut self) {
        self.stage = Stage::Start;
        self.header_count = 0;
        self.reader.compact();
        self.request = Request::new();
        self.response = Response::new();
        self.refresh_expiry();
    }

    /// Advance the server-side parse of a request.
    pub fn parse_request(&mut self) {
        loop {
            match self.stage {
                Stage::Start | Stage::Method => {
                    if !self.reader.peek(b" ") {
                        return;
                    }
                    let token = self.reader.consume_token().to_vec();
                    let method = std::str::from_utf8(&token)
                        .map(Method::from_token)
                        .unwrap_or(Method::Invalid);
                    if method == Method::Invalid {
                        self.stage = Stage::Failed;
                        return;
                    }
                    self.request.method = method;
                    self.stage = Stage::Url;
                }
                Stage::Url => {
                    if !self.reader.peek(b" ") {
                        return;
                    }
                    let token = self.reader.consume_token().to_vec();
                    let url = match std::str::from_utf8(&token) {
                        Ok(url) => url,
                        Err(_) => {
                            self.stage = Stage::Failed;
                            return;
                        }
                    };
                    if url.is_empty() || !url.starts_with('/') || url.contains("//") {
                        self.stage = Stage::Failed;
                        return;
                    }
                    self.request.url = url.to_string();
                    self.stage = Stage::Protocol;
                }
                Stage::Protocol => {
                    if !self.reader.peek(CRLF) {
                        return;
                    }
                    if self.reader.consume_token() != PROTOCOL.as_bytes() {
                        self.stage = Stage::Failed;
                        return;
                    }
                    self.request.protocol = PROTOCOL.to_string();
                    self.stage = Stage::Header;
                }
                Stage::Header | Stage::Body => {
                    let Connection {
                        reader,
                        request,
                        stage,
                        header_count,
                        ..
                    } = self;
                    parse_payload(reader, request, stage, header_count);
                    return;
                }
                _ => return,
            }
        }
    }

    /// Advance the client-side parse of a response.
    pub fn parse_response(&mut self) {
        loop {
            match self.stage {
                Stage::Start | Stage::Protocol => {
                    if !self.reader.peek(b" ") {
                        return;
                    }
                    if self.reader.consume_token() != PROTOCOL.as_bytes() {
                        self.stage = Stage::Failed;
                        return;
                    }
                    self.response.protocol = PROTOCOL.to_string();
                    self.stage = Stage::Status;
                }
                Stage::Status => {
                    if !self.reader.peek(b" ") {
                        return;
                    }
                    let token = self.reader.consume_token().to_vec();
                    let status = std::str::from_utf8(&token)
                        .ok()
                        .and_then(|token| token.parse::<u16>().ok());
                    let status = match status {
                        Some(status) if !reason_phrase(status).is_empty() => status,
                        _ => {
                            self.stage = Stage::Failed;
                            return;
                        }
                    };
                    self.response.status = status;
                    self.stage = Stage::Message;
                }
                Stage::Message => {
                    if !self.reader.peek(CRLF) {
                        return;
                    }
                    let token = self.reader.consume_token().to_vec();
                    if token != reason_phrase(self.response.status).as_bytes() {
                        self.stage = Stage::Failed;
                        return;
                    }
                    self.response.message = reason_phrase(self.response.status).to_string();
                    self.stage = Stage::Header;
                }
                Stage::Header | Stage::Body => {
                    let Connection {
                        reader,
                        response,
                        stage,
                        header_count,
                        ..
                    } = self;
                    parse_payload(reader, response, stage, header_count);
                    return;
                }
                _ => return,
            }
        }
    }
}

// Headers and body are parsed identically for requests and responses.
fn parse_payload<P: Payload>(
    reader: &mut Reader,
    payload: &mut P,
    stage: &mut Stage,
    header_count: &mut usize,
) {
    if *stage == Stage::Header {
        loop {
            if !reader.peek(CRLF) {
                return;
            }
            let line = reader.consume_token().to_vec();
            if line.is_empty() {
                *stage = Stage::Body;
                break;
            }
            if *header_count == MAX_HEADERS {
                *stage = Stage::Failed;
                return;
            }
            let line = match std::str::from_utf8(&line) {
                Ok(line) => line,
                Err(_) => {
                    *stage = Stage::Failed;
                    return;
                }
            };
            let (key, value) = match line.split_once(": ") {
                Some(split) => split,
                None => {
                    *stage = Stage::Failed;
                    return;
                }
            };
            if key.is_empty() || value.is_empty() {
                *stage = Stage::Failed;
                return;
            }
            payload.add_header(key, value);
            *header_count += 1;
        }
    }
    if *stage == Stage::Body {
        let content_length = match payload.header("content-length") {
            None => 0,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(length) => length,
                Err(_) => {
                    *stage = Stage::Failed;
                    return;
                }
            },
        };
        if payload.body_len() < content_length {
            let missing = content_length - payload.body_len();
            let chunk = reader.consume_length(missing).to_vec();
            payload.append_body(&chunk);
        }
        if payload.body_len() < content_length {
            return;
        }
        *stage = Stage::End;
    }
}
