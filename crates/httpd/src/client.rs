//! A small blocking client for tests and tooling: one request, one
//! response, over a fresh connection.

use netio::Socket;

use crate::{Connection, Method, Request, Response, Stage, CONNECTION_TIMEOUT};

const SYNC_WAIT_MS: i32 = 1000;

/// Send one request and wait for its response. Returns None on connect
/// failure, write failure, a malformed response, or an idle peer.
pub fn send_request(
    host: &str,
    service: &str,
    method: Method,
    url: &str,
    credentials: Option<(&str, &str)>,
    content_type: Option<&str>,
    body: &[u8],
) -> Option<Response> {
    let mut request = Request::new();
    request.set_method(method);
    request.set_url(url);
    if let Some((user, password)) = credentials {
        let token = base64::encode(format!("{user}:{password}"));
        request.add_header("authorization", &format!("Basic {token}"));
    }
    if let Some(content_type) = content_type {
        request.add_header("content-type", content_type);
    }
    if !body.is_empty() {
        request.add_header("content-length", &body.len().to_string());
        request.set_body(body);
    }

    let socket = match Socket::connect(host, service) {
        Ok(socket) => socket,
        Err(error) => {
            tracing::debug!(%error, host, service, "connect failed");
            return None;
        }
    };
    if socket.set_non_blocking().is_err() {
        return None;
    }

    let mut connection = Connection::new(socket, CONNECTION_TIMEOUT);
    connection.queue(&request.to_bytes());
    while !connection.writer_is_empty() {
        if !connection.stream().wait_send(SYNC_WAIT_MS) {
            return None;
        }
        connection.send_some();
        if connection.writer_has_errors() {
            return None;
        }
    }

    loop {
        connection.parse_response();
        match connection.stage() {
            Stage::End => return Some(connection.response().clone()),
            Stage::Failed => return None,
            _ => {}
        }
        if connection.reader_has_errors() {
            return None;
        }
        if !connection.stream().wait_receive(SYNC_WAIT_MS) {
            return None;
        }
        connection.read_some();
    }
}
