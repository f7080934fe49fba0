//! End-to-end tests against a served socket: the full pipeline from TCP
//! bytes through the event loop, framing, handlers, and storage.

use doc::Value;
use httpd::{send_request, Method, Request, Response, Server, APPLICATION_JSON};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use store::{DocumentStore, UserPool};
use vellum::api;

const USER: &str = "admin";
const PASSWORD: &str = "swordfish";
// sha256("swordfish")
const PASSWORD_DIGEST: &str = "b9f195c5cc7ef6afadbfbc42892ad47d3b24c6bc94bb510c4564a90a14e8b799";

struct TestServer {
    port: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Serve the store under `dir` on a fresh port, with a fast timer so
    /// ticks and expirations happen within test patience.
    fn start(dir: &Path) -> TestServer {
        let users = dir.join("users.json");
        if !users.exists() {
            std::fs::write(&users, format!(r#"{{"{USER}":"{PASSWORD_DIGEST}"}}"#)).unwrap();
        }
        let port = portpicker::pick_unused_port().expect("a free port").to_string();

        let mut server = Server::new();
        server.set_timeout(Duration::from_millis(250));
        server.register_service(
            api::DATABASE_SERVICE,
            Box::new(DocumentStore::new(dir.join("db"))),
        );
        server.register_service(api::USER_SERVICE, Box::new(UserPool::new(users)));
        server.register_handler(Method::Post, "/insert", api::insert);
        server.register_handler(Method::Post, "/erase", api::erase);
        server.register_handler(Method::Post, "/find", api::find);
        server.register_handler(Method::Get, "/keys", api::keys);
        server.register_handler(Method::Get, "/image", api::image);

        let stop = server.stop_handle();
        let bind_port = port.clone();
        let thread = std::thread::spawn(move || {
            server.serve("127.0.0.1", &bind_port).expect("serve runs");
        });

        // Wait for the listener to come up.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match TcpStream::connect(("127.0.0.1", port.parse::<u16>().unwrap())) {
                Ok(_) => break,
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                Err(e) => panic!("server did not come up: {e}"),
            }
        }

        TestServer {
            port,
            stop,
            thread: Some(thread),
        }
    }

    fn request(&self, method: Method, url: &str, body: &[u8]) -> Response {
        send_request(
            "127.0.0.1",
            &self.port,
            method,
            url,
            Some((USER, PASSWORD)),
            Some(APPLICATION_JSON),
            body,
        )
        .expect("a response")
    }

    fn insert(&self, body: &[u8]) -> String {
        let response = self.request(Method::Post, "/insert", body);
        assert_eq!(response.status(), 200);
        let body = parse_body(&response);
        assert_eq!(body.get("success"), Some(&Value::Bool(true)));
        body.get("id").and_then(Value::as_str).unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn parse_body(response: &Response) -> Value {
    Value::parse(std::str::from_utf8(response.body()).unwrap()).unwrap()
}

#[test]
fn round_trip_insert_and_find() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    let id = server.insert(br#"{"a":1,"b":"x"}"#);
    assert_eq!(id.len(), 16);
    assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));

    let response = server.request(Method::Post, "/find", format!(r#"{{"id":"{id}"}}"#).as_bytes());
    assert_eq!(response.status(), 200);
    let body = parse_body(&response);
    assert_eq!(body.get("found"), Some(&Value::Bool(true)));
    assert_eq!(
        body.get("document"),
        Some(&Value::parse(r#"{"a":1,"b":"x"}"#).unwrap())
    );

    // A find for an unknown id succeeds with found=false.
    let response = server.request(Method::Post, "/find", br#"{"id":"deadbeefdeadbeef"}"#);
    assert_eq!(response.status(), 200);
    let body = parse_body(&response);
    assert_eq!(body.get("found"), Some(&Value::Bool(false)));
    assert_eq!(body.get("document"), None);
}

#[test]
fn erase_of_a_missing_id_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    let response = server.request(Method::Post, "/erase", br#"{"id":"deadbeefdeadbeef"}"#);
    assert_eq!(response.status(), 400);
    assert_eq!(response.body(), br#"{"success":false}"#);

    // And a real erase round-trips.
    let id = server.insert(br#"{"gone":true}"#);
    let response = server.request(Method::Post, "/erase", format!(r#"{{"id":"{id}"}}"#).as_bytes());
    assert_eq!(response.status(), 200);
    let body = parse_body(&response);
    assert_eq!(body.get("id").and_then(Value::as_str), Some(id.as_str()));
}

#[test]
fn keys_lists_every_id_in_ascending_order() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    let mut ids: Vec<String> = (0..100)
        .map(|n| server.insert(format!(r#"{{"n":{n}}}"#).as_bytes()))
        .collect();
    ids.sort();

    let response = server.request(Method::Get, "/keys", b"");
    assert_eq!(response.status(), 200);
    let body = parse_body(&response);
    let listed: Vec<&str> = body
        .get("keys")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(listed, ids.iter().map(String::as_str).collect::<Vec<_>>());
}

#[test]
fn image_returns_every_document() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    let first = server.insert(br#"{"n":1}"#);
    let second = server.insert(br#"{"n":2}"#);

    let response = server.request(Method::Get, "/image", b"");
    assert_eq!(response.status(), 200);
    let image = parse_body(&response);
    assert_eq!(image.get(&first), Some(&Value::parse(r#"{"n":1}"#).unwrap()));
    assert_eq!(image.get(&second), Some(&Value::parse(r#"{"n":2}"#).unwrap()));
    assert_eq!(image.as_object().unwrap().len(), 2);
}

#[test]
fn a_restart_recovers_every_acknowledged_insert() {
    let dir = tempfile::tempdir().unwrap();
    let mut ids: Vec<String> = {
        let server = TestServer::start(dir.path());
        (0..50)
            .map(|n| server.insert(format!(r#"{{"n":{n}}}"#).as_bytes()))
            .collect()
        // Dropping the server here stands in for the process dying: every
        // acknowledged insert is already journaled.
    };
    ids.sort();

    let server = TestServer::start(dir.path());
    let response = server.request(Method::Get, "/keys", b"");
    let body = parse_body(&response);
    let listed: Vec<&str> = body
        .get("keys")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(listed, ids.iter().map(String::as_str).collect::<Vec<_>>());
}

#[test]
fn a_timer_tick_compacts_the_journal_into_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    for n in 0..20 {
        server.insert(format!(r#"{{"n":{n}}}"#).as_bytes());
    }
    // No base exists yet, so any journal is due for compaction on the
    // next tick (250ms in tests).
    let deadline = Instant::now() + Duration::from_secs(5);
    let journal = dir.path().join("db.journal");
    let base = dir.path().join("db");
    while journal.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(!journal.exists(), "journal was not compacted");
    assert!(base.exists());

    // The snapshot alone holds the whole store.
    let bytes = std::fs::read(&base).unwrap();
    let decoded = btree::Tree::decode(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded.len(), 20);

    let response = server.request(Method::Get, "/keys", b"");
    let body = parse_body(&response);
    assert_eq!(body.get("keys").and_then(Value::as_array).unwrap().len(), 20);
}

#[test]
fn keep_alive_pipelines_two_requests_over_one_socket() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    let mut pipelined = Vec::new();
    for n in 0..2 {
        let mut request = Request::new();
        request.set_method(Method::Post);
        request.set_url("/insert");
        let token = base64::encode(format!("{USER}:{PASSWORD}"));
        request.add_header("authorization", &format!("Basic {token}"));
        request.add_header("content-type", APPLICATION_JSON);
        request.add_header("connection", "keep-alive");
        let body = format!(r#"{{"n":{n}}}"#);
        request.add_header("content-length", &body.len().to_string());
        request.set_body(body.as_bytes());
        pipelined.extend_from_slice(&request.to_bytes());
    }

    let mut socket = TcpStream::connect(("127.0.0.1", server.port.parse::<u16>().unwrap())).unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    socket.write_all(&pipelined).unwrap();

    // Both responses arrive on the same socket.
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    while count_occurrences(&received, b"\"success\":true") < 2 {
        let n = socket.read(&mut chunk).expect("responses keep arriving");
        assert!(n > 0, "peer closed before both responses arrived");
        received.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(count_occurrences(&received, b"HTTP/1.1 200 OK\r\n"), 2);

    // And the two documents landed in the store.
    let response = server.request(Method::Get, "/keys", b"");
    let body = parse_body(&response);
    assert_eq!(body.get("keys").and_then(Value::as_array).unwrap().len(), 2);
}

#[test]
fn requests_without_valid_credentials_are_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    for credentials in [None, Some((USER, "wrong")), Some(("ghost", PASSWORD))] {
        let response = send_request(
            "127.0.0.1",
            &server.port,
            Method::Get,
            "/keys",
            credentials,
            Some(APPLICATION_JSON),
            b"",
        )
        .expect("a response");
        assert_eq!(response.status(), 401, "credentials {credentials:?}");
        assert_eq!(response.body(), br#"{"success":false}"#);
    }
}

#[test]
fn requests_without_a_json_content_type_are_bad() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    for content_type in [None, Some("text/html")] {
        let response = send_request(
            "127.0.0.1",
            &server.port,
            Method::Get,
            "/keys",
            Some((USER, PASSWORD)),
            content_type,
            b"",
        )
        .expect("a response");
        assert_eq!(response.status(), 400, "content type {content_type:?}");
    }

    // Malformed JSON bodies are rejected the same way.
    let response = server.request(Method::Post, "/insert", b"{not json");
    assert_eq!(response.status(), 400);
}

#[test]
fn unknown_routes_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    let response = server.request(Method::Get, "/nope", b"");
    assert_eq!(response.status(), 404);
}

#[test]
fn idle_connections_expire() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path());

    let mut socket = TcpStream::connect(("127.0.0.1", server.port.parse::<u16>().unwrap())).unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    // Say nothing; the sweep (250ms timeout in tests) closes the socket,
    // observable as a clean end of stream.
    let mut chunk = [0u8; 16];
    let n = socket.read(&mut chunk).expect("a clean close, not a timeout");
    assert_eq!(n, 0);
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}
