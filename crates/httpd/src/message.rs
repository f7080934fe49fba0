use std::collections::BTreeMap;

pub const PROTOCOL: &str = "HTTP/1.1";
pub const APPLICATION_JSON: &str = "application/json";

pub(crate) const CRLF: &[u8] = b"\r\n";

/// The closed set of request methods; anything else fails parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Invalid,
    Post,
    Get,
    Head,
    Put,
    Delete,
    Connect,
    Update,
    Trace,
    Patch,
    Options,
}

impl Method {
    pub fn from_token(token: &str) -> Method {
        match token {
            "POST" => Method::Post,
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "CONNECT" => Method::Connect,
            "UPDATE" => Method::Update,
            "TRACE" => Method::Trace,
            "PATCH" => Method::Patch,
            "OPTIONS" => Method::Options,
            _ => Method::Invalid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Update => "UPDATE",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Invalid => "",
        }
    }
}

/// Reason phrase of a known status code, or "" for unknown codes.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        410 => "Gone",
        411 => "Length Required",
        413 => "Request Entity Too Large",
        414 => "Request URI Too Long",
        415 => "Unsupported Media Type",
        417 => "Expectation Failed",
        422 => "Unprocessable Entity",
        423 => "Locked",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

// Shared header/body surface of requests and responses, for the parser.
pub(crate) trait Payload {
    fn add_header(&mut self, key: &str, value: &str);
    fn header(&self, key: &str) -> Option<&str>;
    fn append_body(&mut self, bytes: &[u8]);
    fn body_len(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) protocol: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Request::new()
    }
}

impl Request {
    pub fn new() -> Request {
        Request {
            method: Method::Get,
            url: "/".to_string(),
            protocol: PROTOCOL.to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    /// Header lookup by case-insensitive name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn add_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_ascii_lowercase(), value.to_string());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body = body.to_vec();
    }

    /// Render the request line, headers, and body to wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.method.as_str(), self.url, self.protocol).as_bytes(),
        );
        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// The request line alone, for logging.
    pub fn short(&self) -> String {
        format!("{} {} {}", self.method.as_str(), self.url, self.protocol)
    }
}

impl Payload for Request {
    fn add_header(&mut self, key: &str, value: &str) {
        Request::add_header(self, key, value);
    }

    fn header(&self, key: &str) -> Option<&str> {
        Request::header(self, key)
    }

    fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    fn body_len(&self) -> usize {
        self.body.len()
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) protocol: String,
    pub(crate) status: u16,
    pub(crate) message: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new()
    }
}

impl Response {
    pub fn new() -> Response {
        Response {
            protocol: PROTOCOL.to_string(),
            status: 200,
            message: reason_phrase(200).to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// A bodyless response carrying the default header set.
    pub fn build(status: u16) -> Response {
        let mut response = Response::new();
        response.status = status;
        response.message = reason_phrase(status).to_string();
        response.add_header("date", &chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
        response.add_header("server", "vellum/1");
        response.add_header("access-control-allow-origin", "*");
        response.add_header("access-control-allow-methods", "GET, POST");
        response.add_header("content-length", "0");
        response
    }

    /// A response with a typed body and the default header set.
    pub fn with_body(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Response {
        let mut response = Response::build(status);
        response.body = body.into();
        response.add_header("content-type", content_type);
        response.add_header("content-length", &response.body.len().to_string());
        response
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn add_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_ascii_lowercase(), value.to_string());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.protocol, self.status, self.message).as_bytes(),
        );
        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// The status line alone, for logging.
    pub fn short(&self) -> String {
        format!("{} {} {}", self.protocol, self.status, self.message)
    }
}

impl Payload for Response {
    fn add_header(&mut self, key: &str, value: &str) {
        Response::add_header(self, key, value);
    }

    fn header(&self, key: &str) -> Option<&str> {
        Response::header(self, key)
    }

    fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    fn body_len(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn methods_round_trip_through_tokens() {
        for token in [
            "POST", "GET", "HEAD", "PUT", "DELETE", "CONNECT", "UPDATE", "TRACE", "PATCH",
            "OPTIONS",
        ] {
            assert_eq!(Method::from_token(token).as_str(), token);
        }
        assert_eq!(Method::from_token("BREW"), Method::Invalid);
        assert_eq!(Method::from_token("get"), Method::Invalid);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut request = Request::new();
        request.add_header("Content-Type", "application/json");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(request.header("content-length"), None);
    }

    #[test]
    fn requests_render_to_wire_form() {
        let mut request = Request::new();
        request.set_method(Method::Post);
        request.set_url("/insert");
        request.add_header("content-type", APPLICATION_JSON);
        request.set_body(b"{}");
        request.add_header("content-length", "2");

        let rendered = String::from_utf8(request.to_bytes()).unwrap();
        assert_eq!(
            rendered,
            "POST /insert HTTP/1.1\r\ncontent-length: 2\r\ncontent-type: application/json\r\n\r\n{}"
        );
    }

    #[test]
    fn built_responses_carry_the_default_headers() {
        let response = Response::with_body(200, APPLICATION_JSON, r#"{"success":true}"#);
        assert_eq!(response.status(), 200);
        assert_eq!(response.message(), "OK");
        assert_eq!(response.header("content-type"), Some(APPLICATION_JSON));
        assert_eq!(response.header("content-length"), Some("16"));
        assert_eq!(response.header("server"), Some("vellum/1"));
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert!(response.header("date").is_some());

        let bodyless = Response::build(404);
        assert_eq!(bodyless.message(), "Not Found");
        assert_eq!(bodyless.header("content-length"), Some("0"));
        assert_eq!(bodyless.header("content-type"), None);
    }

    #[test]
    fn unknown_status_codes_have_no_reason() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(299), "");
    }
}
