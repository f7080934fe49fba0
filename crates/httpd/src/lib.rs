//! HTTP/1.1 framing and the single-threaded, readiness-driven server loop.

mod message;
pub use message::{reason_phrase, Method, Request, Response, APPLICATION_JSON, PROTOCOL};

mod connection;
pub use connection::{Connection, Stage, CONNECTION_TIMEOUT, MAX_HEADERS};

mod server;
pub use server::{Error as ServerError, Handler, Server};

mod client;
pub use client::send_request;
