use netio::{Epoll, Poller, SignalFd, Socket, TimerFd, MAX_EVENTS};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use store::{Service, ServiceMap};

use crate::{Connection, Method, Request, Response, Stage, CONNECTION_TIMEOUT};

/// Descriptors held back from the connection budget: the listener, the
/// signal descriptor, and the timer.
const RESERVED_SOCKETS: usize = 3;

pub type Handler = fn(&Request, &mut ServiceMap) -> Response;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to initialize service {name}")]
    Service {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("server setup failed")]
    Setup(#[from] io::Error),
}

/// A single-threaded HTTP server multiplexing pipelined connections over a
/// readiness poller. Handlers and services are registered up front; the
/// registration table is immutable once `serve` runs.
pub struct Server {
    handlers: BTreeMap<String, Handler>,
    services: ServiceMap,
    timeout: Duration,
    running: bool,
    stop: Arc<AtomicBool>,
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

impl Server {
    pub fn new() -> Server {
        Server {
            handlers: BTreeMap::new(),
            services: ServiceMap::new(),
            timeout: CONNECTION_TIMEOUT,
            running: false,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shrink (or grow) the idle timeout, which is also the timer period.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// A flag that stops the serve loop from another thread. The loop
    /// checks it once per poll wake-up, so the latency is bounded by the
    /// timer period.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn register_handler(&mut self, method: Method, url: &str, handler: Handler) {
        if self.running {
            tracing::warn!(url, "handler registration rejected while running");
            return;
        }
        let id = format!("{}{}", method.as_str(), url);
        if self.handlers.contains_key(&id) {
            tracing::warn!(%id, "handler already registered");
            return;
        }
        self.handlers.insert(id, handler);
    }

    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        if self.running {
            tracing::warn!(name, "service registration rejected while running");
            return;
        }
        if self.services.contains_key(name) {
            tracing::warn!(name, "service already registered");
            return;
        }
        self.services.insert(name.to_string(), service);
    }

    /// Run the event loop until a termination signal or the stop flag.
    pub fn serve(&mut self, host: &str, service: &str) -> Result<(), Error> {
        for (name, svc) in &mut self.services {
            tracing::info!(%name, "initializing service");
            svc.initialize().map_err(|source| Error::Service {
                name: name.clone(),
                source,
            })?;
        }

        let mut poller = Epoll::new()?;
        let mut listener = Socket::listen(host, service)?;
        listener.set_non_blocking()?;
        poller.add_readable(listener.descriptor())?;

        let signals = SignalFd::new()?;
        poller.add_readable(signals.descriptor())?;

        let timer = TimerFd::new()?;
        timer.schedule(self.timeout)?;
        poller.add_readable(timer.descriptor())?;

        let mut connections: HashMap<RawFd, Connection<Socket>> = HashMap::new();
        self.running = true;
        tracing::info!(host, service, "serving");

        while self.running && !self.stop.load(Ordering::Relaxed) {
            let ready = match poller.wait(-1) {
                Ok(ready) => ready,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "poll failed");
                    break;
                }
            };
            for index in 0..ready {
                let fd = poller.descriptor(index);
                if fd == timer.descriptor() {
                    self.handle_timer(&timer, &mut poller, &mut connections);
                } else if fd == signals.descriptor() {
                    self.handle_signal(&signals);
                } else if fd == listener.descriptor() {
                    if poller.is_readable(index) {
                        self.handle_accept(&listener, &mut poller, &mut connections);
                    } else if poller.has_errors(index) {
                        self.handle_listener_error(
                            &mut listener,
                            host,
                            service,
                            &mut poller,
                            &mut connections,
                        );
                    }
                } else {
                    self.handle_client(index, &mut poller, &mut connections);
                }
            }
        }

        tracing::info!("shutting down");
        for (name, svc) in &mut self.services {
            tracing::info!(%name, "service shutdown");
            svc.shutdown();
        }
        for (fd, _) in connections.drain() {
            let _ = poller.remove(fd);
        }
        self.running = false;
        Ok(())
    }

    fn handle_timer(
        &mut self,
        timer: &TimerFd,
        poller: &mut Epoll,
        connections: &mut HashMap<RawFd, Connection<Socket>>,
    ) {
        if !timer.drain() {
            tracing::warn!("could not drain the timer descriptor");
            return;
        }
        for (name, service) in &mut self.services {
            tracing::trace!(%name, "service tick");
            service.tick();
        }

        let now = Instant::now();
        let expired: Vec<RawFd> = connections
            .iter()
            .filter(|(_, connection)| connection.is_expired(now))
            .map(|(fd, _)| *fd)
            .collect();
        for fd in expired {
            tracing::debug!(fd, "dropping expired connection");
            let _ = poller.remove(fd);
            connections.remove(&fd);
        }
        tracing::debug!(open = ?connections.keys().collect::<Vec<_>>(), "connection sweep");
    }

    fn handle_signal(&mut self, signals: &SignalFd) {
        match signals.drain() {
            Some(signal) if SignalFd::is_termination(signal) => {
                tracing::info!(signal, "stopping on signal");
                self.running = false;
            }
            Some(signal) => tracing::debug!(signal, "ignoring signal"),
            None => tracing::warn!("could not drain the signal descriptor"),
        }
    }

    fn handle_accept(
        &mut self,
        listener: &Socket,
        poller: &mut Epoll,
        connections: &mut HashMap<RawFd, Connection<Socket>>,
    ) {
        if connections.len() >= MAX_EVENTS - RESERVED_SOCKETS {
            tracing::warn!(open = connections.len(), "connection budget exhausted");
            return;
        }
        let socket = match listener.accept() {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                return;
            }
        };
        if let Err(e) = socket.set_non_blocking() {
            tracing::warn!(error = %e, "could not unblock accepted socket");
            return;
        }
        let fd = socket.descriptor();
        if let Err(e) = poller.add_readable(fd) {
            tracing::warn!(error = %e, "could not register accepted socket");
            return;
        }
        tracing::debug!(fd, "accepted connection");
        connections.insert(fd, Connection::new(socket, self.timeout));
    }

    fn handle_listener_error(
        &mut self,
        listener: &mut Socket,
        host: &str,
        service: &str,
        poller: &mut Epoll,
        connections: &mut HashMap<RawFd, Connection<Socket>>,
    ) {
        tracing::warn!("listening socket failed; reopening");
        let _ = poller.remove(listener.descriptor());
        listener.close();

        let reopened = Socket::listen(host, service).and_then(|fresh| {
            fresh.set_non_blocking()?;
            poller.add_readable(fresh.descriptor())?;
            Ok(fresh)
        });
        match reopened {
            Ok(fresh) => {
                *listener = fresh;
                for (fd, _) in connections.drain() {
                    let _ = poller.remove(fd);
                }
                tracing::info!("listener reopened; all connections dropped");
            }
            Err(e) => {
                tracing::error!(error = %e, "could not reopen the listener");
                self.running = false;
            }
        }
    }

    fn handle_client(
        &mut self,
        index: usize,
        poller: &mut Epoll,
        connections: &mut HashMap<RawFd, Connection<Socket>>,
    ) {
        let fd = poller.descriptor(index);
        if !connections.contains_key(&fd) {
            tracing::warn!(fd, "event for an unknown connection");
            return;
        }

        let mut destroy = false;
        let mut rearm = None;

        if poller.is_readable(index) {
            let connection = connections.get_mut(&fd).unwrap();
            connection.refresh_expiry();
            if connection.stage() == Stage::End {
                // A completed exchange has nothing more to read.
                tracing::debug!(fd, "readable event on a completed exchange");
                destroy = true;
            } else {
                connection.read_some();
                connection.parse_request();
                match connection.stage() {
                    Stage::Failed => {
                        tracing::debug!(fd, "request parsing failed");
                        destroy = true;
                    }
                    Stage::End => {
                        tracing::debug!(fd, request = %connection.request().short(), "request");
                        let response = self.dispatch_for(connections, fd);
                        rearm = Some(Rearm::Writable);
                        let connection = connections.get_mut(&fd).unwrap();
                        tracing::debug!(fd, response = %response.short(), "response");
                        connection.queue_response(response);
                    }
                    _ => {}
                }
                if !destroy {
                    let connection = connections.get_mut(&fd).unwrap();
                    if connection.reader_has_errors() {
                        tracing::debug!(fd, status = ?connection.reader_status(), "peer gone before response");
                        destroy = true;
                    }
                }
            }
        } else if poller.is_writable(index) {
            let connection = connections.get_mut(&fd).unwrap();
            connection.refresh_expiry();
            connection.send_some();
            if connection.writer_is_empty() {
                if connection.keep_alive() {
                    tracing::debug!(fd, "keep-alive restart");
                    connection.restart();
                    // Bytes of a pipelined follow-up request may already be
                    // buffered; they will never raise another readable
                    // event, so parse them now.
                    connection.parse_request();
                    match connection.stage() {
                        Stage::Failed => destroy = true,
                        Stage::End => {
                            let response = self.dispatch_for(connections, fd);
                            let connection = connections.get_mut(&fd).unwrap();
                            tracing::debug!(fd, response = %response.short(), "pipelined response");
                            connection.queue_response(response);
                            // The descriptor stays armed for writes.
                        }
                        _ => rearm = Some(Rearm::Readable),
                    }
                } else {
                    tracing::debug!(fd, "response sent; closing");
                    destroy = true;
                }
            } else if connection.writer_has_errors() {
                tracing::debug!(fd, "peer gone before response was drained");
                destroy = true;
            }
        } else if poller.has_errors(index) {
            tracing::debug!(fd, "error condition on connection");
            destroy = true;
        }

        if destroy {
            Self::destroy(fd, poller, connections);
            return;
        }
        match rearm {
            Some(Rearm::Writable) => {
                if poller.set_writable(index).is_err() {
                    tracing::warn!(fd, "could not arm connection for writes");
                    Self::destroy(fd, poller, connections);
                }
            }
            Some(Rearm::Readable) => {
                if poller.set_readable(index).is_err() {
                    tracing::warn!(fd, "could not arm connection for reads");
                    Self::destroy(fd, poller, connections);
                }
            }
            None => {}
        }
    }

    // Look the parsed request up in the handler table and execute it.
    fn dispatch_for(
        &mut self,
        connections: &mut HashMap<RawFd, Connection<Socket>>,
        fd: RawFd,
    ) -> Response {
        let request = connections.get(&fd).unwrap().request();
        let id = format!("{}{}", request.method().as_str(), request.url());
        match self.handlers.get(&id) {
            Some(handler) => handler(request, &mut self.services),
            None => Response::build(404),
        }
    }

    fn destroy(fd: RawFd, poller: &mut Epoll, connections: &mut HashMap<RawFd, Connection<Socket>>) {
        tracing::debug!(fd, "destroying connection");
        let _ = poller.remove(fd);
        connections.remove(&fd);
    }
}

enum Rearm {
    Readable,
    Writable,
}
