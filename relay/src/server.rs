//! C3 — Server acceptor.
//!
//! Owns a listening endpoint and the live session registry, driven by a
//! single `mio::Poll`: one tick runs the listener's readiness check and
//! services live connections, since handshake progress is just another
//! readiness event on a session's own token rather than a second
//! registration.
//!
//! Token 0 is reserved for the listener. Every accepted session gets the
//! next token from a monotonic counter; tokens are not recycled within a
//! run, which keeps the accounting simple at the cost of `usize` exhaustion
//! only after billions of accepts.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mio::net::TcpListener;
use mio_uds::UnixListener;

use crate::error::{Error, Result};
use crate::session::{Handler, Session, SessionActor, SessionId, SessionOptions};
use crate::transport::Transport;

const LISTENER_TOKEN: mio::Token = mio::Token(0);
const FIRST_SESSION_TOKEN: usize = 1;

/// What the server listens with. TLS reuses the plain TCP listener; the
/// handshake happens per-session once a connection is accepted.
pub enum ListenerKind {
    Tcp,
    Tls(Arc<rustls::ServerConfig>),
    Uds,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub reuse_address: bool,
    pub reuse_port: bool,
    pub listen_backlog: i32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            reuse_address: true,
            reuse_port: false,
            listen_backlog: 1024,
        }
    }
}

/// Aggregate, atomically-updated counters folded up from every session
/// (§4.2 Statistics / §5 "Server counters and statistics use atomic
/// addition").
#[derive(Default)]
pub struct ServerStats {
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub sessions_connected: AtomicU64,
    pub sessions_disconnected: AtomicU64,
}

enum Listener {
    Tcp(TcpListener),
    Uds(UnixListener),
}

/// A function that builds one application `Handler` per accepted session.
pub type HandlerFactory = dyn Fn() -> Box<dyn Handler> + Send + Sync;

pub struct Server {
    log: slog::Logger,
    poll: mio::Poll,
    events: mio::Events,

    listener: Option<Listener>,
    kind: ListenerKind,
    options: ServerOptions,
    session_options: SessionOptions,
    handler_factory: Arc<HandlerFactory>,

    sessions: DashMap<usize, SessionActor>,
    ids: DashMap<SessionId, usize>,
    next_token: AtomicUsize,

    started: AtomicBool,
    accepting: AtomicBool,

    pub stats: ServerStats,
}

impl Server {
    pub fn new(
        kind: ListenerKind,
        options: ServerOptions,
        session_options: SessionOptions,
        handler_factory: Arc<HandlerFactory>,
        log: slog::Logger,
    ) -> Result<Server> {
        Ok(Server {
            log,
            poll: mio::Poll::new()?,
            events: mio::Events::with_capacity(4096),
            listener: None,
            kind,
            options,
            session_options,
            handler_factory,
            sessions: DashMap::new(),
            ids: DashMap::new(),
            next_token: AtomicUsize::new(FIRST_SESSION_TOKEN),
            started: AtomicBool::new(false),
            accepting: AtomicBool::new(false),
            stats: ServerStats::default(),
        })
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Binds and starts listening. For TCP/TLS, `address` is a socket
    /// address (`"0.0.0.0:8080"`); for UDS it's a filesystem path.
    pub fn start(&mut self, address: &str) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::Misuse("server already started"));
        }

        let listener = match self.kind {
            ListenerKind::Tcp | ListenerKind::Tls(_) => {
                let addr: SocketAddr = address.parse()?;
                Listener::Tcp(self.bind_tcp(addr)?)
            }
            ListenerKind::Uds => {
                let _ = std::fs::remove_file(address);
                Listener::Uds(UnixListener::bind(address).map_err(Error::from)?)
            }
        };

        match &listener {
            Listener::Tcp(l) => self.poll.register(l, LISTENER_TOKEN, mio::Ready::readable(), mio::PollOpt::edge())?,
            Listener::Uds(l) => self.poll.register(l, LISTENER_TOKEN, mio::Ready::readable(), mio::PollOpt::edge())?,
        }

        self.listener = Some(listener);
        self.started.store(true, Ordering::SeqCst);
        self.accepting.store(true, Ordering::SeqCst);
        slog::debug!(self.log, "server started"; "address" => address);
        Ok(())
    }

    fn bind_tcp(&self, addr: SocketAddr) -> Result<TcpListener> {
        use socket2::{Domain, Socket, Type};

        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(self.options.reuse_address)?;
        #[cfg(unix)]
        socket.set_reuse_port(self.options.reuse_port)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.options.listen_backlog)?;

        TcpListener::from_std(socket.into()).map_err(Error::from)
    }

    /// Closes the listener and disconnects every live session. The server
    /// can be `start`ed again afterwards (§3 Server lifecycle).
    pub fn stop(&mut self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.accepting.store(false, Ordering::SeqCst);

        if let Some(listener) = self.listener.take() {
            let _ = match &listener {
                Listener::Tcp(l) => self.poll.deregister(l),
                Listener::Uds(l) => self.poll.deregister(l),
            };
        }

        self.disconnect_all();
        slog::debug!(self.log, "server stopped");
    }

    pub fn restart(&mut self, address: &str) -> Result<()> {
        self.stop();
        self.start(address)
    }

    /// Enqueues `bytes` for asynchronous delivery to every currently
    /// connected session. Iterates a snapshot of tokens so sessions that
    /// disconnect mid-iteration (from another thread) don't panic the walk
    /// (§4.3).
    pub fn multicast(&self, bytes: &[u8]) {
        let tokens: Vec<usize> = self.sessions.iter().map(|e| *e.key()).collect();
        for token in tokens {
            if let Some(mut actor) = self.sessions.get_mut(&token) {
                actor.send_async(bytes);
            }
        }
    }

    pub fn disconnect_all(&self) {
        let tokens: Vec<usize> = self.sessions.iter().map(|e| *e.key()).collect();
        for token in tokens {
            self.teardown_session(token);
        }
    }

    /// Runs one reactor tick: accepts any pending connections, then services
    /// readiness events for live sessions. `timeout` of `None` blocks until
    /// something is ready; `Some(Duration::ZERO)` polls without blocking,
    /// suitable for driving the server from inside an existing frame loop.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.poll.poll(&mut self.events, timeout)?;

        let mut ready: Vec<(usize, mio::Ready)> = Vec::new();
        for event in &self.events {
            ready.push((event.token().0, event.readiness()));
        }

        for (token, readiness) in ready {
            if token == LISTENER_TOKEN.0 {
                self.accept_loop();
                continue;
            }

            self.service_session(token, readiness);
        }

        Ok(())
    }

    fn accept_loop(&mut self) {
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        loop {
            let accepted = match self.listener.as_ref() {
                Some(Listener::Tcp(l)) => match l.accept() {
                    Ok((stream, _)) => Some(Transport::Plain(stream)),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
                    Err(e) => {
                        slog::warn!(self.log, "accept failed"; "error" => %e);
                        None
                    }
                },
                Some(Listener::Uds(l)) => match l.accept() {
                    Ok(Some((stream, _))) => Some(Transport::Uds(stream)),
                    Ok(None) => None,
                    Err(e) => {
                        slog::warn!(self.log, "accept failed"; "error" => %e);
                        None
                    }
                },
                None => None,
            };

            let transport = match accepted {
                Some(t) => t,
                None => break,
            };

            let transport = match &self.kind {
                ListenerKind::Tls(config) => match transport {
                    Transport::Plain(stream) => match crate::transport::TlsTransport::new_server(stream, config.clone()) {
                        Ok(tls) => Transport::Tls(tls),
                        Err(e) => {
                            slog::warn!(self.log, "tls setup failed"; "error" => %e);
                            continue;
                        }
                    },
                    other => other,
                },
                _ => transport,
            };

            self.spawn_session(transport);
        }
    }

    fn spawn_session(&mut self, transport: Transport) {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = transport.register(
            &self.poll,
            mio::Token(token),
            mio::Ready::readable() | mio::Ready::writable(),
        ) {
            slog::warn!(self.log, "session registration failed"; "error" => %e);
            return;
        }

        let session = Session::new(transport, self.session_options.clone(), self.log.clone());
        let id = session.id();
        let mut actor = SessionActor::new(session, (self.handler_factory)());
        actor.connect();

        self.ids.insert(id, token);
        self.sessions.insert(token, actor);
        self.stats.sessions_connected.fetch_add(1, Ordering::Relaxed);
    }

    fn service_session(&mut self, token: usize, readiness: mio::Ready) {
        let disconnected = {
            let mut actor = match self.sessions.get_mut(&token) {
                Some(a) => a,
                None => return,
            };

            if actor.session.state() == crate::session::State::Handshaking {
                actor.advance_handshake();
            }

            if readiness.is_readable() {
                actor.process_readable();
            }
            if !actor.session.is_connected() {
                true
            } else {
                if readiness.is_writable() {
                    actor.process_writable();
                }
                !actor.session.is_connected()
            }
        };

        if disconnected {
            self.remove_session(token);
        }
    }

    fn teardown_session(&self, token: usize) {
        if let Some(mut actor) = self.sessions.get_mut(&token) {
            actor.disconnect();
        }
        self.remove_session(token);
    }

    fn remove_session(&self, token: usize) {
        if let Some((_, actor)) = self.sessions.remove(&token) {
            let _ = actor.session.transport().deregister(&self.poll);
            self.ids.remove(&actor.session.id());
            self.stats.bytes_received.fetch_add(actor.session.stats().bytes_received, Ordering::Relaxed);
            self.stats.bytes_sent.fetch_add(actor.session.stats().bytes_sent, Ordering::Relaxed);
            self.stats.sessions_disconnected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Looks up a session by its public id rather than its internal token.
    pub fn find(&self, id: SessionId) -> Option<usize> {
        self.ids.get(&id).map(|t| *t)
    }

    pub fn send_to(&self, id: SessionId, bytes: &[u8]) -> bool {
        match self.find(id) {
            Some(token) => match self.sessions.get_mut(&token) {
                Some(mut actor) => actor.send_async(bytes),
                None => false,
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct EchoHandler;

    impl Handler for EchoHandler {
        fn on_received(&mut self, session: &mut Session, data: &[u8]) {
            session.send(data);
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn accepts_connections_and_echoes_bytes() {
        let port = free_port();
        let addr = format!("127.0.0.1:{}", port);

        let mut server = Server::new(
            ListenerKind::Tcp,
            ServerOptions::default(),
            SessionOptions::default(),
            Arc::new(|| Box::new(EchoHandler) as Box<dyn Handler>),
            flux::logging::null_logger(),
        )
        .unwrap();
        server.start(&addr).unwrap();

        let client = StdMutex::new(std::net::TcpStream::connect(&addr).unwrap());
        client.lock().unwrap().set_nonblocking(true).unwrap();

        server.poll_once(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(server.session_count(), 1);

        use std::io::Write;
        client.lock().unwrap().write_all(b"ping").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        server.poll_once(Some(Duration::from_millis(100))).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let mut buf = [0u8; 4];
        use std::io::Read;
        let n = client.lock().unwrap().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn stop_disconnects_all_sessions() {
        let port = free_port();
        let addr = format!("127.0.0.1:{}", port);

        let mut server = Server::new(
            ListenerKind::Tcp,
            ServerOptions::default(),
            SessionOptions::default(),
            Arc::new(|| Box::new(EchoHandler) as Box<dyn Handler>),
            flux::logging::null_logger(),
        )
        .unwrap();
        server.start(&addr).unwrap();

        let _client = std::net::TcpStream::connect(&addr).unwrap();
        server.poll_once(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(server.session_count(), 1);

        server.stop();
        assert_eq!(server.session_count(), 0);
        assert!(!server.is_started());
    }
}
