//! C2 — Session I/O engine.
//!
//! Drives a single connection's non-blocking read loop, write-coalescing,
//! backpressure and statistics (§4.2): buffered read/write against a
//! `mio`-registered stream, a `close`/`open` lifecycle, per-session logging
//! at `trace!` for each I/O step, generalised over the tagged `Transport`
//! enum (§9) rather than a single hardcoded `TcpStream`, with a plain
//! double-buffered send queue instead of any message framing of its own.
//!
//! Callbacks are not stored on `Session` itself: a `Session` plus its
//! `Box<dyn Handler>` live together in a `SessionActor`, which destructures
//! the two apart before invoking a callback so the handler can freely call
//! back into the session (`send`, `request_disconnect`, …) without the borrow
//! checker treating that as re-entering `self`.
//!
//! Actual teardown (`SessionActor::teardown`) needs both halves — it fires
//! `on_disconnecting`/`on_disconnected` on the `Handler` — so it isn't
//! reachable from a callback that only holds `&mut Session`. Instead
//! `Session::request_disconnect` raises a flag that `SessionActor` checks
//! right after every callback returns, satisfying "disconnect from within a
//! callback is legal" (§4.2, §5) without handing the handler a teardown path
//! that could reenter itself mid-callback.

use std::io::{self, ErrorKind};
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::buffer::Buffer;
use crate::error::{is_transient, Error, Result};
use crate::transport::Transport;

pub type SessionId = Uuid;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    Handshaking,
    Handshaked,
    Disconnecting,
}

/// Per-session tuning knobs (§3 Session attributes).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub initial_receive_buffer_size: usize,
    pub initial_send_buffer_size: usize,
    pub receive_buffer_limit: Option<usize>,
    pub send_buffer_limit: Option<usize>,
    pub keep_alive: bool,
    pub no_delay: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            initial_receive_buffer_size: 8192,
            initial_send_buffer_size: 8192,
            receive_buffer_limit: None,
            send_buffer_limit: None,
            keep_alive: false,
            no_delay: false,
        }
    }
}

/// Per-session counters, atomically folded into the owning server's aggregate
/// counters (§4.2 Statistics).
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub bytes_pending: u64,
    pub bytes_sending: u64,
}

/// Observable hooks a session drives as it moves through its lifecycle and
/// processes I/O (§4.2 public contract). Every method has a no-op default so
/// implementors only override what they need.
#[allow(unused_variables)]
pub trait Handler: Send {
    fn on_connecting(&mut self, session: &mut Session) {}
    fn on_connected(&mut self, session: &mut Session) {}
    fn on_handshaking(&mut self, session: &mut Session) {}
    fn on_handshaked(&mut self, session: &mut Session) {}
    fn on_disconnecting(&mut self, session: &mut Session) {}
    fn on_disconnected(&mut self, session: &mut Session) {}
    fn on_received(&mut self, session: &mut Session, data: &[u8]) {}
    fn on_sent(&mut self, session: &mut Session, sent: usize, pending: usize) {}
    fn on_empty(&mut self, session: &mut Session) {}
    fn on_error(&mut self, session: &mut Session, error: Error) {}
}

/// The session's own plumbing: transport, buffers, flags and statistics.
/// Owned jointly with a `Handler` by `SessionActor`.
pub struct Session {
    id: SessionId,
    transport: Transport,
    state: State,
    options: SessionOptions,

    receive_buffer: Buffer,

    send_lock: Mutex<()>,
    send_main: Buffer,
    send_flush: Buffer,
    flush_offset: usize,

    sending: bool,
    receiving: bool,
    disconnecting: bool,
    disconnect_requested: bool,

    stats: Stats,
    log: slog::Logger,
}

impl Session {
    pub fn new(transport: Transport, options: SessionOptions, log: slog::Logger) -> Session {
        let id = Uuid::new_v4();
        let log = log.new(slog::o!("session_id" => id.to_string()));

        let mut transport = transport;
        let _ = transport.set_nodelay(options.no_delay);
        if options.keep_alive {
            let _ = transport.set_keepalive(Some(Duration::from_secs(30)));
        }

        let initial_state = if transport.needs_handshake() {
            State::Handshaking
        } else {
            State::Connected
        };

        Session {
            id,
            receive_buffer: Buffer::with_capacity(options.initial_receive_buffer_size),
            send_main: Buffer::with_capacity(options.initial_send_buffer_size),
            send_flush: Buffer::with_capacity(options.initial_send_buffer_size),
            flush_offset: 0,
            transport,
            state: initial_state,
            options,
            sending: false,
            receiving: false,
            disconnecting: false,
            disconnect_requested: false,
            stats: Stats::default(),
            log,
        }
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected | State::Handshaked)
    }

    #[inline]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    #[inline]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    #[inline]
    pub fn logger(&self) -> &slog::Logger {
        &self.log
    }

    /// Synchronous send: writes as much of `bytes` directly to the transport
    /// as it will accept right now. Returns the number of bytes written, 0 on
    /// failure (§4.2).
    pub fn send(&mut self, bytes: &[u8]) -> usize {
        if !self.is_connected() {
            return 0;
        }
        match self.transport.send(bytes) {
            Ok(n) => {
                self.stats.bytes_sent += n as u64;
                n
            }
            Err(_) => 0,
        }
    }

    /// Requests that the owning `SessionActor` tear this session down once
    /// the current callback returns. `Session` alone can't run teardown — it
    /// needs the `Handler` to fire `on_disconnecting`/`on_disconnected` — so
    /// this just raises a flag `SessionActor` honors after every callback
    /// (§4.2 "disconnect from within a callback is legal").
    #[inline]
    pub fn request_disconnect(&mut self) {
        self.disconnect_requested = true;
    }

    #[inline]
    fn take_disconnect_request(&mut self) -> bool {
        std::mem::take(&mut self.disconnect_requested)
    }

    /// Synchronous receive: reads up to `buf.len()` bytes directly from the
    /// transport.
    pub fn receive(&mut self, buf: &mut [u8]) -> usize {
        if !self.is_connected() {
            return 0;
        }
        match self.transport.recv(buf) {
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                n
            }
            Err(_) => 0,
        }
    }

    /// Enqueues `bytes` on the send-coalescing main buffer. Returns `false`
    /// only if the session is disconnected or the configured send-buffer
    /// limit would be exceeded (§4.2 Backpressure) — never blocks.
    fn enqueue(&mut self, bytes: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let _guard = self.send_lock.lock();

        if let Some(limit) = self.options.send_buffer_limit {
            if limit > 0 && self.send_main.size() + bytes.len() > limit {
                return false;
            }
        }

        self.send_main.append(bytes);
        self.sending = true;
        self.stats.bytes_pending = self.send_main.size() as u64;
        true
    }

    /// Attempts to move data from `main` to `flush` and push it to the
    /// transport. Returns `(bytes_written, now_empty)`.
    fn try_send(&mut self) -> (usize, bool) {
        {
            let _guard = self.send_lock.lock();
            if self.send_flush.is_empty() && !self.send_main.is_empty() {
                std::mem::swap(&mut self.send_main, &mut self.send_flush);
                self.send_main.clear();
                self.flush_offset = 0;
                self.stats.bytes_pending = 0;
                self.stats.bytes_sending = self.send_flush.size() as u64;
            }
        }

        if self.send_flush.is_empty() {
            let empty = self.send_main.is_empty();
            if empty {
                self.sending = false;
            }
            return (0, empty);
        }

        let unsent = &self.send_flush.data()[self.flush_offset..];
        match self.transport.send(unsent) {
            Ok(n) => {
                self.flush_offset += n;
                self.stats.bytes_sent += n as u64;

                if self.flush_offset >= self.send_flush.size() {
                    self.send_flush.clear();
                    self.flush_offset = 0;
                    self.stats.bytes_sending = 0;

                    let (more, empty) = self.try_send_after_drain();
                    return (n + more, empty);
                }
                (n, false)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => (0, false),
            Err(_) => (0, false),
        }
    }

    fn try_send_after_drain(&mut self) -> (usize, bool) {
        let _guard = self.send_lock.lock();
        if self.send_main.is_empty() {
            self.sending = false;
            (0, true)
        } else {
            drop(_guard);
            self.try_send()
        }
    }
}

/// Bundles a `Session` with the `Handler` driving it, and is the type actually
/// registered with a `Server`/poll loop. See the module doc for why callbacks
/// don't live on `Session` itself.
pub struct SessionActor {
    pub session: Session,
    pub handler: Box<dyn Handler>,
}

impl SessionActor {
    pub fn new(session: Session, handler: Box<dyn Handler>) -> SessionActor {
        SessionActor { session, handler }
    }

    /// Runs the connection-established and (if applicable) TLS-handshake
    /// transitions, firing the matching callbacks.
    pub fn connect(&mut self) {
        let SessionActor { session, handler } = self;
        slog::trace!(session.log, "connecting"; "kind" => session.transport.kind());
        handler.on_connecting(session);
        if Self::honor_disconnect_request(session, handler) {
            return;
        }

        if session.transport.needs_handshake() {
            session.state = State::Handshaking;
            handler.on_handshaking(session);
        } else {
            session.state = State::Connected;
            handler.on_connected(session);
        }
        Self::honor_disconnect_request(session, handler);
    }

    /// Drives the TLS handshake forward by one step. No-op for non-TLS
    /// transports. Returns `true` once the session has reached `Handshaked`
    /// (or immediately for transports with no handshake).
    pub fn advance_handshake(&mut self) -> bool {
        let SessionActor { session, handler } = self;

        if session.state != State::Handshaking {
            return true;
        }

        let result = match &mut session.transport {
            Transport::Tls(tls) => tls.advance_handshake(),
            _ => Ok(true),
        };

        match result {
            Ok(true) => {
                session.state = State::Handshaked;
                handler.on_handshaked(session);
                Self::honor_disconnect_request(session, handler);
                true
            }
            Ok(false) => false,
            Err(e) if is_transient(e.kind()) || e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                handler.on_error(session, Error::from(e));
                Self::teardown(session, handler, false);
                true
            }
        }
    }

    /// `send` forwarded to the underlying session (see `Session::send`).
    #[inline]
    pub fn send(&mut self, bytes: &[u8]) -> usize {
        self.session.send(bytes)
    }

    /// Queues `bytes` for asynchronous delivery and kicks the send loop.
    /// Mirrors §4.2's `send_async`/`try_send` split.
    pub fn send_async(&mut self, bytes: &[u8]) -> bool {
        if !self.session.enqueue(bytes) {
            return false;
        }
        self.pump_send();
        true
    }

    /// Primes an asynchronous read: if the session isn't already mid-read,
    /// marks it as receiving so the next readable event is serviced.
    pub fn receive_async(&mut self) {
        self.session.receiving = true;
    }

    /// Called by the owning reactor when the transport becomes readable.
    /// Implements the receive loop of §4.2: reads until `WouldBlock`, doubles
    /// the receive buffer on a full read (bounded by `receive_buffer_limit`),
    /// and disconnects on peer close or receive-buffer exhaustion.
    pub fn process_readable(&mut self) {
        let SessionActor { session, handler } = self;

        if session.state == State::Handshaking {
            return;
        }

        loop {
            // Pull the receive buffer out of `session` so its tail capacity
            // can be read into directly (`Buffer::ingress`) while still being
            // free to hand `session` to the handler below.
            let mut buf = std::mem::take(&mut session.receive_buffer);
            buf.clear();
            let capacity = buf.capacity().max(session.options.initial_receive_buffer_size);

            let n = match buf.ingress(&mut session.transport, capacity) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    session.receive_buffer = buf;
                    break;
                }
                Err(e) => {
                    session.receive_buffer = buf;
                    if !is_transient(e.kind()) {
                        handler.on_error(session, Error::from(e));
                    }
                    Self::teardown(session, handler, false);
                    return;
                }
            };

            if n == 0 {
                // Peer closed the connection.
                session.receive_buffer = buf;
                Self::teardown(session, handler, false);
                return;
            }

            session.stats.bytes_received += n as u64;
            handler.on_received(session, buf.unread());
            session.receive_buffer = buf;

            if Self::honor_disconnect_request(session, handler) {
                return;
            }

            if n == capacity {
                let doubled = capacity * 2;
                if let Some(limit) = session.options.receive_buffer_limit {
                    if doubled > limit {
                        handler.on_error(session, Error::NoBufferSpace);
                        Self::teardown(session, handler, false);
                        return;
                    }
                }
                session.receive_buffer.reserve(doubled);
            } else {
                // Short read: no more data pending right now.
                break;
            }
        }
    }

    /// Called by the owning reactor when the transport becomes writable.
    /// Drains `send_flush`/`send_main`, firing `on_sent` after every partial
    /// write and `on_empty` once both buffers are drained.
    pub fn process_writable(&mut self) {
        let SessionActor { session, handler } = self;

        if session.state == State::Handshaking {
            return;
        }

        loop {
            let (written, empty) = session.try_send();

            if written > 0 {
                let pending = session.send_main.size() + session.send_flush.size();
                handler.on_sent(session, written, pending);
                if Self::honor_disconnect_request(session, handler) {
                    return;
                }
            }

            if empty {
                if written == 0 {
                    break;
                }
                handler.on_empty(session);
                Self::honor_disconnect_request(session, handler);
                break;
            }

            if written == 0 {
                break;
            }
        }
    }

    /// Idempotent disconnect: safe to call from within any callback or from
    /// an external thread (§4.2, testable property 10). Returns `true` the
    /// first time it actually tears the session down, `false` on any
    /// subsequent call.
    pub fn disconnect(&mut self) -> bool {
        let SessionActor { session, handler } = self;
        Self::teardown(session, handler, true)
    }

    /// Tears the session down if the `Handler` called `Session::request_disconnect`
    /// during the callback that just returned. Returns `true` if it did (and
    /// the caller should stop touching the session/transport any further).
    fn honor_disconnect_request(session: &mut Session, handler: &mut Box<dyn Handler>) -> bool {
        if session.take_disconnect_request() {
            Self::teardown(session, handler, true);
            true
        } else {
            false
        }
    }

    fn teardown(session: &mut Session, handler: &mut Box<dyn Handler>, explicit: bool) -> bool {
        if session.state == State::Disconnected || session.disconnecting {
            return false;
        }
        session.disconnecting = true;
        session.state = State::Disconnecting;
        slog::trace!(session.log, "disconnecting"; "bytes_received" => session.stats.bytes_received, "bytes_sent" => session.stats.bytes_sent);
        handler.on_disconnecting(session);

        session.transport.shutdown();
        session.send_main.clear();
        session.send_flush.clear();
        session.flush_offset = 0;
        session.sending = false;
        session.receiving = false;

        session.state = State::Disconnected;
        handler.on_disconnected(session);

        let _ = explicit;
        true
    }

    fn pump_send(&mut self) {
        self.process_writable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback_pair() -> (mio::net::TcpStream, mio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        client.set_nonblocking(true).unwrap();
        (
            mio::net::TcpStream::from_stream(server).unwrap(),
            mio::net::TcpStream::from_stream(client).unwrap(),
        )
    }

    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct Recorded {
        received: Vec<u8>,
        connected: bool,
        disconnected_count: u32,
    }

    struct RecordingHandler {
        recorded: Arc<StdMutex<Recorded>>,
    }

    impl Handler for RecordingHandler {
        fn on_connected(&mut self, _session: &mut Session) {
            self.recorded.lock().unwrap().connected = true;
        }
        fn on_received(&mut self, _session: &mut Session, data: &[u8]) {
            self.recorded.lock().unwrap().received.extend_from_slice(data);
        }
        fn on_disconnected(&mut self, _session: &mut Session) {
            self.recorded.lock().unwrap().disconnected_count += 1;
        }
    }

    #[test]
    fn receive_loop_delivers_bytes_and_updates_counters() {
        let (server_stream, mut client_stream) = loopback_pair();
        let recorded = Arc::new(StdMutex::new(Recorded::default()));

        let session = Session::new(Transport::Plain(server_stream), SessionOptions::default(), flux::logging::null_logger());
        let mut actor = SessionActor::new(session, Box::new(RecordingHandler { recorded: recorded.clone() }));
        actor.connect();
        assert!(recorded.lock().unwrap().connected);

        use std::io::Write;
        client_stream.write_all(b"ping").unwrap();

        // Give the non-blocking loopback socket a moment to become readable.
        std::thread::sleep(std::time::Duration::from_millis(20));
        actor.process_readable();

        assert_eq!(recorded.lock().unwrap().received, b"ping");
        assert_eq!(actor.session.stats().bytes_received, 4);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (server_stream, _client_stream) = loopback_pair();
        let recorded = Arc::new(StdMutex::new(Recorded::default()));
        let session = Session::new(Transport::Plain(server_stream), SessionOptions::default(), flux::logging::null_logger());
        let mut actor = SessionActor::new(session, Box::new(RecordingHandler { recorded: recorded.clone() }));
        actor.connect();

        assert!(actor.disconnect());
        assert!(!actor.disconnect());
        assert_eq!(recorded.lock().unwrap().disconnected_count, 1);
    }

    struct DisconnectOnReceiveHandler {
        recorded: Arc<StdMutex<Recorded>>,
    }

    impl Handler for DisconnectOnReceiveHandler {
        fn on_received(&mut self, session: &mut Session, data: &[u8]) {
            self.recorded.lock().unwrap().received.extend_from_slice(data);
            session.request_disconnect();
        }
        fn on_disconnected(&mut self, _session: &mut Session) {
            self.recorded.lock().unwrap().disconnected_count += 1;
        }
    }

    #[test]
    fn handler_can_request_disconnect_from_on_received() {
        let (server_stream, mut client_stream) = loopback_pair();
        let recorded = Arc::new(StdMutex::new(Recorded::default()));
        let session = Session::new(Transport::Plain(server_stream), SessionOptions::default(), flux::logging::null_logger());
        let mut actor = SessionActor::new(session, Box::new(DisconnectOnReceiveHandler { recorded: recorded.clone() }));
        actor.connect();

        use std::io::Write;
        client_stream.write_all(b"bad request").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        actor.process_readable();

        assert_eq!(recorded.lock().unwrap().received, b"bad request");
        assert_eq!(recorded.lock().unwrap().disconnected_count, 1);
        assert!(!actor.session.is_connected());
    }
}
