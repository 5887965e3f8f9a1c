//! C7 — Transport bindings.
//!
//! Three concrete session transports share one contract: plain TCP, TLS
//! (authenticated read/write atop the socket, handshake runs before data
//! flows) and a local stream socket. Per §9's design note, this is expressed
//! as a tagged variant with one capability set — `{connect, send, recv,
//! shutdown}` — realised here as the `Transport` enum so `Session`/`Server`
//! stay parametric over which one they're driving without needing a vtable.
//!
//! TLS itself (the handshake, record encryption) is an external collaborator
//! per §6; `rustls` plays that role, driven non-blockingly via its
//! `wants_read`/`wants_write`/`read_tls`/`write_tls`/`process_new_packets`
//! cycle.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;

use mio::net::TcpStream;
use mio_uds::UnixStream;

/// A TCP stream with an in-progress or completed TLS session layered on top.
/// `rustls::Connection` is a concrete enum over the server/client connection
/// types (not an object-safe trait), so it's stored directly rather than
/// behind a `dyn` indirection.
pub struct TlsTransport {
    stream: TcpStream,
    conn: rustls::Connection,
}

impl TlsTransport {
    pub fn new_server(stream: TcpStream, config: Arc<rustls::ServerConfig>) -> io::Result<Self> {
        let conn = rustls::ServerConnection::new(config)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(TlsTransport {
            stream,
            conn: rustls::Connection::Server(conn),
        })
    }

    pub fn new_client(
        stream: TcpStream,
        config: Arc<rustls::ClientConfig>,
        server_name: rustls::ServerName,
    ) -> io::Result<Self> {
        let conn = rustls::ClientConnection::new(config, server_name)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(TlsTransport {
            stream,
            conn: rustls::Connection::Client(conn),
        })
    }

    #[inline]
    pub fn is_handshaking(&mut self) -> bool {
        self.conn.is_handshaking()
    }

    /// Drives the handshake using whatever the socket currently has
    /// available; non-blocking, returns `Ok(true)` once negotiation has
    /// finished. Intended to be called from `on_handshaking` each time the
    /// transport becomes readable or writable until it returns `true`.
    pub fn advance_handshake(&mut self) -> io::Result<bool> {
        if self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }

        if self.conn.wants_read() {
            let read = self.conn.read_tls(&mut self.stream)?;
            if read == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "tls peer closed during handshake"));
            }
            self.conn
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }

        Ok(!self.conn.is_handshaking())
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.conn.read_tls(&mut self.stream) {
            Ok(0) => return Ok(0),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        self.conn
            .process_new_packets()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.conn.reader().read(buf)
    }

    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    /// Best-effort graceful shutdown: send `close_notify` then close the
    /// socket. Failures here are swallowed rather than surfaced (§5).
    pub fn shutdown(&mut self) {
        self.conn.send_close_notify();
        let _ = self.conn.write_tls(&mut self.stream);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    #[inline]
    pub fn raw(&self) -> &TcpStream {
        &self.stream
    }
}

/// Capability set shared by every concrete session transport: connect, send,
/// recv, shutdown (§9).
pub enum Transport {
    Plain(TcpStream),
    Tls(TlsTransport),
    Uds(UnixStream),
}

impl Transport {
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Plain(_) => "tcp",
            Transport::Tls(_) => "tls",
            Transport::Uds(_) => "uds",
        }
    }

    /// `true` for transports that have a TLS handshake to run before data can
    /// flow.
    #[inline]
    pub fn needs_handshake(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(t) => t.recv(buf),
            Transport::Uds(s) => s.read(buf),
        }
    }

    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(t) => t.send(buf),
            Transport::Uds(s) => s.write(buf),
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            Transport::Plain(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Transport::Tls(t) => t.shutdown(),
            Transport::Uds(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
        }
    }

    pub fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.set_nodelay(nodelay),
            Transport::Tls(t) => t.stream.set_nodelay(nodelay),
            Transport::Uds(_) => Ok(()),
        }
    }

    pub fn set_keepalive(&mut self, keepalive: Option<std::time::Duration>) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.set_keepalive(keepalive),
            Transport::Tls(t) => t.stream.set_keepalive(keepalive),
            Transport::Uds(_) => Ok(()),
        }
    }

    /// Registers the transport's raw socket on `poll`. TLS registration is
    /// always against the underlying TCP socket: readiness is a property of
    /// the byte stream, record framing is handled above it.
    pub fn register(&self, poll: &mio::Poll, token: mio::Token, interest: mio::Ready) -> io::Result<()> {
        match self {
            Transport::Plain(s) => poll.register(s, token, interest, mio::PollOpt::edge()),
            Transport::Tls(t) => poll.register(t.raw(), token, interest, mio::PollOpt::edge()),
            Transport::Uds(s) => poll.register(s, token, interest, mio::PollOpt::edge()),
        }
    }

    pub fn reregister(&self, poll: &mio::Poll, token: mio::Token, interest: mio::Ready) -> io::Result<()> {
        match self {
            Transport::Plain(s) => poll.reregister(s, token, interest, mio::PollOpt::edge()),
            Transport::Tls(t) => poll.reregister(t.raw(), token, interest, mio::PollOpt::edge()),
            Transport::Uds(s) => poll.reregister(s, token, interest, mio::PollOpt::edge()),
        }
    }

    pub fn deregister(&self, poll: &mio::Poll) -> io::Result<()> {
        match self {
            Transport::Plain(s) => poll.deregister(s),
            Transport::Tls(t) => poll.deregister(t.raw()),
            Transport::Uds(s) => poll.deregister(s),
        }
    }
}

impl Read for Transport {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }
}
