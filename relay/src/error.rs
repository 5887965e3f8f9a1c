//! Error taxonomy for the whole crate: a `Wait` variant for conditions that
//! simply mean "try again later" (never surfaced to applications) and a
//! `Fatal` variant carrying the concrete reason.

use std::fmt;
use std::io;
use std::net::AddrParseError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Not really an error: the operation would block and should be retried
    /// once the reactor reports readiness again. Never delivered via
    /// `on_error`.
    Wait,
    /// A precondition was violated by the caller (out-of-range buffer offset,
    /// negative capacity, disconnected-channel misuse). This is a
    /// programmer error, not reported through `on_error`.
    Misuse(&'static str),
    /// Resource exhaustion: a configured buffer limit was exceeded.
    NoBufferSpace,
    /// Malformed HTTP request/response framing.
    HttpProtocol(&'static str),
    /// Malformed or unsupported WebSocket handshake or frame.
    WebSocketProtocol(&'static str),
    /// Underlying I/O failure that isn't one of the transient conditions
    /// folded into disconnects by the session engine.
    Io(io::ErrorKind),
    /// Listener address failed to parse.
    AddrParse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Wait => write!(f, "operation would block"),
            Error::Misuse(msg) => write!(f, "misuse: {}", msg),
            Error::NoBufferSpace => write!(f, "no buffer space available"),
            Error::HttpProtocol(msg) => write!(f, "http protocol error: {}", msg),
            Error::WebSocketProtocol(msg) => write!(f, "websocket protocol error: {}", msg),
            Error::Io(kind) => write!(f, "io error: {:?}", kind),
            Error::AddrParse => write!(f, "failed to parse bind address"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Error::Wait,
            kind => Error::Io(kind),
        }
    }
}

impl From<AddrParseError> for Error {
    #[inline]
    fn from(_: AddrParseError) -> Self {
        Error::AddrParse
    }
}

/// Classifies the transient socket conditions (§7) that cause a quiet
/// disconnect rather than an `on_error` callback.
#[inline]
pub fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Lets call sites ask "did this actually fail" without treating `Wait` as
/// a failure.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for Result<T> {
    #[inline]
    fn has_failed(&self) -> bool {
        !matches!(self, Ok(_) | Err(Error::Wait))
    }
}
