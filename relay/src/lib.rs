#![allow(clippy::too_many_arguments)]

//! Reliable byte-stream servers and clients over TCP, TLS and Unix domain
//! sockets, with HTTP/1.1 and WebSocket (RFC 6455) protocol layers on top.
//!
//! Module order follows the dependency chain: [`buffer`] underlies
//! everything, [`session`] drives one connection, [`server`] owns the
//! listening endpoint and the session registry, [`http`] and [`ws`] are
//! protocol layers built on a session's byte stream, [`cache`] serves static
//! content out of memory, and [`transport`] is the glue that lets a session
//! run over plain TCP, TLS or a local socket.

pub mod buffer;
pub mod cache;
pub mod error;
pub mod http;
pub mod server;
pub mod session;
pub mod transport;
pub mod ws;

pub use buffer::Buffer;
pub use error::{Error, ErrorUtils, Result};
pub use server::{ListenerKind, Server, ServerOptions};
pub use session::{Handler, Session, SessionActor, SessionId, SessionOptions};
pub use transport::Transport;
