//! C4 — HTTP/1.1 request/response codec and incremental parser (§4.4).
//!
//! Only Content-Length framing is supported; chunked transfer-encoding,
//! HTTP/2+, and response streaming of unknown length are explicitly out of
//! scope (§1 Non-goals).

pub mod message;
pub mod parser;
pub mod status;

pub use message::{Request, Response};
pub use parser::ParseStatus;
pub use status::reason_phrase;
