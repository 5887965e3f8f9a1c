//! C5 — WebSocket engine: upgrade handshake, frame codec, fragmentation and
//! control-frame handling (RFC 6455, §4.5).

pub mod engine;
pub mod frame;
pub mod handshake;

pub use engine::{Event, Receiver, Sender};
pub use frame::{OpCode, DEFAULT_CLOSE_STATUS, HANDSHAKE_GUID};
pub use handshake::{accept_key, build_upgrade_request, try_upgrade, validate_upgrade_response, UpgradeOutcome};

/// Bundles both sides of the per-session WebSocket state (§3 "WebSocket
/// engine state (per session)"): a `Sender` for frame construction and a
/// `Receiver` for incremental frame/message assembly, plus whether the
/// upgrade handshake has completed.
pub struct WebSocket {
    pub sender: Sender,
    pub receiver: Receiver,
    pub handshaked: bool,
}

impl WebSocket {
    pub fn new(is_client: bool) -> WebSocket {
        WebSocket {
            sender: Sender::new(is_client),
            receiver: Receiver::new(),
            handshaked: false,
        }
    }
}
