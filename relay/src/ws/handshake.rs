//! WebSocket upgrade handshake, both sides (§4.5). `Sec-WebSocket-Accept`
//! computation is `Sha1::new()/update()/digest().bytes()` piped through
//! `base64::encode_config_slice`.

use rand::RngCore;
use sha1::Sha1;

use crate::http::{Request, Response};
use crate::ws::frame::HANDSHAKE_GUID;

/// Computes `Sec-WebSocket-Accept` for a given `Sec-WebSocket-Key` (§8
/// property 6).
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    base64::encode(hasher.digest().bytes())
}

fn header_contains_token(value: &str, token: &str) -> bool {
    value.split(',').any(|part| part.trim().eq_ignore_ascii_case(token))
}

pub enum UpgradeOutcome {
    /// All four required headers were present and well-formed.
    Accepted(Response),
    /// At least one required header was present but malformed or missing a
    /// sibling header.
    Rejected(Response),
    /// None of the four upgrade headers were present — not a WebSocket
    /// request at all; fall through to normal HTTP handling.
    NotAWebSocketRequest,
}

/// Server side of §4.5's "Server upgrade". Required headers are matched
/// case-insensitively.
pub fn try_upgrade(request: &Request) -> UpgradeOutcome {
    let connection = request.header("Connection");
    let upgrade = request.header("Upgrade");
    let key = request.header("Sec-WebSocket-Key");
    let version = request.header("Sec-WebSocket-Version");

    if connection.is_none() && upgrade.is_none() && key.is_none() && version.is_none() {
        return UpgradeOutcome::NotAWebSocketRequest;
    }

    let connection_ok = connection.map_or(false, |v| header_contains_token(v, "Upgrade"));
    let upgrade_ok = upgrade.map_or(false, |v| v.eq_ignore_ascii_case("websocket"));
    let key = match key.filter(|k| !k.is_empty()) {
        Some(k) => k,
        None => return UpgradeOutcome::Rejected(Response::make_error_response(400, "missing Sec-WebSocket-Key")),
    };
    let version_ok = version.map_or(false, |v| v == "13");

    if !connection_ok {
        return UpgradeOutcome::Rejected(Response::make_error_response(400, "missing Connection: Upgrade"));
    }
    if !upgrade_ok {
        return UpgradeOutcome::Rejected(Response::make_error_response(400, "missing Upgrade: websocket"));
    }
    if !version_ok {
        return UpgradeOutcome::Rejected(Response::make_error_response(400, "unsupported Sec-WebSocket-Version"));
    }

    let mut response = Response::new();
    response.set_begin(101, None);
    response.set_header("Connection", "Upgrade");
    response.set_header("Upgrade", "websocket");
    response.set_header("Sec-WebSocket-Accept", &accept_key(key));
    response.end_headers();

    UpgradeOutcome::Accepted(response)
}

/// Client side of §4.5's "Client upgrade": builds the upgrade request and
/// returns the nonce so the 101 response can be validated against it.
pub fn build_upgrade_request(host: &str, path: &str) -> (Request, String) {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let key = base64::encode(nonce);

    let mut request = Request::new();
    request.set_begin("GET", path, "HTTP/1.1");
    request.set_header("Host", host);
    request.set_header("Connection", "Upgrade");
    request.set_header("Upgrade", "websocket");
    request.set_header("Sec-WebSocket-Key", &key);
    request.set_header("Sec-WebSocket-Version", "13");
    request.end_headers();

    (request, key)
}

/// Validates a server's 101 response against the nonce used in the request.
pub fn validate_upgrade_response(response: &Response, request_key: &str) -> Result<(), &'static str> {
    if response.status != 101 {
        return Err("server did not return 101 Switching Protocols");
    }
    let connection = response.header("Connection").ok_or("missing Connection header")?;
    if !header_contains_token(connection, "Upgrade") {
        return Err("missing Connection: Upgrade");
    }
    let upgrade = response.header("Upgrade").ok_or("missing Upgrade header")?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err("missing Upgrade: websocket");
    }
    let accept = response.header("Sec-WebSocket-Accept").ok_or("missing Sec-WebSocket-Accept")?;
    if accept != accept_key(request_key) {
        return Err("Sec-WebSocket-Accept does not match the request key");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn server_accepts_a_well_formed_upgrade() {
        let mut req = Request::new();
        req.set_begin("GET", "/chat", "HTTP/1.1");
        req.set_header("Connection", "Upgrade");
        req.set_header("Upgrade", "websocket");
        req.set_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        req.set_header("Sec-WebSocket-Version", "13");
        req.end_headers();

        match try_upgrade(&req) {
            UpgradeOutcome::Accepted(resp) => {
                assert_eq!(resp.status, 101);
                assert_eq!(resp.header("Sec-WebSocket-Accept"), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
            }
            _ => panic!("expected acceptance"),
        }
    }

    #[test]
    fn non_websocket_request_falls_through() {
        let mut req = Request::new();
        req.set_begin("GET", "/", "HTTP/1.1");
        req.end_headers();
        assert!(matches!(try_upgrade(&req), UpgradeOutcome::NotAWebSocketRequest));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut req = Request::new();
        req.set_begin("GET", "/chat", "HTTP/1.1");
        req.set_header("Connection", "Upgrade");
        req.set_header("Upgrade", "websocket");
        req.set_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        req.set_header("Sec-WebSocket-Version", "8");
        req.end_headers();

        match try_upgrade(&req) {
            UpgradeOutcome::Rejected(resp) => assert_eq!(resp.status, 400),
            _ => panic!("expected rejection"),
        }
    }
}
