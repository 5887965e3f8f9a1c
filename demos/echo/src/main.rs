//! Illustrative HTTP + WebSocket echo server wired through the static file
//! cache. Not part of the core toolkit — a small demonstration of how the
//! pieces in `relay` compose.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use relay::cache::{self, FileCache};
use relay::http::{ParseStatus, Request};
use relay::server::{ListenerKind, Server, ServerOptions};
use relay::session::{Handler, Session, SessionOptions};
use relay::ws::{self, Event, OpCode, WebSocket};

struct EchoHandler {
    cache: Arc<FileCache>,
    request: Request,
    socket: Option<WebSocket>,
}

impl EchoHandler {
    fn new(cache: Arc<FileCache>) -> EchoHandler {
        EchoHandler {
            cache,
            request: Request::new(),
            socket: None,
        }
    }

    fn handle_request(&mut self, session: &mut Session) {
        match ws::try_upgrade(&self.request) {
            ws::UpgradeOutcome::Accepted(response) => {
                session.send(response.cache().data());
                self.socket = Some(WebSocket::new(false));
            }
            ws::UpgradeOutcome::Rejected(response) => {
                session.send(response.cache().data());
            }
            ws::UpgradeOutcome::NotAWebSocketRequest => {
                self.serve_static(session);
            }
        }
        self.request.reset();
    }

    fn serve_static(&mut self, session: &mut Session) {
        match self.cache.find(&self.request.url) {
            Some(bytes) => session.send(&bytes),
            None => {
                let response = relay::http::Response::make_error_response(404, "not found");
                session.send(response.cache().data());
            }
        };
    }
}

impl Handler for EchoHandler {
    fn on_received(&mut self, session: &mut Session, data: &[u8]) {
        if let Some(socket) = &mut self.socket {
            let events = match socket.receiver.receive(data) {
                Ok(events) => events,
                Err(_) => {
                    session.request_disconnect();
                    return;
                }
            };

            for event in events {
                match event {
                    Event::Message(OpCode::Text, bytes) => {
                        let reply = socket.sender.text(&String::from_utf8_lossy(&bytes));
                        session.send(&reply);
                    }
                    Event::Message(_, bytes) => {
                        let reply = socket.sender.binary(&bytes);
                        session.send(&reply);
                    }
                    Event::Ping(payload) => {
                        let reply = socket.sender.pong(&payload);
                        session.send(&reply);
                    }
                    Event::Pong(_) => {}
                    Event::Close(status, reason) => {
                        let reply = socket.sender.close(status, &reason);
                        session.send(&reply);
                        session.request_disconnect();
                    }
                }
            }
            return;
        }

        match self.request.receive(data) {
            ParseStatus::Complete => self.handle_request(session),
            ParseStatus::Incomplete => {}
            ParseStatus::Error(reason) => {
                let response = relay::http::Response::make_error_response(400, reason);
                session.send(response.cache().data());
                session.request_disconnect();
            }
        }
    }

    fn on_disconnected(&mut self, _session: &mut Session) {
        self.request.finalize_pending_body();
    }
}

fn insert_handler() -> cache::InsertHandler {
    Arc::new(|cache, key, bytes, ttl| {
        let mut response = relay::http::Response::new();
        response.set_begin(200, None);
        response.set_content_type(&cache::content_type_for(Path::new(key)));
        if let Some(ttl) = ttl {
            response.set_header("Cache-Control", &format!("max-age={}", ttl.as_secs()));
        }
        response.set_body_bytes(&bytes);
        cache.add(key, response.cache().data().to_vec(), ttl);
    })
}

fn main() -> relay::Result<()> {
    let log = flux::logging::root_logger();
    let cache = FileCache::new(log.clone());

    let www_root = std::env::args().nth(1).unwrap_or_else(|| "./www".to_string());
    cache.insert_path(Path::new(&www_root), "/", None, Some(Duration::from_secs(60)), insert_handler());

    let cache_for_handler = cache.clone();
    let mut server = Server::new(
        ListenerKind::Tcp,
        ServerOptions::default(),
        SessionOptions::default(),
        Arc::new(move || Box::new(EchoHandler::new(cache_for_handler.clone())) as Box<dyn Handler>),
        log.clone(),
    )?;

    server.start("127.0.0.1:9000")?;
    slog::info!(log, "listening"; "address" => "127.0.0.1:9000");

    loop {
        server.poll_once(Some(Duration::from_millis(200)))?;
    }
}
