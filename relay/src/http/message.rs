//! HTTP/1.1 request and response messages (§3, §4.4).
//!
//! Both types share the same idea: a single backing buffer (`cache`) holds
//! the byte-exact on-wire
//! form, built up incrementally whether the message is being constructed
//! locally for sending or accumulated from received bytes. `set_begin` /
//! `set_header` / `set_body*` append to `cache` directly; `receive` appends
//! inbound bytes and re-scans for the header terminator.

use crate::buffer::Buffer;
use crate::http::parser::{self, header_get, ParseStatus};
use crate::http::status::reason_phrase;

const BODYLESS_METHODS: [&str; 4] = ["GET", "HEAD", "OPTIONS", "TRACE"];

fn is_bodyless_method(method: &str) -> bool {
    BODYLESS_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// An HTTP/1.1 request, either being built for sending or accumulated from
/// a peer.
#[derive(Debug, Default)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub protocol: String,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    cache: Buffer,
    parsed_until: usize,
    headers_parsed: bool,
    body_offset: usize,
    body_size: usize,
    content_length: Option<usize>,
    pub error: Option<&'static str>,
    cookie_tail: Option<usize>,
}

impl Request {
    pub fn new() -> Request {
        Request::default()
    }

    pub fn reset(&mut self) {
        *self = Request::default();
    }

    // --- construction -----------------------------------------------------

    pub fn set_begin(&mut self, method: &str, url: &str, protocol: &str) {
        self.method = method.to_string();
        self.url = url.to_string();
        self.protocol = protocol.to_string();
        self.cache.append_str(method);
        self.cache.append_str(" ");
        self.cache.append_str(url);
        self.cache.append_str(" ");
        self.cache.append_str(protocol);
        self.cache.append_str("\r\n");
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.cache.append_str(name);
        self.cache.append_str(": ");
        self.cache.append_str(value);
        self.cache.append_str("\r\n");
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Writes a `Cookie: name=value` header. A following `add_cookie` call
    /// extends this same header line, matching how a caller accumulates
    /// multiple cookies into one request.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        let value_line = format!("{}={}", name, value);
        self.cache.append_str("Cookie: ");
        self.cache.append_str(&value_line);
        self.cache.append_str("\r\n");
        self.cookie_tail = Some(self.cache.size());
        self.headers.push(("Cookie".to_string(), value_line));
        self.cookies.push((name.to_string(), value.to_string()));
    }

    /// Appends `; name=value` to the most recently written Cookie header.
    /// Must be called before any other header or body is written after
    /// `set_cookie`.
    pub fn add_cookie(&mut self, name: &str, value: &str) {
        let tail = match self.cookie_tail {
            Some(t) => t,
            None => return self.set_cookie(name, value),
        };
        let _ = self.cache.remove(tail - 2, 2);
        let addition = format!("; {}={}", name, value);
        self.cache.append_str(&addition);
        self.cache.append_str("\r\n");
        self.cookie_tail = Some(self.cache.size());

        if let Some(last) = self.headers.iter_mut().rev().find(|(k, _)| k.eq_ignore_ascii_case("cookie")) {
            last.1.push_str(&addition);
        }
        self.cookies.push((name.to_string(), value.to_string()));
    }

    pub fn set_body_bytes(&mut self, bytes: &[u8]) {
        self.set_header("Content-Length", &bytes.len().to_string());
        self.cache.append_str("\r\n");
        self.body_offset = self.cache.size();
        self.cache.append(bytes);
        self.body_size = bytes.len();
        self.content_length = Some(bytes.len());
    }

    pub fn set_body_text(&mut self, text: &str) {
        self.set_body_bytes(text.as_bytes());
    }

    pub fn set_body_buffer(&mut self, buffer: &Buffer) {
        self.set_body_bytes(buffer.data());
    }

    /// Terminates the header block for a bodyless request.
    pub fn end_headers(&mut self) {
        self.cache.append_str("\r\n");
        self.body_offset = self.cache.size();
        self.body_size = 0;
    }

    // --- accessors ---------------------------------------------------------

    #[inline]
    pub fn cache(&self) -> &Buffer {
        &self.cache
    }

    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[inline]
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.cache.data()[self.body_offset..self.body_offset + self.body_size]
    }

    #[inline]
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    // --- parsing -------------------------------------------------------

    /// Appends inbound bytes and advances parsing. Safe to call repeatedly
    /// as more bytes arrive (§4.4 incremental parsing).
    pub fn receive(&mut self, bytes: &[u8]) -> ParseStatus {
        self.cache.append(bytes);

        if !self.headers_parsed {
            let term = match parser::find_terminator(&self.cache, self.parsed_until) {
                Some(t) => t,
                None => {
                    self.parsed_until = self.cache.size();
                    return ParseStatus::Incomplete;
                }
            };

            let head = match parser::parse_head(&self.cache, term) {
                Ok(h) => h,
                Err(reason) => {
                    self.error = Some(reason);
                    return ParseStatus::Error(reason);
                }
            };

            self.method = head.token_a;
            self.url = head.token_b;
            self.protocol = head.token_c;
            self.headers = head.headers;
            self.cookies = head.cookies;
            self.content_length = head.content_length;
            self.headers_parsed = true;
            self.body_offset = term + 4;
            self.body_size = self.cache.size().saturating_sub(self.body_offset);
        }

        if is_bodyless_method(&self.method) {
            self.body_size = 0;
            return ParseStatus::Complete;
        }

        self.body_size = self.cache.size() - self.body_offset;

        match self.content_length {
            Some(len) if self.body_size >= len => {
                self.body_size = len;
                ParseStatus::Complete
            }
            Some(_) => ParseStatus::Incomplete,
            // No Content-Length on a method that could carry a body: per
            // spec this stays pending until the connection closes.
            None => ParseStatus::Incomplete,
        }
    }

    /// Called when the owning session disconnects while a body-less
    /// Content-Length-less request is still pending (§4.4 "a pending body is
    /// finalized and delivered").
    pub fn finalize_pending_body(&mut self) {
        if self.headers_parsed && self.content_length.is_none() {
            self.body_size = self.cache.size() - self.body_offset;
        }
    }

    #[inline]
    pub fn is_headers_complete(&self) -> bool {
        self.headers_parsed
    }
}

/// An HTTP/1.1 response, either being built for sending or accumulated from
/// a peer.
#[derive(Debug, Default)]
pub struct Response {
    pub protocol: String,
    pub status: u16,
    pub phrase: String,
    headers: Vec<(String, String)>,
    cache: Buffer,
    parsed_until: usize,
    headers_parsed: bool,
    body_offset: usize,
    body_size: usize,
    content_length: Option<usize>,
    pub error: Option<&'static str>,
}

impl Response {
    pub fn new() -> Response {
        Response::default()
    }

    pub fn reset(&mut self) {
        *self = Response::default();
    }

    pub fn set_begin(&mut self, status: u16, phrase: Option<&str>) {
        let phrase = phrase.map(str::to_string).unwrap_or_else(|| reason_phrase(status).to_string());
        self.protocol = "HTTP/1.1".to_string();
        self.status = status;
        self.phrase = phrase;
        self.cache.append_str("HTTP/1.1 ");
        self.cache.append_str(&status.to_string());
        self.cache.append_str(" ");
        self.cache.append_str(&self.phrase);
        self.cache.append_str("\r\n");
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.cache.append_str(name);
        self.cache.append_str(": ");
        self.cache.append_str(value);
        self.cache.append_str("\r\n");
        self.headers.push((name.to_string(), value.to_string()));
    }

    #[inline]
    pub fn set_content_type(&mut self, mime: &str) {
        self.set_header("Content-Type", mime);
    }

    pub fn set_body_bytes(&mut self, bytes: &[u8]) {
        self.set_header("Content-Length", &bytes.len().to_string());
        self.cache.append_str("\r\n");
        self.body_offset = self.cache.size();
        self.cache.append(bytes);
        self.body_size = bytes.len();
        self.content_length = Some(bytes.len());
    }

    pub fn set_body_text(&mut self, text: &str) {
        self.set_body_bytes(text.as_bytes());
    }

    pub fn end_headers(&mut self) {
        self.cache.append_str("\r\n");
        self.body_offset = self.cache.size();
        self.body_size = 0;
    }

    /// Builds a minimal `status reason` response with the body set to
    /// `reason` (§4.4, §7 "HTTP replies 400").
    pub fn make_error_response(status: u16, reason: &str) -> Response {
        let mut resp = Response::new();
        resp.set_begin(status, None);
        resp.set_content_type("text/plain");
        resp.set_body_text(reason);
        resp
    }

    #[inline]
    pub fn cache(&self) -> &Buffer {
        &self.cache
    }

    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.cache.data()[self.body_offset..self.body_offset + self.body_size]
    }

    pub fn receive(&mut self, bytes: &[u8]) -> ParseStatus {
        self.cache.append(bytes);

        if !self.headers_parsed {
            let term = match parser::find_terminator(&self.cache, self.parsed_until) {
                Some(t) => t,
                None => {
                    self.parsed_until = self.cache.size();
                    return ParseStatus::Incomplete;
                }
            };

            let head = match parser::parse_head(&self.cache, term) {
                Ok(h) => h,
                Err(reason) => {
                    self.error = Some(reason);
                    return ParseStatus::Error(reason);
                }
            };

            self.protocol = head.token_a;
            self.status = head.token_b.parse().unwrap_or(0);
            self.phrase = head.token_c;
            self.headers = head.headers;
            self.content_length = head.content_length;
            self.headers_parsed = true;
            self.body_offset = term + 4;
            self.body_size = self.cache.size().saturating_sub(self.body_offset);
        }

        self.body_size = self.cache.size() - self.body_offset;

        match self.content_length {
            Some(len) if self.body_size >= len => {
                self.body_size = len;
                ParseStatus::Complete
            }
            Some(_) => ParseStatus::Incomplete,
            // Response streaming with unknown length is out of scope; no
            // Content-Length means no body.
            None => {
                self.body_size = 0;
                ParseStatus::Complete
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_method_url_headers_and_body() {
        let mut req = Request::new();
        req.set_begin("POST", "/things", "HTTP/1.1");
        req.set_header("X-Trace", "abc");
        req.set_body_text("hello");

        let wire = req.cache().data().to_vec();

        let mut parsed = Request::new();
        assert!(matches!(parsed.receive(&wire), ParseStatus::Complete));
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.url, "/things");
        assert_eq!(parsed.header("X-Trace"), Some("abc"));
        assert_eq!(parsed.header("content-length"), Some("5"));
        assert_eq!(parsed.body(), b"hello");
    }

    #[test]
    fn header_names_match_case_insensitively() {
        let mut req = Request::new();
        req.set_begin("GET", "/", "HTTP/1.1");
        req.set_header("content-length", "0");
        req.end_headers();

        let mut parsed = Request::new();
        parsed.receive(req.cache().data());
        assert_eq!(parsed.header("Content-Length"), Some("0"));
    }

    #[test]
    fn cookie_header_parses_ordered_pairs() {
        let mut req = Request::new();
        req.set_begin("GET", "/", "HTTP/1.1");
        req.set_header("Cookie", "a=1; b=2 ;c=3");
        req.end_headers();

        let mut parsed = Request::new();
        parsed.receive(req.cache().data());
        assert_eq!(
            parsed.cookies(),
            &[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn add_cookie_extends_the_cookie_header() {
        let mut req = Request::new();
        req.set_begin("GET", "/", "HTTP/1.1");
        req.set_cookie("a", "1");
        req.add_cookie("b", "2");
        req.end_headers();

        let mut parsed = Request::new();
        parsed.receive(req.cache().data());
        assert_eq!(parsed.header("Cookie"), Some("a=1; b=2"));
    }

    #[test]
    fn get_request_never_waits_for_a_body() {
        let mut parsed = Request::new();
        let status = parsed.receive(b"GET / HTTP/1.1\r\n\r\n");
        assert!(matches!(status, ParseStatus::Complete));
        assert_eq!(parsed.body(), b"");
    }

    #[test]
    fn malformed_start_line_is_an_error() {
        let mut parsed = Request::new();
        let status = parsed.receive(b"BAD REQUEST\r\n\r\n");
        assert!(matches!(status, ParseStatus::Error(_)));
    }

    #[test]
    fn content_length_with_a_leading_sign_is_rejected() {
        let mut parsed = Request::new();
        let status = parsed.receive(b"POST / HTTP/1.1\r\nContent-Length: +5\r\n\r\nhello");
        assert!(matches!(status, ParseStatus::Error(_)));
    }

    #[test]
    fn incremental_receive_across_header_terminator_split() {
        let mut parsed = Request::new();
        assert!(matches!(parsed.receive(b"GET / HTTP/1.1\r\n\r"), ParseStatus::Incomplete));
        assert!(matches!(parsed.receive(b"\n\r\n"), ParseStatus::Complete));
    }

    #[test]
    fn response_round_trips_status_and_body() {
        let mut resp = Response::new();
        resp.set_begin(200, None);
        resp.set_content_type("text/html");
        resp.set_body_text("<html/>");

        let mut parsed = Response::new();
        assert!(matches!(parsed.receive(resp.cache().data()), ParseStatus::Complete));
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.phrase, "OK");
        assert_eq!(parsed.header("Content-Type"), Some("text/html"));
        assert_eq!(parsed.body(), b"<html/>");
    }

    #[test]
    fn make_error_response_carries_reason_as_body() {
        let resp = Response::make_error_response(400, "missing protocol token");
        let mut parsed = Response::new();
        parsed.receive(resp.cache().data());
        assert_eq!(parsed.status, 400);
        assert_eq!(parsed.body(), b"missing protocol token");
    }
}
