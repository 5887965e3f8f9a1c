//! Shared incremental-parsing helpers used by both `Request` and `Response`
//! (§4.4). A request's start line and a response's status line have the same
//! three-token-then-headers shape, so both message types drive the same
//! header terminator search and head parser.

use crate::buffer::Buffer;

pub enum ParseStatus {
    Incomplete,
    Complete,
    Error(&'static str),
}

pub(crate) struct ParsedHead {
    pub token_a: String,
    pub token_b: String,
    pub token_c: String,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub content_length: Option<usize>,
}

/// Searches for `\r\n\r\n` starting 3 bytes before `search_from` so a
/// terminator split across two `receive` calls is never missed (§4.4 "minus 3
/// to allow for split CRLFCRLF").
pub(crate) fn find_terminator(buf: &Buffer, search_from: usize) -> Option<usize> {
    let data = buf.data();
    if data.len() < 4 {
        return None;
    }
    let start = search_from.saturating_sub(3).min(data.len());
    data[start..].windows(4).position(|w| w == b"\r\n\r\n").map(|p| start + p)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

/// Parses the head (start line + headers) ending just before `term`, the
/// offset of the `\r\n\r\n` terminator (§4.4 steps 1-4).
pub(crate) fn parse_head(buf: &Buffer, term: usize) -> std::result::Result<ParsedHead, &'static str> {
    let data = &buf.data()[..term];
    let mut lines = data.split(|&b| b == b'\n');

    let start_line = strip_cr(lines.next().ok_or("missing start line")?);
    let mut parts = start_line.splitn(3, |&b| b == b' ');
    let a = parts.next().unwrap_or(&[]);
    let b = parts.next().unwrap_or(&[]);
    let c = parts.next().unwrap_or(&[]);
    if a.is_empty() || b.is_empty() || c.is_empty() {
        return Err("malformed start line");
    }

    let token_a = String::from_utf8(a.to_vec()).map_err(|_| "start line is not utf-8")?;
    let token_b = String::from_utf8(b.to_vec()).map_err(|_| "start line is not utf-8")?;
    let token_c = String::from_utf8(c.to_vec()).map_err(|_| "start line is not utf-8")?;

    let mut headers = Vec::new();
    let mut cookies = Vec::new();
    let mut content_length = None;

    for raw_line in lines {
        let line = strip_cr(raw_line);
        if line.is_empty() {
            continue;
        }

        let colon = line.iter().position(|&b| b == b':').ok_or("header line missing colon")?;
        let name = &line[..colon];
        let value = trim_ascii(&line[colon + 1..]);
        if name.is_empty() || value.is_empty() {
            return Err("empty header name or value");
        }

        let name = String::from_utf8(name.to_vec()).map_err(|_| "header name is not utf-8")?;
        let value = String::from_utf8(value.to_vec()).map_err(|_| "header value is not utf-8")?;

        // Header names are matched case-insensitively per RFC 7230.
        if name.eq_ignore_ascii_case("content-length") {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err("content-length is not a decimal integer");
            }
            content_length = Some(value.parse::<usize>().map_err(|_| "content-length is not a decimal integer")?);
        }

        if name.eq_ignore_ascii_case("cookie") {
            for segment in value.split(';') {
                let mut kv = segment.splitn(2, '=');
                let k = kv.next().unwrap_or("").trim();
                let v = kv.next().unwrap_or("").trim();
                if !k.is_empty() {
                    cookies.push((k.to_string(), v.to_string()));
                }
            }
        }

        headers.push((name, value));
    }

    Ok(ParsedHead {
        token_a,
        token_b,
        token_c,
        headers,
        cookies,
        content_length,
    })
}

/// Case-insensitive header lookup over an ordered header list.
pub fn header_get<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}
