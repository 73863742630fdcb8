//! Incremental byte-stream parsing: turns a growing buffer of bytes read off
//! a socket into complete `HttpRequest`/`HttpResponse` values, one message at
//! a time, without ever requiring the whole message to already be in memory
//! before starting.
//!
//! Grounded on `examples/original_source/proxycore/parser/http_parser.py`'s
//! `get_http_request`/`get_firstline`/`get_headers` generators and
//! `parser_utils.get_word`/`get_until`, translated from "yield when you need
//! more bytes" into "return `Ok(None)` when you need more bytes", which is
//! the natural non-generator idiom for this in Rust (cf. the teacher's own
//! `decode_*` functions in `proto/h1/parse.rs` doing the same with `httparse`
//! under the hood; ours hand-rolls the part `httparse` would otherwise own).

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};
use crate::message::{Headers, HttpMessageParts, HttpRequest, HttpResponse, HttpVersion};
use crate::proto::decode::{framing_for_request, framing_for_response, DecodeOutcome, Decoder};

/// Finds `\r\n` (or bare `\n`, tolerated the way the original parser's
/// `readline`-based approach tolerates it) starting at the front of `buf`.
/// Returns the line without its terminator and how many bytes it occupied
/// including the terminator.
pub(crate) fn find_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    for i in 0..buf.len() {
        if buf[i] == b'\n' {
            let end = if i > 0 && buf[i - 1] == b'\r' { i - 1 } else { i };
            return Some((&buf[..end], i + 1));
        }
    }
    None
}

/// Splits a line on the first run of ASCII whitespace, mirroring
/// `parser_utils.get_word`.
fn get_word(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = line.iter().position(|&b| !b.is_ascii_whitespace())?;
    let line = &line[start..];
    match line.iter().position(|&b| b.is_ascii_whitespace()) {
        Some(end) => {
            let rest = &line[end..];
            let rest_start = rest
                .iter()
                .position(|&b| !b.is_ascii_whitespace())
                .unwrap_or(rest.len());
            Some((&line[..end], &rest[rest_start..]))
        }
        None => Some((line, &[])),
    }
}

fn parse_version(word: &[u8]) -> Result<HttpVersion> {
    match word {
        b"HTTP/1.1" => Ok(HttpVersion::Http11),
        b"HTTP/1.0" => Ok(HttpVersion::Http10),
        _ => Err(Error::parse(format!(
            "unsupported HTTP version: {}",
            String::from_utf8_lossy(word)
        ))),
    }
}

/// Reads the header block (everything up to the blank line), folding
/// continuation lines that start with a space or tab into the previous
/// header's value, per `http_parser.get_headers`. Returns `None` if the
/// buffer does not yet contain a complete header block.
fn try_parse_headers(buf: &[u8]) -> Result<Option<(Headers, usize)>> {
    let mut headers = Headers::new();
    let mut offset = 0;
    loop {
        let (line, consumed) = match find_line(&buf[offset..]) {
            Some(v) => v,
            None => return Ok(None),
        };
        if line.is_empty() {
            offset += consumed;
            return Ok(Some((headers, offset)));
        }
        if (line[0] == b' ' || line[0] == b'\t') && !headers_is_empty(&headers) {
            let continuation = String::from_utf8_lossy(line).trim().to_string();
            fold_last_header(&mut headers, &continuation);
        } else {
            let text = String::from_utf8_lossy(line);
            let (name, value) = text
                .split_once(':')
                .ok_or_else(|| Error::parse(format!("malformed header line: {text}")))?;
            headers.set(name.trim(), value.trim());
        }
        offset += consumed;
    }
}

fn headers_is_empty(headers: &Headers) -> bool {
    headers.iter().next().is_none()
}

fn fold_last_header(headers: &mut Headers, continuation: &str) {
    let last_name = headers.iter().last().map(|(n, _)| n.to_string());
    if let Some(name) = last_name {
        let existing = headers.get(&name).unwrap_or("").to_string();
        headers.set(name, format!("{existing} {continuation}"));
    }
}

enum Stage {
    StartLine,
    Headers,
    Body,
}

/// Incremental parser for one direction of traffic (requests or responses)
/// on a single connection. Feed it bytes as they arrive; call
/// [`RequestParser::poll`]/[`ResponseParser::poll`] after each feed.
pub struct RequestParser {
    stage: Stage,
    method: Option<String>,
    path: Option<String>,
    version: Option<HttpVersion>,
    headers: Option<Headers>,
    decoder: Option<Decoder>,
    body: BytesMut,
    connection_closed: bool,
}

impl Default for RequestParser {
    fn default() -> Self {
        RequestParser {
            stage: Stage::StartLine,
            method: None,
            path: None,
            version: None,
            headers: None,
            decoder: None,
            body: BytesMut::new(),
            connection_closed: false,
        }
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tells an in-progress `UntilClose`-framed body (a `POST`/`PUT`/`PATCH`
    /// with no `Content-Length`/`Transfer-Encoding`) that the client
    /// connection has reached EOF, mirroring [`ResponseParser::notify_eof`].
    pub fn notify_eof(&mut self) {
        self.connection_closed = true;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.notify_eof();
        }
    }

    /// Attempts to complete one request from `buf`, consuming the bytes it
    /// uses from the front. Returns `Ok(None)` if more bytes are needed.
    pub fn poll(&mut self, buf: &mut BytesMut) -> Result<Option<HttpRequest>> {
        loop {
            match self.stage {
                Stage::StartLine => {
                    let Some((line, consumed)) = find_line(buf) else {
                        return Ok(None);
                    };
                    let (method, rest) = get_word(line)
                        .ok_or_else(|| Error::parse("empty request line"))?;
                    let (path, rest) =
                        get_word(rest).ok_or_else(|| Error::parse("missing request path"))?;
                    let (version_word, _) =
                        get_word(rest).ok_or_else(|| Error::parse("missing request version"))?;
                    self.method = Some(String::from_utf8_lossy(method).into_owned());
                    self.path = Some(String::from_utf8_lossy(path).into_owned());
                    self.version = Some(parse_version(version_word)?);
                    buf.advance(consumed);
                    self.stage = Stage::Headers;
                }
                Stage::Headers => {
                    let Some((headers, consumed)) = try_parse_headers(buf)? else {
                        return Ok(None);
                    };
                    buf.advance(consumed);
                    let method = self.method.as_deref().unwrap_or("");
                    let has_body = matches!(method, "POST" | "PUT" | "PATCH");
                    let framing = framing_for_request(&headers, has_body);
                    let mut decoder = Decoder::for_framing(framing);
                    if decoder.is_eof_framed() && self.connection_closed {
                        decoder.notify_eof();
                    }
                    self.decoder = Some(decoder);
                    self.headers = Some(headers);
                    self.stage = Stage::Body;
                }
                Stage::Body => {
                    let decoder = self.decoder.as_mut().expect("decoder set in Headers stage");
                    match decoder.decode(buf, &mut self.body)? {
                        DecodeOutcome::InProgress => return Ok(None),
                        DecodeOutcome::Done => {
                            let request = HttpRequest {
                                method: self.method.take().unwrap(),
                                path: self.path.take().unwrap(),
                                parts: HttpMessageParts {
                                    version: self.version.take().unwrap(),
                                    headers: self.headers.take().unwrap(),
                                    body: std::mem::take(&mut self.body).freeze(),
                                },
                            };
                            *self = RequestParser::new();
                            return Ok(Some(request));
                        }
                    }
                }
            }
        }
    }
}

pub struct ResponseParser {
    stage: Stage,
    status_code: Option<String>,
    reason_phrase: Option<String>,
    version: Option<HttpVersion>,
    headers: Option<Headers>,
    decoder: Option<Decoder>,
    body: BytesMut,
    connection_closed: bool,
}

impl Default for ResponseParser {
    fn default() -> Self {
        ResponseParser {
            stage: Stage::StartLine,
            status_code: None,
            reason_phrase: None,
            version: None,
            headers: None,
            decoder: None,
            body: BytesMut::new(),
            connection_closed: false,
        }
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tells an in-progress `UntilClose`-framed body that the upstream
    /// connection has reached EOF, which is the terminating condition for
    /// that framing rather than an error.
    pub fn notify_eof(&mut self) {
        self.connection_closed = true;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.notify_eof();
        }
    }

    pub fn poll(&mut self, buf: &mut BytesMut) -> Result<Option<HttpResponse>> {
        loop {
            match self.stage {
                Stage::StartLine => {
                    let Some((line, consumed)) = find_line(buf) else {
                        return Ok(None);
                    };
                    let (version_word, rest) =
                        get_word(line).ok_or_else(|| Error::parse("empty status line"))?;
                    let (status_code, reason) =
                        get_word(rest).ok_or_else(|| Error::parse("missing status code"))?;
                    self.version = Some(parse_version(version_word)?);
                    self.status_code = Some(String::from_utf8_lossy(status_code).into_owned());
                    self.reason_phrase = Some(
                        String::from_utf8_lossy(trim_ascii_ws(reason)).into_owned(),
                    );
                    buf.advance(consumed);
                    self.stage = Stage::Headers;
                }
                Stage::Headers => {
                    let Some((headers, consumed)) = try_parse_headers(buf)? else {
                        return Ok(None);
                    };
                    buf.advance(consumed);
                    let status = self.status_code.as_deref().unwrap_or("");
                    let has_body_heuristic = headers.contains("Content-Length")
                        || headers.contains("Transfer-Encoding")
                        || matches!(status, "200" | "404");
                    let framing = framing_for_response(&headers, has_body_heuristic);
                    let mut decoder = Decoder::for_framing(framing);
                    if decoder.is_eof_framed() && self.connection_closed {
                        decoder.notify_eof();
                    }
                    self.decoder = Some(decoder);
                    self.headers = Some(headers);
                    self.stage = Stage::Body;
                }
                Stage::Body => {
                    let decoder = self.decoder.as_mut().expect("decoder set in Headers stage");
                    match decoder.decode(buf, &mut self.body)? {
                        DecodeOutcome::InProgress => return Ok(None),
                        DecodeOutcome::Done => {
                            let response = HttpResponse {
                                status_code: self.status_code.take().unwrap(),
                                reason_phrase: self.reason_phrase.take().unwrap(),
                                parts: HttpMessageParts {
                                    version: self.version.take().unwrap(),
                                    headers: self.headers.take().unwrap(),
                                    body: std::mem::take(&mut self.body).freeze(),
                                },
                            };
                            *self = ResponseParser::new();
                            return Ok(Some(response));
                        }
                    }
                }
            }
        }
    }
}

fn trim_ascii_ws(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_request() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n"[..]);
        let request = parser.poll(&mut buf).unwrap().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/hello");
        assert_eq!(request.headers().get("Host"), Some("example.com"));
        assert!(request.parts.body.is_empty());
    }

    #[test]
    fn parses_request_split_across_feeds() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe"[..]);
        assert!(parser.poll(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"llo");
        let request = parser.poll(&mut buf).unwrap().unwrap();
        assert_eq!(&request.parts.body[..], b"hello");
    }

    #[test]
    fn folds_continuation_header_lines() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(
            &b"GET / HTTP/1.1\r\nX-Long: part-one\r\n part-two\r\n\r\n"[..],
        );
        let request = parser.poll(&mut buf).unwrap().unwrap();
        assert_eq!(request.headers().get("X-Long"), Some("part-one part-two"));
    }

    #[test]
    fn response_without_framing_headers_reads_until_eof() {
        let mut parser = ResponseParser::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n\r\nbody-so-far"[..]);
        assert!(parser.poll(&mut buf).unwrap().is_none());
        parser.notify_eof();
        let mut empty = BytesMut::new();
        let response = parser.poll(&mut empty).unwrap().unwrap();
        assert_eq!(&response.parts.body[..], b"body-so-far");
    }

    #[test]
    fn get_with_content_length_does_not_eat_the_next_request() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(
            &b"GET /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nGET /b HTTP/1.1\r\n\r\n"[..],
        );
        let first = parser.poll(&mut buf).unwrap().unwrap();
        assert_eq!(first.path, "/a");
        assert!(first.parts.body.is_empty());
        let second = parser.poll(&mut buf).unwrap().unwrap();
        assert_eq!(second.path, "/b");
    }

    #[test]
    fn post_without_framing_headers_reads_until_eof() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"POST /x HTTP/1.1\r\n\r\nbody-so-far"[..]);
        assert!(parser.poll(&mut buf).unwrap().is_none());
        parser.notify_eof();
        let mut empty = BytesMut::new();
        let request = parser.poll(&mut empty).unwrap().unwrap();
        assert_eq!(&request.parts.body[..], b"body-so-far");
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"GET / HTTP/2.0\r\n\r\n"[..]);
        assert!(parser.poll(&mut buf).is_err());
    }
}
