//! HTTP message model: an ordered, case-sensitive header multimap plus
//! `HttpMessage`/`HttpRequest`/`HttpResponse`, grounded on
//! `examples/original_source/proxycore/parser/http_parser.py`.
//!
//! Deliberately not built on `http::HeaderMap`: that type folds header names
//! to lower-case and loses the original byte-for-byte insertion order, both
//! of which this proxy's contract (re-serialize what was parsed, byte for
//! byte, unless a flow mutates it) depends on.

use bytes::Bytes;
use std::io::Read;

/// An ordered list of `(name, value)` header pairs, preserving original case
/// and insertion order. A repeated `set` overwrites the first occurrence in
/// place, matching Python's `OrderedDict.__setitem__` semantics used by the
/// original parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Appends a header, used while parsing so that repeated headers with
    /// distinct casing in the wire are preserved verbatim (the original
    /// parser's `get_headers` only ever builds one of these per message).
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Sets a header, overwriting the first entry whose name matches
    /// case-insensitively (HTTP header names are case-insensitive on the
    /// wire even though we preserve the original casing when present).
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

/// Common fields shared by requests and responses, mirroring the original
/// `HttpMessage` base class.
#[derive(Debug, Clone)]
pub struct HttpMessageParts {
    pub version: HttpVersion,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpMessageParts {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(|v| {
            v.split(';').next().unwrap_or(v).trim()
        })
    }

    pub fn charset(&self) -> Option<String> {
        let ct = self.headers.get("Content-Type")?;
        ct.split(';').skip(1).find_map(|param| {
            let param = param.trim();
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("charset") {
                Some(value.trim().trim_matches('"').to_string())
            } else {
                None
            }
        })
    }

    /// Whether the content type looks like text, per
    /// `http_parser.HttpMessage.is_text`: a plain substring test for `text`
    /// or `xml` anywhere in the content type, not a `text/`-prefix check.
    /// This means e.g. `application/json` is not text but
    /// `application/xhtml+xml` is.
    pub fn is_text(&self) -> bool {
        match self.content_type() {
            Some(ct) => ct.contains("text") || ct.contains("xml"),
            None => false,
        }
    }

    /// Best-effort decode of the body as text, applying gzip decompression
    /// and the declared charset. Never fails: any decode error yields the
    /// literal string `"Cannot decode"`, matching
    /// `http_parser.HttpMessage.body_as_text`.
    pub fn body_as_text(&self) -> String {
        let raw: std::borrow::Cow<[u8]> = if self.is_gzip_encoded() {
            match gunzip(&self.body) {
                Ok(bytes) => std::borrow::Cow::Owned(bytes),
                Err(_) => return "Cannot decode".to_string(),
            }
        } else {
            std::borrow::Cow::Borrowed(&self.body[..])
        };

        let charset = self.charset().unwrap_or_else(|| "utf-8".to_string());
        decode_charset(&raw, &charset).unwrap_or_else(|| "Cannot decode".to_string())
    }

    fn is_gzip_encoded(&self) -> bool {
        self.headers
            .get("Content-Encoding")
            .map(|v| v.eq_ignore_ascii_case("gzip"))
            .unwrap_or(false)
    }
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn decode_charset(bytes: &[u8], charset: &str) -> Option<String> {
    // Only UTF-8 and ASCII-compatible "latin-1-ish" are supported without
    // pulling in a full encoding-detection crate; this covers the
    // overwhelming majority of real traffic and degrades to "Cannot decode"
    // for anything exotic, same externally observable contract as the
    // original (which relies on Python's codec registry but still raises on
    // truly undecodable bytes).
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => std::str::from_utf8(bytes).ok().map(|s| s.to_string()),
        "iso-8859-1" | "latin-1" | "latin1" => {
            Some(bytes.iter().map(|&b| b as char).collect())
        }
        "ascii" | "us-ascii" => {
            if bytes.is_ascii() {
                Some(bytes.iter().map(|&b| b as char).collect())
            } else {
                None
            }
        }
        _ => std::str::from_utf8(bytes).ok().map(|s| s.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub parts: HttpMessageParts,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, version: HttpVersion) -> Self {
        HttpRequest {
            method: method.into(),
            path: path.into(),
            parts: HttpMessageParts {
                version,
                headers: Headers::new(),
                body: Bytes::new(),
            },
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.parts.headers
    }

    pub fn first_line(&self) -> String {
        format!("{} {} {}", self.method, self.path, self.parts.version.as_str())
    }

    /// Whether this request conventionally carries a body, per
    /// `http_parser.HttpRequest.has_body`: only `POST`/`PUT`/`PATCH` do, so a
    /// `Content-Length` on any other method is not read as a body (it is the
    /// start of the next pipelined request instead).
    pub fn has_body(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH")
    }

    /// Splits `path` into `(path, query)` and parses the query string into an
    /// ordered list of `(key, value)` pairs; keys ending in `[]` collect all
    /// repeated occurrences, any other repeated key keeps only the last
    /// value, matching `http_parser.HttpRequest.path_query`.
    pub fn path_query(&self) -> (&str, Vec<(String, String)>) {
        let (path, query) = match self.path.split_once('?') {
            Some((p, q)) => (p, q),
            None => (self.path.as_str(), ""),
        };

        let mut list_keys: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut result: Vec<(String, String)> = Vec::new();

        for pair in query.split('&').filter(|s| !s.is_empty()) {
            let (raw_key, raw_value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            let key = url_decode(raw_key);
            let value = url_decode(raw_value);

            if let Some(stripped) = key.strip_suffix("[]") {
                let key = stripped.to_string();
                list_keys.insert(key.clone());
                result.push((key, value));
            } else if list_keys.contains(&key) {
                // A later scalar occurrence of a key already seen as `k[]`
                // still just appends; this only matters for the reverse
                // (scalar then `[]`) which is handled by overwrite below.
                result.push((key, value));
            } else if let Some(existing) = result.iter_mut().find(|(k, _)| k == &key) {
                existing.1 = value;
            } else {
                result.push((key, value));
            }
        }

        (path, result)
    }

    pub fn to_bytes(&self) -> Bytes {
        crate::proto::encode::encode_request(self)
    }
}

fn url_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: String,
    pub reason_phrase: String,
    pub parts: HttpMessageParts,
}

impl HttpResponse {
    pub fn new(status_code: impl Into<String>, reason_phrase: impl Into<String>) -> Self {
        HttpResponse {
            status_code: status_code.into(),
            reason_phrase: reason_phrase.into(),
            parts: HttpMessageParts {
                version: HttpVersion::Http11,
                headers: Headers::new(),
                body: Bytes::new(),
            },
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.parts
            .headers
            .set("Content-Length", body.len().to_string());
        self.parts.body = body;
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.parts.headers
    }

    pub fn first_line(&self) -> String {
        format!(
            "{} {} {}",
            self.parts.version.as_str(),
            self.status_code,
            self.reason_phrase
        )
    }

    /// Whether this response carries a body, per the original's historical
    /// heuristic: either explicit framing headers are present, or the status
    /// code is one of the handful that conventionally do ({200, 404}). This
    /// is not RFC 7230-correct (e.g. it misses 201, 2xx no-content edge
    /// cases) but is kept intentionally: `spec.md` states it as an
    /// invariant of the parser contract, not a bug to fix.
    pub fn has_body(&self) -> bool {
        self.parts.headers.contains("Content-Length")
            || self.parts.headers.contains("Transfer-Encoding")
            || matches!(self.status_code.as_str(), "200" | "404")
    }

    pub fn to_bytes(&self) -> Bytes {
        crate::proto::encode::encode_response(self)
    }

    pub fn internal_error(body: String) -> Self {
        HttpResponse::new("500", "Internal proxy error").with_body(Bytes::from(body))
    }
}

#[derive(Debug, Clone)]
pub enum HttpMessage {
    Request(HttpRequest),
    Response(HttpResponse),
}

impl HttpMessage {
    pub fn parts(&self) -> &HttpMessageParts {
        match self {
            HttpMessage::Request(r) => &r.parts,
            HttpMessage::Response(r) => &r.parts,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            HttpMessage::Request(r) => r.to_bytes(),
            HttpMessage::Response(r) => r.to_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_query_collects_bracket_keys() {
        let req = HttpRequest::new("GET", "/search?tag[]=a&tag[]=b&page=2", HttpVersion::Http11);
        let (path, query) = req.path_query();
        assert_eq!(path, "/search");
        assert_eq!(
            query,
            vec![
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn path_query_last_wins_for_scalar_keys() {
        let req = HttpRequest::new("GET", "/x?a=1&a=2", HttpVersion::Http11);
        let (_, query) = req.path_query();
        assert_eq!(query, vec![("a".to_string(), "2".to_string())]);
    }

    #[test]
    fn has_body_allows_historical_status_codes() {
        let resp = HttpResponse::new("404", "Not Found");
        assert!(resp.has_body());
        let resp = HttpResponse::new("204", "No Content");
        assert!(!resp.has_body());
    }

    #[test]
    fn body_as_text_reports_cannot_decode_on_bad_utf8() {
        let mut resp = HttpResponse::new("200", "OK");
        resp.parts.headers.set("Content-Type", "text/plain; charset=utf-8");
        resp.parts.body = Bytes::from_static(&[0xff, 0xfe, 0xfd]);
        assert_eq!(resp.body_as_text(), "Cannot decode");
    }

    #[test]
    fn headers_set_overwrites_case_insensitively() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        headers.set("content-type", "application/json");
        assert_eq!(headers.get("Content-Type"), Some("application/json"));
        assert_eq!(headers.iter().count(), 1);
    }
}
