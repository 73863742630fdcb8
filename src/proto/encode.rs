//! Serialization of `HttpRequest`/`HttpResponse` back to wire bytes,
//! mirroring `http_parser.HttpMessage.to_bytes` (first line, then each
//! header in stored order, then a blank line, then the body verbatim).

use bytes::{BufMut, Bytes, BytesMut};

use crate::message::{HttpMessageParts, HttpRequest, HttpResponse};

fn encode_parts(buf: &mut BytesMut, first_line: &str, parts: &HttpMessageParts) {
    buf.put_slice(first_line.as_bytes());
    buf.put_slice(b"\r\n");
    for (name, value) in parts.headers.iter() {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.put_slice(&parts.body);
}

pub fn encode_request(request: &HttpRequest) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + request.parts.body.len());
    encode_parts(&mut buf, &request.first_line(), &request.parts);
    buf.freeze()
}

pub fn encode_response(response: &HttpResponse) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + response.parts.body.len());
    encode_parts(&mut buf, &response.first_line(), &response.parts);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HttpVersion;

    #[test]
    fn round_trips_request_bytes() {
        let mut req = HttpRequest::new("GET", "/a", HttpVersion::Http11);
        req.headers_mut().set("Host", "example.com");
        let bytes = req.to_bytes();
        assert_eq!(
            &bytes[..],
            b"GET /a HTTP/1.1\r\nHost: example.com\r\n\r\n"
        );
    }
}
