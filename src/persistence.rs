//! Text serialization for [`LogReport`]s, so a captured exchange can be saved
//! to a file and loaded back later. Grounded on
//! `examples/original_source/proxycore/pipe/persistence.py`'s
//! `serialize_message_report`/`parse_message_report`.
//!
//! The format: a `Report: <guid>` line, then one `Endpoint <name>` block per
//! endpoint the exchange touched, each holding a `Request: `/`Response: `
//! keyword directly followed by the raw wire bytes of that message and a
//! trailing blank line (or the literal `NoRequest`/`NoResponse` line if that
//! side never happened), terminated by `End report` and a dashed separator
//! so several reports can be concatenated in one file.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::proto::parse::{find_line, RequestParser, ResponseParser};
use crate::reporting::LogReport;

const SEPARATOR: &[u8] =
    b"-------------------------------------------------------------------------------\r\n";

pub fn serialize_report(report: &LogReport) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_slice(format!("Report: {}\r\n", report.guid.as_simple()).as_bytes());
    for name in report.endpoints() {
        let exchange = report.for_endpoint(name).expect("endpoint came from report.endpoints()");
        buf.put_slice(format!("Endpoint {name}\r\n").as_bytes());
        match &exchange.request {
            Some(request) => {
                buf.put_slice(b"Request: ");
                buf.put_slice(&request.to_bytes());
                buf.put_slice(b"\r\n");
            }
            None => buf.put_slice(b"NoRequest\r\n"),
        }
        match &exchange.response {
            Some(response) => {
                buf.put_slice(b"Response: ");
                buf.put_slice(&response.to_bytes());
                buf.put_slice(b"\r\n");
            }
            None => buf.put_slice(b"NoResponse\r\n"),
        }
    }
    buf.put_slice(b"End report\r\n");
    buf.put_slice(SEPARATOR);
    buf.freeze()
}

pub fn serialize_reports<'a>(reports: impl Iterator<Item = &'a LogReport>) -> Bytes {
    let mut buf = BytesMut::new();
    for report in reports {
        buf.put_slice(&serialize_report(report));
    }
    buf.freeze()
}

/// Parses one report from the front of `input`, returning it along with how
/// many bytes it consumed.
pub fn parse_report(input: &[u8]) -> Result<(LogReport, usize)> {
    let mut offset = 0;

    let (line, consumed) =
        find_line(&input[offset..]).ok_or_else(|| Error::parse("truncated report header"))?;
    offset += consumed;
    let text = String::from_utf8_lossy(line);
    let guid_hex = text
        .strip_prefix("Report: ")
        .ok_or_else(|| Error::parse(format!("expected \"Report: <guid>\", got {text:?}")))?;
    let guid = Uuid::parse_str(guid_hex).map_err(|e| Error::parse(format!("bad guid: {e}")))?;
    let mut report = LogReport::new(guid);

    loop {
        let (line, consumed) =
            find_line(&input[offset..]).ok_or_else(|| Error::parse("truncated report body"))?;
        if line == b"End report" {
            offset += consumed;
            break;
        }
        let text = String::from_utf8_lossy(line);
        let name = text
            .strip_prefix("Endpoint ")
            .ok_or_else(|| Error::parse(format!("expected \"Endpoint <name>\", got {text:?}")))?
            .to_string();
        offset += consumed;

        if peek_line(&input[offset..]) == Some(b"NoRequest") {
            let (_, consumed) = find_line(&input[offset..]).unwrap();
            offset += consumed;
        } else {
            let rest = input[offset..]
                .strip_prefix(b"Request: ")
                .ok_or_else(|| Error::parse("expected \"Request: \" or \"NoRequest\""))?;
            let prefix_len = input[offset..].len() - rest.len();
            let (request, consumed) = parse_embedded_request(rest)?;
            offset += prefix_len + consumed;
            let (_, nl_consumed) = find_line(&input[offset..])
                .ok_or_else(|| Error::parse("truncated request trailer"))?;
            offset += nl_consumed;
            report.log_request(&name, request);
        }

        if peek_line(&input[offset..]) == Some(b"NoResponse") {
            let (_, consumed) = find_line(&input[offset..]).unwrap();
            offset += consumed;
        } else {
            let rest = input[offset..]
                .strip_prefix(b"Response: ")
                .ok_or_else(|| Error::parse("expected \"Response: \" or \"NoResponse\""))?;
            let prefix_len = input[offset..].len() - rest.len();
            let (response, consumed) = parse_embedded_response(rest)?;
            offset += prefix_len + consumed;
            let (_, nl_consumed) = find_line(&input[offset..])
                .ok_or_else(|| Error::parse("truncated response trailer"))?;
            offset += nl_consumed;
            report.log_response(&name, response);
        }
    }

    Ok((report, offset))
}

fn peek_line(input: &[u8]) -> Option<&[u8]> {
    find_line(input).map(|(line, _)| line)
}

fn parse_embedded_request(input: &[u8]) -> Result<(crate::message::HttpRequest, usize)> {
    let mut parser = RequestParser::new();
    let mut buf = BytesMut::from(input);
    let original_len = buf.len();
    match parser.poll(&mut buf)? {
        Some(request) => Ok((request, original_len - buf.len())),
        None => Err(Error::parse("truncated embedded request")),
    }
}

fn parse_embedded_response(input: &[u8]) -> Result<(crate::message::HttpResponse, usize)> {
    let mut parser = ResponseParser::new();
    let mut buf = BytesMut::from(input);
    let original_len = buf.len();
    match parser.poll(&mut buf)? {
        Some(response) => Ok((response, original_len - buf.len())),
        None => Err(Error::parse("truncated embedded response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HttpRequest, HttpResponse, HttpVersion};

    #[test]
    fn round_trips_a_report_with_both_sides_present() {
        let guid = Uuid::new_v4();
        let mut report = LogReport::new(guid);
        let mut request = HttpRequest::new("GET", "/a", HttpVersion::Http11);
        request.headers_mut().set("Host", "example.com");
        report.log_request("local", request);
        report.log_response("local", HttpResponse::new("200", "OK").with_body(Bytes::from_static(b"hi")));

        let bytes = serialize_report(&report);
        let (parsed, consumed) = parse_report(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.guid, guid);
        assert_eq!(parsed.request().unwrap().path, "/a");
        assert_eq!(parsed.response().unwrap().status_code, "200");
    }

    #[test]
    fn round_trips_a_report_missing_one_side() {
        let guid = Uuid::new_v4();
        let mut report = LogReport::new(guid);
        report.log_request("local", HttpRequest::new("GET", "/", HttpVersion::Http11));

        let bytes = serialize_report(&report);
        let (parsed, _) = parse_report(&bytes).unwrap();
        assert!(parsed.for_endpoint("local").unwrap().response.is_none());
    }
}
